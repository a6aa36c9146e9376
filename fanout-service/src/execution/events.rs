// Execution Events
// Progress reporting for pipeline runs, fan-out materialization and block runs

use crate::runs::models::{BlockRunStatus, PipelineRunId, PipelineRunStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while scheduling and executing a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline run picked up by the control loop
    PipelineRunStarted {
        pipeline_run_id: PipelineRunId,
        pipeline_uuid: String,
        total_blocks: usize,
    },

    /// New block runs created for a block's fan-out
    BlockRunsMaterialized {
        block_uuid: String,
        block_run_uuids: Vec<String>,
    },

    /// Block run claimed and dispatched to an executor
    BlockRunStarted { block_run_uuid: String },

    /// Block run reached a terminal status
    BlockRunFinished {
        block_run_uuid: String,
        status: BlockRunStatus,
        duration: Duration,
    },

    /// Completed vs expected instances of a fanned-out block
    FanoutProgress {
        block_uuid: String,
        completed: usize,
        target: usize,
    },

    /// Pipeline run reached a terminal status
    PipelineRunFinished {
        pipeline_run_id: PipelineRunId,
        status: PipelineRunStatus,
        duration: Duration,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        block_uuid: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn pipeline_run_started(
        pipeline_run_id: PipelineRunId,
        pipeline_uuid: impl Into<String>,
        total_blocks: usize,
    ) -> Self {
        Self::PipelineRunStarted {
            pipeline_run_id,
            pipeline_uuid: pipeline_uuid.into(),
            total_blocks,
        }
    }

    pub fn block_runs_materialized(
        block_uuid: impl Into<String>,
        block_run_uuids: Vec<String>,
    ) -> Self {
        Self::BlockRunsMaterialized {
            block_uuid: block_uuid.into(),
            block_run_uuids,
        }
    }

    pub fn block_run_started(block_run_uuid: impl Into<String>) -> Self {
        Self::BlockRunStarted {
            block_run_uuid: block_run_uuid.into(),
        }
    }

    pub fn block_run_finished(
        block_run_uuid: impl Into<String>,
        status: BlockRunStatus,
        duration: Duration,
    ) -> Self {
        Self::BlockRunFinished {
            block_run_uuid: block_run_uuid.into(),
            status,
            duration,
        }
    }

    pub fn fanout_progress(block_uuid: impl Into<String>, completed: usize, target: usize) -> Self {
        Self::FanoutProgress {
            block_uuid: block_uuid.into(),
            completed,
            target,
        }
    }

    pub fn pipeline_run_finished(
        pipeline_run_id: PipelineRunId,
        status: PipelineRunStatus,
        duration: Duration,
    ) -> Self {
        Self::PipelineRunFinished {
            pipeline_run_id,
            status,
            duration,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, block_uuid: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            block_uuid,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, block_uuid: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            block_uuid,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, block_uuid: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            block_uuid,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::pipeline_run_started(1, "fan_out", 4));
        tx.send_event(ExecutionEvent::fanout_progress("dynamic1_child", 1, 2));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::PipelineRunStarted { .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(
            event2,
            ExecutionEvent::FanoutProgress {
                completed: 1,
                target: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::block_run_finished(
            "child2x:1:0",
            BlockRunStatus::Completed,
            Duration::from_secs(3),
        );

        if let ExecutionEvent::BlockRunFinished {
            block_run_uuid,
            status,
            duration,
        } = event
        {
            assert_eq!(block_run_uuid, "child2x:1:0");
            assert_eq!(status, BlockRunStatus::Completed);
            assert_eq!(duration, Duration::from_secs(3));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }
}
