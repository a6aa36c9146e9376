// Fan-out Service Library
// Dynamic block fan-out, run records and scheduling for block pipelines

pub mod config;
pub mod error;
pub mod execution;
pub mod outputs;
pub mod pipeline;
pub mod runs;

// Re-export commonly used types
pub use config::SchedulerConfig;
pub use error::{ServiceError, ServiceResult};

// Re-export pipeline types
pub use pipeline::{Block, BlockDefinition, FanoutConfig, FanoutMode, Pipeline, PipelineParser};

// Re-export execution types
pub use execution::{
    progress_channel, BlockExecutor, BlockGraph, BlockOutcome, DynamicScheduler, ExecutionEvent,
    GraphError, LogLevel, PipelineRunner, ProgressReceiver, ProgressSender, RunSummary,
    TickOutcome,
};

// Re-export output and run record types
pub use outputs::{DynamicOutput, FsOutputStore, MemoryOutputStore, OutputReader, OutputWriter};
pub use runs::{
    BlockRun, BlockRunMetrics, BlockRunStatus, MemoryRunStore, PipelineRun, PipelineRunId,
    PipelineRunStatus, RunRecordStore,
};
