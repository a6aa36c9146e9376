// Run Record Models
// Block runs, pipeline runs and their status state machines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt;

pub type PipelineRunId = u64;
pub type BlockRunId = u64;

/// Status of a single block run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockRunStatus {
    Initial,
    Running,
    Completed,
    Failed,
    Cancelled,
    ConditionFailed,
}

impl BlockRunStatus {
    /// Terminal statuses are never left again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BlockRunStatus::Completed
                | BlockRunStatus::Failed
                | BlockRunStatus::Cancelled
                | BlockRunStatus::ConditionFailed
        )
    }

    /// `INITIAL -> RUNNING -> {COMPLETED, FAILED, CONDITION_FAILED}`, or
    /// any non-terminal status to `CANCELLED`.
    pub fn can_transition_to(self, next: BlockRunStatus) -> bool {
        use BlockRunStatus::*;

        match (self, next) {
            (Initial, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, ConditionFailed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockRunStatus::Initial => "INITIAL",
            BlockRunStatus::Running => "RUNNING",
            BlockRunStatus::Completed => "COMPLETED",
            BlockRunStatus::Failed => "FAILED",
            BlockRunStatus::Cancelled => "CANCELLED",
            BlockRunStatus::ConditionFailed => "CONDITION_FAILED",
        }
    }
}

impl fmt::Display for BlockRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineRunStatus {
    Initial,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineRunStatus::Completed | PipelineRunStatus::Failed | PipelineRunStatus::Cancelled
        )
    }
}

impl fmt::Display for PipelineRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineRunStatus::Initial => "INITIAL",
            PipelineRunStatus::Running => "RUNNING",
            PipelineRunStatus::Completed => "COMPLETED",
            PipelineRunStatus::Failed => "FAILED",
            PipelineRunStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Fan-out bookkeeping persisted with every block run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRunMetrics {
    /// Position of this instance among its siblings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_block_index: Option<usize>,

    /// Ancestor block uuid -> that ancestor's item index for this instance
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dynamic_block_indexes: BTreeMap<String, usize>,

    /// Ancestor block uuid -> per-item metadata written by that ancestor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl BlockRunMetrics {
    pub fn is_empty(&self) -> bool {
        self.dynamic_block_index.is_none()
            && self.dynamic_block_indexes.is_empty()
            && self.metadata.is_empty()
    }
}

/// One concrete, schedulable instance of a block within a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRun {
    pub id: BlockRunId,
    pub pipeline_run_id: PipelineRunId,
    /// Block uuid, suffixed with the instance coordinates for fan-out runs
    pub block_uuid: String,
    pub status: BlockRunStatus,
    #[serde(default)]
    pub metrics: BlockRunMetrics,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BlockRun {
    pub fn is_completed(&self) -> bool {
        self.status == BlockRunStatus::Completed
    }

    /// Ordering key for "most recent attempt wins" deduplication
    pub fn recency_key(&self) -> (Option<DateTime<Utc>>, BlockRunId) {
        (self.started_at, self.id)
    }
}

/// One execution attempt of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: PipelineRunId,
    pub pipeline_uuid: String,
    pub status: PipelineRunStatus,
    /// Namespace under which block outputs for this run are stored
    pub execution_partition: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
