// Run Records Module
// Block run / pipeline run models and the run record store

pub mod models;
pub mod store;

pub use models::{
    BlockRun, BlockRunId, BlockRunMetrics, BlockRunStatus, PipelineRun, PipelineRunId,
    PipelineRunStatus,
};
pub use store::{BlockRunCreation, MemoryRunStore, RunRecordStore};
