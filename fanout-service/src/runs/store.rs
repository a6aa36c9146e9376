// Run Record Store
// Persistence seam for pipeline runs and block runs, plus an in-memory backend

use crate::error::{ServiceError, ServiceResult};
use crate::runs::models::{
    BlockRun, BlockRunId, BlockRunMetrics, BlockRunStatus, PipelineRun, PipelineRunId,
    PipelineRunStatus,
};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of `create_block_run`
#[derive(Debug, Clone)]
pub struct BlockRunCreation {
    pub block_run: BlockRun,
    /// False when `skip_if_exists` found an existing run with the same uuid
    pub created: bool,
}

/// Transactional store for run records
///
/// `create_block_run` with `skip_if_exists` must be a single atomic
/// check-then-insert: concurrent ticks computing the same combination may
/// race on it.
#[async_trait::async_trait]
pub trait RunRecordStore: Send + Sync {
    async fn create_pipeline_run(
        &self,
        pipeline_uuid: &str,
        execution_partition: Option<&str>,
    ) -> ServiceResult<PipelineRun>;

    async fn get_pipeline_run(&self, id: PipelineRunId) -> ServiceResult<PipelineRun>;

    async fn update_pipeline_run_status(
        &self,
        id: PipelineRunId,
        status: PipelineRunStatus,
    ) -> ServiceResult<PipelineRun>;

    async fn create_block_run(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
        metrics: BlockRunMetrics,
        skip_if_exists: bool,
    ) -> ServiceResult<BlockRunCreation>;

    async fn list_block_runs(&self, pipeline_run_id: PipelineRunId)
        -> ServiceResult<Vec<BlockRun>>;

    async fn update_status(
        &self,
        block_run_id: BlockRunId,
        status: BlockRunStatus,
    ) -> ServiceResult<BlockRun>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_pipeline_run_id: PipelineRunId,
    next_block_run_id: BlockRunId,
    pipeline_runs: HashMap<PipelineRunId, PipelineRun>,
    /// Block runs in insertion order, per pipeline run
    block_runs: HashMap<PipelineRunId, Vec<BlockRun>>,
    /// block_run_id -> (pipeline_run_id, position in `block_runs`)
    locations: HashMap<BlockRunId, (PipelineRunId, usize)>,
}

/// In-memory run record store
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RunRecordStore for MemoryRunStore {
    async fn create_pipeline_run(
        &self,
        pipeline_uuid: &str,
        execution_partition: Option<&str>,
    ) -> ServiceResult<PipelineRun> {
        let mut state = self.state.write().await;
        state.next_pipeline_run_id += 1;
        let id = state.next_pipeline_run_id;

        let run = PipelineRun {
            id,
            pipeline_uuid: pipeline_uuid.to_string(),
            status: PipelineRunStatus::Initial,
            execution_partition: execution_partition
                .map(String::from)
                .unwrap_or_else(|| format!("{}/{}", pipeline_uuid, id)),
            created_at: Utc::now(),
            completed_at: None,
        };

        state.pipeline_runs.insert(id, run.clone());
        state.block_runs.entry(id).or_default();
        Ok(run)
    }

    async fn get_pipeline_run(&self, id: PipelineRunId) -> ServiceResult<PipelineRun> {
        let state = self.state.read().await;
        state
            .pipeline_runs
            .get(&id)
            .cloned()
            .ok_or(ServiceError::PipelineRunNotFound(id))
    }

    async fn update_pipeline_run_status(
        &self,
        id: PipelineRunId,
        status: PipelineRunStatus,
    ) -> ServiceResult<PipelineRun> {
        let mut state = self.state.write().await;
        let run = state
            .pipeline_runs
            .get_mut(&id)
            .ok_or(ServiceError::PipelineRunNotFound(id))?;

        run.status = status;
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(run.clone())
    }

    async fn create_block_run(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
        metrics: BlockRunMetrics,
        skip_if_exists: bool,
    ) -> ServiceResult<BlockRunCreation> {
        // One write guard covers the existence check and the insert
        let mut state = self.state.write().await;
        if !state.pipeline_runs.contains_key(&pipeline_run_id) {
            return Err(ServiceError::PipelineRunNotFound(pipeline_run_id));
        }

        if skip_if_exists {
            let existing = state
                .block_runs
                .get(&pipeline_run_id)
                .and_then(|runs| runs.iter().rev().find(|r| r.block_uuid == block_uuid));
            if let Some(existing) = existing {
                return Ok(BlockRunCreation {
                    block_run: existing.clone(),
                    created: false,
                });
            }
        }

        state.next_block_run_id += 1;
        let id = state.next_block_run_id;
        let block_run = BlockRun {
            id,
            pipeline_run_id,
            block_uuid: block_uuid.to_string(),
            status: BlockRunStatus::Initial,
            metrics,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let runs = state.block_runs.entry(pipeline_run_id).or_default();
        runs.push(block_run.clone());
        let position = runs.len() - 1;
        state.locations.insert(id, (pipeline_run_id, position));

        Ok(BlockRunCreation {
            block_run,
            created: true,
        })
    }

    async fn list_block_runs(
        &self,
        pipeline_run_id: PipelineRunId,
    ) -> ServiceResult<Vec<BlockRun>> {
        let state = self.state.read().await;
        if !state.pipeline_runs.contains_key(&pipeline_run_id) {
            return Err(ServiceError::PipelineRunNotFound(pipeline_run_id));
        }
        Ok(state
            .block_runs
            .get(&pipeline_run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        block_run_id: BlockRunId,
        status: BlockRunStatus,
    ) -> ServiceResult<BlockRun> {
        let mut state = self.state.write().await;
        let (pipeline_run_id, position) = *state
            .locations
            .get(&block_run_id)
            .ok_or(ServiceError::BlockRunNotFound(block_run_id))?;

        let run = state
            .block_runs
            .get_mut(&pipeline_run_id)
            .and_then(|runs| runs.get_mut(position))
            .ok_or(ServiceError::BlockRunNotFound(block_run_id))?;

        if !run.status.can_transition_to(status) {
            return Err(ServiceError::InvalidTransition {
                block_uuid: run.block_uuid.clone(),
                from: run.status,
                to: status,
            });
        }

        let now = Utc::now();
        if status == BlockRunStatus::Running {
            run.started_at = Some(now);
        }
        if status.is_terminal() {
            run.completed_at = Some(now);
        }
        run.status = status;

        Ok(run.clone())
    }
}
