// Pipeline Runner
// Control loop that polls the scheduler and dispatches ready block runs to a worker pool

use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::identifier::base_uuid;
use crate::execution::scheduler::DynamicScheduler;
use crate::pipeline::models::Block;
use crate::runs::models::{BlockRun, BlockRunStatus, PipelineRun, PipelineRunId, PipelineRunStatus};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Outcome of executing one block run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Completed,
    /// The block's run condition was not met
    ConditionFailed,
    Failed(String),
}

impl BlockOutcome {
    pub fn status(&self) -> BlockRunStatus {
        match self {
            BlockOutcome::Completed => BlockRunStatus::Completed,
            BlockOutcome::ConditionFailed => BlockRunStatus::ConditionFailed,
            BlockOutcome::Failed(_) => BlockRunStatus::Failed,
        }
    }
}

/// Executes the user code of a block run
///
/// Dynamic blocks are expected to write their items through an output
/// writer for the given partition before returning.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    async fn execute(&self, block: &Block, block_run: &BlockRun, partition: &str) -> BlockOutcome;
}

/// Final state of a pipeline run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub pipeline_run_id: PipelineRunId,
    pub status: PipelineRunStatus,
    pub block_runs: Vec<BlockRun>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.status == PipelineRunStatus::Completed
    }

    /// Block runs with the given status
    pub fn runs_with_status(&self, status: BlockRunStatus) -> impl Iterator<Item = &BlockRun> {
        self.block_runs.iter().filter(move |r| r.status == status)
    }
}

type Finished = (String, ServiceResult<BlockRun>, Duration);

/// Drives one pipeline run to a terminal status
pub struct PipelineRunner {
    scheduler: Arc<DynamicScheduler>,
    executor: Arc<dyn BlockExecutor>,
    event_tx: Option<ProgressSender>,
}

impl PipelineRunner {
    pub fn new(scheduler: Arc<DynamicScheduler>, executor: Arc<dyn BlockExecutor>) -> Self {
        Self {
            scheduler,
            executor,
            event_tx: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn scheduler(&self) -> &Arc<DynamicScheduler> {
        &self.scheduler
    }

    /// Run the pipeline run until it completes, fails, stalls or is cancelled.
    ///
    /// Setting the watch value to `true` cancels the run: no further block
    /// runs are dispatched, and in-flight ones are awaited but not killed.
    pub async fn run(
        &self,
        pipeline_run_id: PipelineRunId,
        mut cancel: watch::Receiver<bool>,
    ) -> ServiceResult<RunSummary> {
        let start = Instant::now();
        let store = self.scheduler.store().clone();

        let pipeline_run = store.get_pipeline_run(pipeline_run_id).await?;
        if pipeline_run.status.is_terminal() {
            return self.summary(pipeline_run_id, pipeline_run.status, start).await;
        }

        store
            .update_pipeline_run_status(pipeline_run_id, PipelineRunStatus::Running)
            .await?;
        tracing::info!(
            pipeline_run_id,
            pipeline = %pipeline_run.pipeline_uuid,
            partition = %pipeline_run.execution_partition,
            "pipeline run started"
        );
        self.event_tx.send_event(ExecutionEvent::pipeline_run_started(
            pipeline_run_id,
            &pipeline_run.pipeline_uuid,
            self.scheduler.graph().len(),
        ));

        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let result = self
            .dispatch(&pipeline_run, &mut cancel, &mut in_flight)
            .await;
        // every exit waits for executing block runs, errors included
        drain(&mut in_flight, &self.event_tx).await;
        let status = result?;

        if status != PipelineRunStatus::Cancelled {
            store
                .update_pipeline_run_status(pipeline_run_id, status)
                .await?;
        }

        let summary = self.summary(pipeline_run_id, status, start).await?;
        tracing::info!(
            pipeline_run_id,
            status = %summary.status,
            block_runs = summary.block_runs.len(),
            "pipeline run finished"
        );
        self.event_tx.send_event(ExecutionEvent::pipeline_run_finished(
            pipeline_run_id,
            summary.status,
            summary.duration,
        ));
        Ok(summary)
    }

    /// Dispatch ready block runs until the pipeline run reaches a status.
    /// Block runs still executing when this returns are left in `in_flight`.
    async fn dispatch(
        &self,
        pipeline_run: &PipelineRun,
        cancel: &mut watch::Receiver<bool>,
        in_flight: &mut JoinSet<Finished>,
    ) -> ServiceResult<PipelineRunStatus> {
        let pipeline_run_id = pipeline_run.id;
        let store = self.scheduler.store().clone();
        let config = self.scheduler.config().clone();
        let semaphore = (config.max_parallel_runs > 0)
            .then(|| Arc::new(Semaphore::new(config.max_parallel_runs)));

        loop {
            if *cancel.borrow() {
                self.scheduler.cancel_pipeline_run(pipeline_run_id).await?;
                return Ok(PipelineRunStatus::Cancelled);
            }

            let outcome = match self.scheduler.tick(pipeline_run_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(pipeline_run_id, error = %e, "scheduling tick failed");
                    if e.is_configuration_error() {
                        store
                            .update_pipeline_run_status(pipeline_run_id, PipelineRunStatus::Failed)
                            .await?;
                    }
                    return Err(e);
                }
            };
            if outcome.pipeline_status.is_terminal() {
                // cancelled or finished by another caller
                return Ok(outcome.pipeline_status);
            }

            for block_run in outcome.ready {
                let block = match self.scheduler.graph().block(base_uuid(&block_run.block_uuid)) {
                    Some(block) => block.clone(),
                    None => return Err(ServiceError::UnknownBlock(block_run.block_uuid.clone())),
                };

                let permit = match &semaphore {
                    Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                    None => None,
                };

                let claimed = store
                    .update_status(block_run.id, BlockRunStatus::Running)
                    .await?;
                tracing::debug!(block_run = %claimed.block_uuid, "dispatching block run");
                self.event_tx
                    .send_event(ExecutionEvent::block_run_started(&claimed.block_uuid));

                let executor = self.executor.clone();
                let store = store.clone();
                let partition = pipeline_run.execution_partition.clone();

                in_flight.spawn(async move {
                    let _permit = permit;
                    let started = Instant::now();
                    let outcome = executor.execute(&block, &claimed, &partition).await;
                    if let BlockOutcome::Failed(message) = &outcome {
                        tracing::warn!(block_run = %claimed.block_uuid, %message, "block run failed");
                    }
                    let finished = store.update_status(claimed.id, outcome.status()).await;
                    (claimed.block_uuid, finished, started.elapsed())
                });
            }

            if !in_flight.is_empty() {
                tokio::select! {
                    Some(joined) = in_flight.join_next() => {
                        record(joined, &self.event_tx);
                    }
                    _ = cancelled(cancel) => {}
                    _ = tokio::time::sleep(config.tick_interval()) => {}
                }
                continue;
            }

            if outcome.complete {
                return Ok(PipelineRunStatus::Completed);
            }

            // an unmet condition blocks its downstream runs like a failure
            let runs = store.list_block_runs(pipeline_run_id).await?;
            if let Some(failed) = runs.iter().find(|r| {
                matches!(
                    r.status,
                    BlockRunStatus::Failed
                        | BlockRunStatus::ConditionFailed
                        | BlockRunStatus::Cancelled
                )
            }) {
                tracing::warn!(
                    pipeline_run_id,
                    block_run = %failed.block_uuid,
                    status = %failed.status,
                    "pipeline run cannot complete"
                );
                return Ok(PipelineRunStatus::Failed);
            }

            match outcome.poll_after {
                Some(delay) => {
                    tracing::debug!(pipeline_run_id, ?delay, "waiting for streaming sources");
                    tokio::select! {
                        _ = cancelled(cancel) => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    store
                        .update_pipeline_run_status(pipeline_run_id, PipelineRunStatus::Failed)
                        .await?;
                    let reason = "no block run is ready or running and the pipeline is incomplete";
                    tracing::error!(pipeline_run_id, reason, "pipeline run stalled");
                    self.event_tx.send_event(ExecutionEvent::error(
                        format!("Pipeline run {} stalled: {}", pipeline_run_id, reason),
                        None,
                    ));
                    return Err(ServiceError::Stalled {
                        pipeline_run_id,
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    async fn summary(
        &self,
        pipeline_run_id: PipelineRunId,
        status: PipelineRunStatus,
        start: Instant,
    ) -> ServiceResult<RunSummary> {
        let block_runs = self
            .scheduler
            .store()
            .list_block_runs(pipeline_run_id)
            .await?;
        Ok(RunSummary {
            pipeline_run_id,
            status,
            block_runs,
            duration: start.elapsed(),
        })
    }
}

/// Resolves once the watch value is `true`; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn record(joined: Result<Finished, tokio::task::JoinError>, event_tx: &Option<ProgressSender>) {
    match joined {
        Ok((_, Ok(run), duration)) => {
            tracing::debug!(block_run = %run.block_uuid, status = %run.status, "block run finished");
            event_tx.send_event(ExecutionEvent::block_run_finished(
                &run.block_uuid,
                run.status,
                duration,
            ));
        }
        // cancelled while executing
        Ok((block_uuid, Err(ServiceError::InvalidTransition { .. }), _)) => {
            tracing::debug!(block_run = %block_uuid, "block run finished after cancellation");
        }
        Ok((block_uuid, Err(e), _)) => {
            tracing::error!(block_run = %block_uuid, error = %e, "failed to record block run outcome");
            event_tx.send_event(ExecutionEvent::error(e.to_string(), Some(block_uuid)));
        }
        Err(e) => {
            tracing::error!(error = %e, "block executor task panicked");
        }
    }
}

async fn drain(in_flight: &mut JoinSet<Finished>, event_tx: &Option<ProgressSender>) {
    while let Some(joined) = in_flight.join_next().await {
        record(joined, event_tx);
    }
}
