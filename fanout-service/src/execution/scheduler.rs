// Executable-Run Scheduler
// Materializes fan-out and computes the block runs that are safe to execute next

use crate::config::SchedulerConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::cache::TickCache;
use crate::execution::child::{compare_positions, restrict, DynamicChildFactory};
use crate::execution::completion::{CompletionDetector, CompletionStatus};
use crate::execution::counter::DynamicItemCounter;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::factory::{create_run, DynamicBlockFactory};
use crate::execution::graph::BlockGraph;
use crate::outputs::OutputReader;
use crate::pipeline::models::Block;
use crate::runs::models::{
    BlockRun, BlockRunMetrics, BlockRunStatus, PipelineRun, PipelineRunId, PipelineRunStatus,
};
use crate::runs::store::RunRecordStore;

use std::sync::Arc;
use std::time::Duration;

/// Result of one scheduling tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Status of the pipeline run when the tick started
    pub pipeline_status: PipelineRunStatus,
    /// Block runs eligible to execute now, in topological then position order
    pub ready: Vec<BlockRun>,
    /// Block runs created during the tick
    pub materialized: usize,
    /// Every block has settled and all of its runs are COMPLETED
    pub complete: bool,
    /// Shortest poll interval among streaming blocks still waiting for items
    pub poll_after: Option<Duration>,
}

/// Drives fan-out materialization and readiness for pipeline runs of one graph
pub struct DynamicScheduler {
    graph: Arc<BlockGraph>,
    store: Arc<dyn RunRecordStore>,
    outputs: Arc<dyn OutputReader>,
    config: SchedulerConfig,
    event_tx: Option<ProgressSender>,
}

impl DynamicScheduler {
    pub fn new(
        graph: Arc<BlockGraph>,
        store: Arc<dyn RunRecordStore>,
        outputs: Arc<dyn OutputReader>,
    ) -> Self {
        Self {
            graph,
            store,
            outputs,
            config: SchedulerConfig::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn graph(&self) -> &Arc<BlockGraph> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn RunRecordStore> {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn block(&self, block_uuid: &str) -> ServiceResult<&Block> {
        self.graph
            .block(block_uuid)
            .ok_or_else(|| ServiceError::UnknownBlock(block_uuid.to_string()))
    }

    fn detector(&self) -> CompletionDetector<'_> {
        CompletionDetector::new(&self.graph, self.outputs.as_ref()).with_progress(self.event_tx.clone())
    }

    async fn load(&self, pipeline_run_id: PipelineRunId) -> ServiceResult<TickCache> {
        TickCache::load(self.store.as_ref(), pipeline_run_id).await
    }

    /// Items the block has produced so far as a fan-out source; `0` for
    /// blocks that are neither dynamic nor fanned out
    pub async fn calculate_item_count(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
    ) -> ServiceResult<usize> {
        let block = self.block(block_uuid)?;
        let Some(counter) = DynamicItemCounter::for_upstream(block, block.is_streaming()) else {
            return Ok(0);
        };

        let mut cache = self.load(pipeline_run_id).await?;
        counter.item_count(&mut cache, self.outputs.as_ref()).await
    }

    /// Create the block runs for the block's currently known fan-out.
    ///
    /// Returns only the runs created by this call; repeated calls against
    /// unchanged state return an empty list.
    pub async fn materialize_fanout(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
    ) -> ServiceResult<Vec<BlockRun>> {
        let block = self.block(block_uuid)?;
        let mut cache = self.load(pipeline_run_id).await?;
        if cache.pipeline_run().status.is_terminal() {
            return Ok(Vec::new());
        }
        self.materialize_in(&mut cache, block).await
    }

    /// Completion status of a block without suspending
    pub async fn check_completion(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
    ) -> ServiceResult<CompletionStatus> {
        let block = self.block(block_uuid)?;
        let mut cache = self.load(pipeline_run_id).await?;
        self.detector().check(&mut cache, block).await
    }

    /// Whether the block's fan-out is finished. Suspends for the block's
    /// poll interval when a streaming block is still pending.
    pub async fn is_complete(
        &self,
        pipeline_run_id: PipelineRunId,
        block_uuid: &str,
    ) -> ServiceResult<bool> {
        let block = self.block(block_uuid)?;
        let mut cache = self.load(pipeline_run_id).await?;
        self.detector()
            .is_complete(&mut cache, block, self.config.poll_interval())
            .await
    }

    /// Next batch of block runs eligible to execute
    pub async fn executable_block_runs(
        &self,
        pipeline_run_id: PipelineRunId,
    ) -> ServiceResult<Vec<BlockRun>> {
        Ok(self.tick(pipeline_run_id).await?.ready)
    }

    /// One scheduling pass over the graph in topological order: materialize
    /// each block's fan-out, then collect its INITIAL runs whose inputs are
    /// COMPLETED.
    pub async fn tick(&self, pipeline_run_id: PipelineRunId) -> ServiceResult<TickOutcome> {
        let mut cache = self.load(pipeline_run_id).await?;
        let pipeline_status = cache.pipeline_run().status;

        let mut outcome = TickOutcome {
            pipeline_status,
            ready: Vec::new(),
            materialized: 0,
            complete: false,
            poll_after: None,
        };
        if pipeline_status.is_terminal() {
            return Ok(outcome);
        }

        let detector = self.detector();
        let mut complete = true;

        for block in self.graph.topological_order() {
            outcome.materialized += self.materialize_in(&mut cache, block).await?.len();

            for run in self.runs_of(&cache, block) {
                if run.status == BlockRunStatus::Initial
                    && self.is_ready(&detector, &mut cache, block, &run).await?
                {
                    outcome.ready.push(run);
                }
            }

            let state = detector.fanout_state(&mut cache, &block.uuid).await?;
            if state.complete {
                continue;
            }
            complete = false;

            if block.is_streaming() && !state.settled {
                let status = detector.check(&mut cache, block).await?;
                if !status.is_complete() {
                    let interval = block.poll_interval(self.config.poll_interval());
                    outcome.poll_after = Some(
                        outcome
                            .poll_after
                            .map_or(interval, |current| current.min(interval)),
                    );
                }
            }
        }

        outcome.complete = complete;
        tracing::debug!(
            pipeline_run_id,
            ready = outcome.ready.len(),
            materialized = outcome.materialized,
            complete = outcome.complete,
            "scheduler tick"
        );
        Ok(outcome)
    }

    /// Cancel the pipeline run and every block run that has not finished.
    /// In-flight executions are not interrupted.
    pub async fn cancel_pipeline_run(
        &self,
        pipeline_run_id: PipelineRunId,
    ) -> ServiceResult<PipelineRun> {
        let pipeline_run = self.store.get_pipeline_run(pipeline_run_id).await?;
        if pipeline_run.status.is_terminal() {
            return Ok(pipeline_run);
        }

        let pipeline_run = self
            .store
            .update_pipeline_run_status(pipeline_run_id, PipelineRunStatus::Cancelled)
            .await?;

        let mut cancelled = 0;
        for run in self.store.list_block_runs(pipeline_run_id).await? {
            if run.status.is_terminal() {
                continue;
            }
            match self
                .store
                .update_status(run.id, BlockRunStatus::Cancelled)
                .await
            {
                Ok(_) => cancelled += 1,
                // finished between the listing and the update
                Err(ServiceError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(pipeline_run_id, cancelled, "pipeline run cancelled");
        self.event_tx.send_event(ExecutionEvent::info(
            format!("Pipeline run {} cancelled", pipeline_run_id),
            None,
        ));
        Ok(pipeline_run)
    }

    /// Create the runs for a block: the base run for plain blocks, the
    /// incremental factory or the cross-product factory for fanned-out ones
    async fn materialize_in(&self, cache: &mut TickCache, block: &Block) -> ServiceResult<Vec<BlockRun>> {
        let created: Vec<BlockRun> = if !block.is_dynamic_child {
            if cache.run(&block.uuid).is_some() {
                return Ok(Vec::new());
            }
            create_run(
                self.store.as_ref(),
                cache,
                block.uuid.clone(),
                BlockRunMetrics::default(),
            )
            .await?
            .into_iter()
            .collect()
        } else if block.is_incremental() {
            DynamicBlockFactory::new(&self.graph, block)
                .materialize(cache, self.outputs.as_ref(), self.store.as_ref())
                .await?
        } else {
            DynamicChildFactory::new(&self.graph, block)
                .with_warning_threshold(self.config.combination_warning_threshold)
                .materialize(cache, self.outputs.as_ref(), self.store.as_ref())
                .await?
        };

        if !created.is_empty() {
            self.event_tx.send_event(ExecutionEvent::block_runs_materialized(
                &block.uuid,
                created.iter().map(|run| run.block_uuid.clone()).collect(),
            ));
        }
        Ok(created)
    }

    /// Runs of a block in position order
    fn runs_of(&self, cache: &TickCache, block: &Block) -> Vec<BlockRun> {
        if !block.is_dynamic_child {
            return cache.run(&block.uuid).cloned().into_iter().collect();
        }

        let schema = self.graph.position_schema(&block.uuid);
        let mut runs: Vec<BlockRun> = cache.clones(&block.uuid).into_iter().cloned().collect();
        runs.sort_by(|a, b| compare_positions(a, b, schema));
        runs
    }

    async fn is_ready(
        &self,
        detector: &CompletionDetector<'_>,
        cache: &mut TickCache,
        block: &Block,
        run: &BlockRun,
    ) -> ServiceResult<bool> {
        let upstreams: Vec<&Block> = self.graph.upstreams(block).collect();

        // Plain blocks and reducers wait for every instance of fanned-out upstreams
        if !block.is_dynamic_child {
            for upstream in upstreams {
                if !detector.fanout_state(cache, &upstream.uuid).await?.complete {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        let position = &run.metrics.dynamic_block_indexes;
        for upstream in upstreams {
            let is_source = upstream.is_dynamic || upstream.is_dynamic_child;
            if block.is_incremental() && is_source {
                // streaming instances run while their sources are still producing
                if !block.is_streaming()
                    && !detector.fanout_state(cache, &upstream.uuid).await?.complete
                {
                    return Ok(false);
                }
                continue;
            }

            let input = if upstream.is_dynamic_child {
                let key = restrict(position, self.graph.position_schema(&upstream.uuid));
                cache.instance_at(&upstream.uuid, &key)
            } else {
                cache.run(&upstream.uuid)
            };
            if !input.map(|r| r.is_completed()).unwrap_or(false) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{DynamicOutput, MemoryOutputStore};
    use crate::pipeline::models::{BlockDefinition, FanoutConfig, Pipeline};
    use crate::runs::store::MemoryRunStore;
    use serde_json::json;

    struct Harness {
        scheduler: DynamicScheduler,
        store: MemoryRunStore,
        outputs: MemoryOutputStore,
        run: PipelineRun,
    }

    impl Harness {
        async fn new(pipeline: Pipeline) -> Self {
            let graph = Arc::new(BlockGraph::from_pipeline(&pipeline).unwrap());
            let store = MemoryRunStore::new();
            let outputs = MemoryOutputStore::new();
            let run = store.create_pipeline_run(&pipeline.uuid, None).await.unwrap();
            let scheduler = DynamicScheduler::new(
                graph,
                Arc::new(store.clone()),
                Arc::new(outputs.clone()),
            );
            Self {
                scheduler,
                store,
                outputs,
                run,
            }
        }

        async fn ready(&self) -> Vec<String> {
            self.scheduler
                .executable_block_runs(self.run.id)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.block_uuid)
                .collect()
        }

        async fn items(&self, block_uuid: &str, n: usize) {
            self.outputs
                .write(
                    block_uuid,
                    &self.run.execution_partition,
                    DynamicOutput::new((0..n).map(|i| json!(i)).collect()),
                )
                .await;
        }

        async fn find(&self, block_uuid: &str) -> BlockRun {
            self.store
                .list_block_runs(self.run.id)
                .await
                .unwrap()
                .into_iter()
                .find(|r| r.block_uuid == block_uuid)
                .unwrap()
        }

        async fn complete(&self, block_uuid: &str) {
            let run = self.find(block_uuid).await;
            self.store
                .update_status(run.id, BlockRunStatus::Running)
                .await
                .unwrap();
            self.store
                .update_status(run.id, BlockRunStatus::Completed)
                .await
                .unwrap();
        }

        async fn count(&self, base: &str) -> usize {
            self.store
                .list_block_runs(self.run.id)
                .await
                .unwrap()
                .iter()
                .filter(|r| crate::execution::identifier::base_uuid(&r.block_uuid) == base)
                .count()
        }
    }

    fn readiness_pipeline() -> Pipeline {
        Pipeline::new("readiness")
            .with_block(BlockDefinition::new("block1"))
            .with_block(BlockDefinition::new("dynamic1").upstream(&["block1"]).dynamic())
            .with_block(BlockDefinition::new("dynamic1_child1a").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("dynamic1_child2a").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("block2"))
            .with_block(BlockDefinition::new("dynamic2").upstream(&["block2"]).dynamic())
            .with_block(BlockDefinition::new("dynamic2_child").upstream(&["dynamic2"]))
            .with_block(BlockDefinition::new("dynamic2_grandchild").upstream(&["dynamic2_child"]))
    }

    #[tokio::test]
    async fn test_roots_ready_first() {
        let h = Harness::new(readiness_pipeline()).await;
        assert_eq!(h.ready().await, vec!["block1", "block2"]);
        // unchanged state returns the same batch
        assert_eq!(h.ready().await, vec!["block1", "block2"]);
    }

    #[tokio::test]
    async fn test_readiness_follows_completed_dynamic_source() {
        let h = Harness::new(readiness_pipeline()).await;
        h.ready().await;
        h.complete("block1").await;
        h.complete("block2").await;
        assert_eq!(h.ready().await, vec!["dynamic1", "dynamic2"]);

        h.items("dynamic1", 2).await;
        h.complete("dynamic1").await;

        assert_eq!(
            h.ready().await,
            vec![
                "dynamic2",
                "dynamic1_child1a:0",
                "dynamic1_child1a:1",
                "dynamic1_child2a:0",
                "dynamic1_child2a:1"
            ]
        );
        assert_eq!(h.count("dynamic2_child").await, 0);
        assert_eq!(h.count("dynamic2_grandchild").await, 0);

        h.items("dynamic2", 1).await;
        h.complete("dynamic2").await;
        let ready = h.ready().await;
        assert!(ready.contains(&"dynamic2_child:0".to_string()));
        assert!(!ready.iter().any(|uuid| uuid.starts_with("dynamic2_grandchild")));

        h.complete("dynamic2_child:0").await;
        assert!(h
            .ready()
            .await
            .contains(&"dynamic2_grandchild:0".to_string()));
    }

    #[tokio::test]
    async fn test_running_runs_are_not_returned() {
        let h = Harness::new(readiness_pipeline()).await;
        h.ready().await;
        let block1 = h.find("block1").await;
        h.store
            .update_status(block1.id, BlockRunStatus::Running)
            .await
            .unwrap();
        assert_eq!(h.ready().await, vec!["block2"]);
    }

    #[tokio::test]
    async fn test_reduce_waits_for_every_instance() {
        let pipeline = Pipeline::new("reduce")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("collect").upstream(&["child"]).reduce_output());
        let h = Harness::new(pipeline).await;

        h.ready().await;
        h.items("dynamic1", 3).await;
        h.complete("dynamic1").await;
        assert_eq!(h.ready().await, vec!["child:0", "child:1", "child:2"]);

        h.complete("child:0").await;
        h.complete("child:2").await;
        assert_eq!(h.ready().await, vec!["child:1"]);

        h.complete("child:1").await;
        assert_eq!(h.ready().await, vec!["collect"]);
        assert_eq!(h.count("collect").await, 1);
    }

    #[tokio::test]
    async fn test_reduce_over_empty_fanout() {
        let pipeline = Pipeline::new("reduce")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("collect").upstream(&["child"]).reduce_output());
        let h = Harness::new(pipeline).await;

        h.ready().await;
        h.items("dynamic1", 0).await;
        h.complete("dynamic1").await;

        assert_eq!(h.ready().await, vec!["collect"]);
        assert_eq!(h.count("child").await, 0);
    }

    #[tokio::test]
    async fn test_cancel_returns_empty_batch() {
        let h = Harness::new(readiness_pipeline()).await;
        assert!(!h.ready().await.is_empty());

        let cancelled = h.scheduler.cancel_pipeline_run(h.run.id).await.unwrap();
        assert_eq!(cancelled.status, PipelineRunStatus::Cancelled);
        assert!(h.ready().await.is_empty());

        let runs = h.store.list_block_runs(h.run.id).await.unwrap();
        assert!(runs.iter().all(|r| r.status == BlockRunStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_instance_is_not_mirrored() {
        let pipeline = Pipeline::new("cancel")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("grandchild").upstream(&["child"]));
        let h = Harness::new(pipeline).await;

        h.ready().await;
        h.items("dynamic1", 2).await;
        h.complete("dynamic1").await;
        h.scheduler.materialize_fanout(h.run.id, "child").await.unwrap();

        let run = h.find("child:1").await;
        h.store
            .update_status(run.id, BlockRunStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(h.ready().await, vec!["child:0"]);
        assert_eq!(h.count("grandchild").await, 1);

        h.complete("child:0").await;
        assert_eq!(h.ready().await, vec!["grandchild:0"]);
    }

    #[tokio::test]
    async fn test_replica_runs_after_its_upstream_at_replicated_positions() {
        let pipeline = Pipeline::new("replica")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("collect").upstream(&["child"]).reduce_output())
            .with_block(
                BlockDefinition::new("mirror")
                    .upstream(&["collect"])
                    .replica_of("child"),
            );
        let h = Harness::new(pipeline).await;

        assert_eq!(h.ready().await, vec!["dynamic1"]);
        h.items("dynamic1", 2).await;
        h.complete("dynamic1").await;

        // one replica per instance, held back by its own upstream
        assert_eq!(h.ready().await, vec!["child:0", "child:1"]);
        assert_eq!(h.count("mirror").await, 2);

        h.complete("child:0").await;
        h.complete("child:1").await;
        assert_eq!(h.ready().await, vec!["collect"]);

        h.complete("collect").await;
        assert_eq!(h.ready().await, vec!["mirror:0", "mirror:1"]);

        for i in 0..2 {
            let child = h.find(&format!("child:{i}")).await;
            let mirror = h.find(&format!("mirror:{i}")).await;
            assert_eq!(
                mirror.metrics.dynamic_block_indexes,
                child.metrics.dynamic_block_indexes
            );
        }
    }

    #[tokio::test]
    async fn test_materialize_fanout_is_idempotent() {
        let pipeline = Pipeline::new("fan_out")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]));
        let h = Harness::new(pipeline).await;

        h.ready().await;
        h.items("dynamic1", 4).await;
        h.complete("dynamic1").await;

        let created = h.scheduler.materialize_fanout(h.run.id, "child").await.unwrap();
        assert_eq!(created.len(), 4);
        assert!(h
            .scheduler
            .materialize_fanout(h.run.id, "child")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(h.count("child").await, 4);
    }

    #[tokio::test]
    async fn test_calculate_item_count() {
        let pipeline = Pipeline::new("fan_out")
            .with_block(BlockDefinition::new("dynamic1").dynamic())
            .with_block(BlockDefinition::new("child").upstream(&["dynamic1"]))
            .with_block(BlockDefinition::new("plain"));
        let h = Harness::new(pipeline).await;

        assert_eq!(h.scheduler.calculate_item_count(h.run.id, "dynamic1").await.unwrap(), 0);

        h.ready().await;
        h.items("dynamic1", 2).await;
        h.complete("dynamic1").await;
        h.ready().await;
        assert_eq!(h.scheduler.calculate_item_count(h.run.id, "dynamic1").await.unwrap(), 2);
        assert_eq!(h.scheduler.calculate_item_count(h.run.id, "child").await.unwrap(), 0);

        h.complete("child:1").await;
        assert_eq!(h.scheduler.calculate_item_count(h.run.id, "child").await.unwrap(), 1);
        assert_eq!(h.scheduler.calculate_item_count(h.run.id, "plain").await.unwrap(), 0);

        let err = h
            .scheduler
            .calculate_item_count(h.run.id, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownBlock(_)));
    }

    #[tokio::test]
    async fn test_misconfigured_dynamic_child_is_surfaced() {
        let pipeline = Pipeline::new("broken")
            .with_block(BlockDefinition::new("plain"))
            .with_block(
                BlockDefinition::new("orphan")
                    .upstream(&["plain"])
                    .dynamic_child(true),
            );
        let h = Harness::new(pipeline).await;

        let err = h
            .scheduler
            .executable_block_runs(h.run.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingDynamicAncestor(_)));
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_streaming_consumer_runs_while_source_runs() {
        let pipeline = Pipeline::new("stream")
            .with_block(BlockDefinition::new("source").dynamic())
            .with_block(
                BlockDefinition::new("consumer")
                    .upstream(&["source"])
                    .fanout(FanoutConfig::streaming(5)),
            );
        let h = Harness::new(pipeline).await;
        assert_eq!(h.ready().await, vec!["source"]);

        let source = h.find("source").await;
        h.store
            .update_status(source.id, BlockRunStatus::Running)
            .await
            .unwrap();
        h.outputs
            .append("source", &h.run.execution_partition, json!("a"), None)
            .await;

        let outcome = h.scheduler.tick(h.run.id).await.unwrap();
        let ready: Vec<&str> = outcome.ready.iter().map(|r| r.block_uuid.as_str()).collect();
        assert_eq!(ready, vec!["consumer:0"]);
        assert_eq!(outcome.poll_after, Some(Duration::from_secs(5)));
        assert!(!outcome.complete);
    }

    #[tokio::test]
    async fn test_incremental_consumer_waits_for_source() {
        let pipeline = Pipeline::new("batch")
            .with_block(BlockDefinition::new("source").dynamic())
            .with_block(
                BlockDefinition::new("consumer")
                    .upstream(&["source"])
                    .fanout(FanoutConfig::incremental()),
            );
        let h = Harness::new(pipeline).await;
        h.ready().await;
        h.items("source", 2).await;

        // instances exist but wait for the source to finish
        assert_eq!(h.ready().await, vec!["source"]);
        assert_eq!(h.count("consumer").await, 2);

        h.complete("source").await;
        assert_eq!(h.ready().await, vec!["consumer:0", "consumer:1"]);
    }
}
