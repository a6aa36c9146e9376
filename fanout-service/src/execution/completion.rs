// Completion Detector
// Decides whether a fanned-out block has exhausted its fan-out

use crate::error::{ServiceError, ServiceResult};
use crate::execution::cache::{FanoutState, TickCache};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::factory::DynamicBlockFactory;
use crate::execution::graph::BlockGraph;
use crate::outputs::OutputReader;
use crate::pipeline::models::Block;

use std::time::Duration;

/// Result of a completion check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Complete,
    Pending {
        /// Every upstream the block depends on has completed
        upstream_complete: bool,
        completed: usize,
        target: usize,
    },
}

impl CompletionStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, CompletionStatus::Complete)
    }
}

pub struct CompletionDetector<'a> {
    graph: &'a BlockGraph,
    reader: &'a dyn OutputReader,
    event_tx: Option<ProgressSender>,
}

impl<'a> CompletionDetector<'a> {
    pub fn new(graph: &'a BlockGraph, reader: &'a dyn OutputReader) -> Self {
        Self {
            graph,
            reader,
            event_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Settled/complete state of a block, evaluating its ancestors first.
    ///
    /// Results are memoized in the tick cache; runs inserted for a block
    /// drop its memo.
    pub async fn fanout_state(
        &self,
        cache: &mut TickCache,
        block_uuid: &str,
    ) -> ServiceResult<FanoutState> {
        if let Some(state) = cache.fanout_state(block_uuid) {
            return Ok(state);
        }

        let ancestors = self.graph.ancestors(block_uuid);
        for block in self.graph.topological_order() {
            let relevant = block.uuid == block_uuid || ancestors.contains(&block.uuid);
            if relevant && cache.fanout_state(&block.uuid).is_none() {
                let state = self.evaluate(cache, block).await?;
                cache.remember_fanout_state(&block.uuid, state);
            }
        }

        cache
            .fanout_state(block_uuid)
            .ok_or_else(|| ServiceError::UnknownBlock(block_uuid.to_string()))
    }

    /// Evaluate one block; its ancestors must already be memoized
    async fn evaluate(&self, cache: &mut TickCache, block: &Block) -> ServiceResult<FanoutState> {
        if !block.is_dynamic_child {
            return Ok(FanoutState {
                settled: true,
                complete: base_completed(cache, &block.uuid),
            });
        }

        let mut settled = self.upstreams_ready(cache, block);
        if settled && block.is_incremental() {
            let target = self.target(cache, block).await?;
            settled = cache.clones(&block.uuid).len() >= target;
        }

        let complete = settled
            && cache
                .clones(&block.uuid)
                .iter()
                .all(|run| run.is_completed());

        Ok(FanoutState { settled, complete })
    }

    /// Whether the inputs that determine the block's instances are final
    fn upstreams_ready(&self, cache: &TickCache, block: &Block) -> bool {
        let memo = |uuid: &str| cache.fanout_state(uuid).unwrap_or(FanoutState {
            settled: false,
            complete: false,
        });

        if !block.is_dynamic_child || block.is_incremental() {
            return self.graph.upstreams(block).all(|upstream| {
                if upstream.is_dynamic_child {
                    memo(&upstream.uuid).complete
                } else {
                    base_completed(cache, &upstream.uuid)
                }
            });
        }

        if let Some(replica) = block
            .replicated_block
            .as_deref()
            .filter(|uuid| self.graph.is_fanned(uuid))
        {
            return memo(replica).settled;
        }

        self.graph.upstreams(block).all(|upstream| {
            if upstream.is_dynamic_child {
                let state = memo(&upstream.uuid);
                state.settled && (!upstream.is_dynamic || state.complete)
            } else if upstream.is_dynamic {
                base_completed(cache, &upstream.uuid)
            } else {
                true
            }
        })
    }

    /// Number of instances the block is expected to reach
    pub async fn target(&self, cache: &mut TickCache, block: &Block) -> ServiceResult<usize> {
        if !block.is_dynamic_child {
            Ok(1)
        } else if block.is_incremental() {
            DynamicBlockFactory::new(self.graph, block)
                .target(cache, self.reader)
                .await
        } else {
            Ok(cache.clones(&block.uuid).len())
        }
    }

    /// Check completion without suspending.
    ///
    /// Upstream completion is checked first and the item target is read
    /// afterwards, bypassing memoized outputs, so a target snapshot taken
    /// before the upstreams finished is never used.
    pub async fn check(&self, cache: &mut TickCache, block: &Block) -> ServiceResult<CompletionStatus> {
        self.fanout_state(cache, &block.uuid).await?;
        let upstream_complete = self.upstreams_ready(cache, block);

        cache.clear_outputs();
        let target = self.target(cache, block).await?;
        let completed = if block.is_dynamic_child {
            cache
                .clones(&block.uuid)
                .iter()
                .filter(|run| run.is_completed())
                .count()
        } else {
            usize::from(base_completed(cache, &block.uuid))
        };

        if block.is_dynamic_child {
            tracing::info!(
                block = %block.uuid,
                "{}/{} dynamic child blocks completed",
                completed,
                target
            );
            self.event_tx.send_event(ExecutionEvent::fanout_progress(
                &block.uuid,
                completed,
                target,
            ));
        }

        if upstream_complete && completed >= target {
            Ok(CompletionStatus::Complete)
        } else {
            Ok(CompletionStatus::Pending {
                upstream_complete,
                completed,
                target,
            })
        }
    }

    /// Check completion, suspending for the poll interval when a streaming
    /// block is still pending so the next check sees a possibly grown target.
    ///
    /// The cache is a snapshot, so no store lock is held while suspended.
    pub async fn is_complete(
        &self,
        cache: &mut TickCache,
        block: &Block,
        default_poll_interval: Duration,
    ) -> ServiceResult<bool> {
        if self.check(cache, block).await?.is_complete() {
            return Ok(true);
        }

        if block.is_streaming() {
            let interval = block.poll_interval(default_poll_interval);
            tracing::debug!(block = %block.uuid, ?interval, "waiting for more items");
            tokio::time::sleep(interval).await;
        }
        Ok(false)
    }
}

fn base_completed(cache: &TickCache, block_uuid: &str) -> bool {
    cache
        .run(block_uuid)
        .map(|run| run.is_completed())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{DynamicOutput, MemoryOutputStore};
    use crate::pipeline::models::{BlockDefinition, FanoutConfig, Pipeline};
    use crate::runs::models::{BlockRunMetrics, BlockRunStatus, PipelineRun};
    use crate::runs::store::{MemoryRunStore, RunRecordStore};
    use serde_json::json;

    struct Fixture {
        graph: BlockGraph,
        store: MemoryRunStore,
        reader: MemoryOutputStore,
        run: PipelineRun,
    }

    async fn fixture(fanout: FanoutConfig) -> Fixture {
        let pipeline = Pipeline::new("stream")
            .with_block(BlockDefinition::new("source").dynamic())
            .with_block(BlockDefinition::new("consumer").upstream(&["source"]).fanout(fanout));
        let store = MemoryRunStore::new();
        let run = store.create_pipeline_run("stream", None).await.unwrap();
        Fixture {
            graph: BlockGraph::from_pipeline(&pipeline).unwrap(),
            store,
            reader: MemoryOutputStore::new(),
            run,
        }
    }

    async fn create(store: &MemoryRunStore, run: &PipelineRun, uuid: &str, index: Option<usize>) -> u64 {
        let metrics = BlockRunMetrics {
            dynamic_block_index: index,
            dynamic_block_indexes: index
                .map(|i| [("consumer".to_string(), i)].into_iter().collect())
                .unwrap_or_default(),
            ..Default::default()
        };
        store
            .create_block_run(run.id, uuid, metrics, true)
            .await
            .unwrap()
            .block_run
            .id
    }

    async fn finish(store: &MemoryRunStore, id: u64) {
        store.update_status(id, BlockRunStatus::Running).await.unwrap();
        store.update_status(id, BlockRunStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_until_clones_reach_target() {
        let f = fixture(FanoutConfig::incremental()).await;
        let source = create(&f.store, &f.run, "source", None).await;
        finish(&f.store, source).await;
        f.reader
            .write("source", &f.run.execution_partition, DynamicOutput::new(vec![json!(1), json!(2)]))
            .await;

        let first = create(&f.store, &f.run, "consumer:0", Some(0)).await;
        let second = create(&f.store, &f.run, "consumer:1", Some(1)).await;
        finish(&f.store, first).await;

        let detector = CompletionDetector::new(&f.graph, &f.reader);
        let consumer = f.graph.block("consumer").unwrap();

        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();
        assert_eq!(
            detector.check(&mut cache, consumer).await.unwrap(),
            CompletionStatus::Pending {
                upstream_complete: true,
                completed: 1,
                target: 2
            }
        );

        finish(&f.store, second).await;
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();
        assert!(detector.check(&mut cache, consumer).await.unwrap().is_complete());
        assert!(detector.fanout_state(&mut cache, "consumer").await.unwrap().complete);
    }

    #[tokio::test]
    async fn test_upstream_must_complete() {
        let f = fixture(FanoutConfig::incremental()).await;
        create(&f.store, &f.run, "source", None).await;

        let detector = CompletionDetector::new(&f.graph, &f.reader);
        let consumer = f.graph.block("consumer").unwrap();
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();

        // zero items and zero clones, but the source is still running
        let status = detector.check(&mut cache, consumer).await.unwrap();
        assert!(matches!(
            status,
            CompletionStatus::Pending {
                upstream_complete: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_target_is_read_fresh() {
        let f = fixture(FanoutConfig::incremental()).await;
        let source = create(&f.store, &f.run, "source", None).await;
        finish(&f.store, source).await;
        let partition = f.run.execution_partition.clone();
        f.reader.append("source", &partition, json!(1), None).await;
        let only = create(&f.store, &f.run, "consumer:0", Some(0)).await;
        finish(&f.store, only).await;

        let detector = CompletionDetector::new(&f.graph, &f.reader);
        let consumer = f.graph.block("consumer").unwrap();
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();
        // warm the memo with the one-item output
        assert_eq!(detector.target(&mut cache, consumer).await.unwrap(), 1);

        f.reader.append("source", &partition, json!(2), None).await;
        let status = detector.check(&mut cache, consumer).await.unwrap();
        assert_eq!(
            status,
            CompletionStatus::Pending {
                upstream_complete: true,
                completed: 1,
                target: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_block_sleeps_when_pending() {
        let f = fixture(FanoutConfig::streaming(30)).await;
        create(&f.store, &f.run, "source", None).await;

        let detector = CompletionDetector::new(&f.graph, &f.reader);
        let consumer = f.graph.block("consumer").unwrap();
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();

        let before = tokio::time::Instant::now();
        let complete = detector
            .is_complete(&mut cache, consumer, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!complete);
        assert!(before.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_streaming_block_does_not_sleep() {
        let f = fixture(FanoutConfig::incremental()).await;
        create(&f.store, &f.run, "source", None).await;

        let detector = CompletionDetector::new(&f.graph, &f.reader);
        let consumer = f.graph.block("consumer").unwrap();
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();

        let before = tokio::time::Instant::now();
        assert!(!detector
            .is_complete(&mut cache, consumer, Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_progress_event() {
        let f = fixture(FanoutConfig::incremental()).await;
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let detector = CompletionDetector::new(&f.graph, &f.reader).with_progress(Some(tx));
        let consumer = f.graph.block("consumer").unwrap();
        let mut cache = TickCache::load(&f.store, f.run.id).await.unwrap();

        detector.check(&mut cache, consumer).await.unwrap();
        match rx.recv().await.unwrap() {
            ExecutionEvent::FanoutProgress {
                block_uuid,
                completed,
                target,
            } => {
                assert_eq!(block_uuid, "consumer");
                assert_eq!((completed, target), (0, 0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
