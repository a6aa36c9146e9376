// Dynamic Block Factory
// Creates one block run per item summed over a block's upstream sources

use crate::error::{ServiceError, ServiceResult};
use crate::execution::cache::TickCache;
use crate::execution::counter::DynamicItemCounter;
use crate::execution::graph::BlockGraph;
use crate::execution::identifier::{instance_uuid, Coordinate};
use crate::outputs::OutputReader;
use crate::pipeline::models::Block;
use crate::runs::models::{BlockRun, BlockRunMetrics};
use crate::runs::store::RunRecordStore;

use std::collections::HashSet;

/// Idempotently create a block run and record it in the tick cache.
///
/// Returns the run only when this call inserted it; a concurrent tick that
/// won the race leaves the existing run in the cache instead.
pub(crate) async fn create_run(
    store: &dyn RunRecordStore,
    cache: &mut TickCache,
    block_uuid: String,
    metrics: BlockRunMetrics,
) -> ServiceResult<Option<BlockRun>> {
    let pipeline_run_id = cache.pipeline_run().id;
    let creation = store
        .create_block_run(pipeline_run_id, &block_uuid, metrics, true)
        .await?;

    cache.insert(creation.block_run.clone());
    Ok(creation.created.then_some(creation.block_run))
}

/// Incremental fan-out of a single block
///
/// Each upstream source contributes its items independently, so counts are
/// summed rather than multiplied. New instances get `block:<index>` for the
/// indexes `[existing, target)`.
pub struct DynamicBlockFactory<'a> {
    graph: &'a BlockGraph,
    block: &'a Block,
}

impl<'a> DynamicBlockFactory<'a> {
    pub fn new(graph: &'a BlockGraph, block: &'a Block) -> Self {
        Self { graph, block }
    }

    /// One counter per distinct upstream fan-out source
    pub fn counters(&self) -> Vec<DynamicItemCounter> {
        let mut seen = HashSet::new();
        self.graph
            .upstreams(self.block)
            .filter(|upstream| seen.insert(upstream.uuid.as_str()))
            .filter_map(|upstream| {
                DynamicItemCounter::for_upstream(upstream, self.block.is_streaming())
            })
            .collect()
    }

    /// Sum of the items produced so far by every upstream source
    pub async fn target(
        &self,
        cache: &mut TickCache,
        reader: &dyn OutputReader,
    ) -> ServiceResult<usize> {
        let mut target = 0;
        for counter in self.counters() {
            target += counter.item_count(cache, reader).await?;
        }
        Ok(target)
    }

    /// Create block runs for items that appeared since the last call
    pub async fn materialize(
        &self,
        cache: &mut TickCache,
        reader: &dyn OutputReader,
        store: &dyn RunRecordStore,
    ) -> ServiceResult<Vec<BlockRun>> {
        if !self.graph.has_dynamic_ancestor(&self.block.uuid) {
            return Err(ServiceError::MissingDynamicAncestor(self.block.uuid.clone()));
        }

        let target = self.target(cache, reader).await?;
        let existing = cache.clones(&self.block.uuid).len();
        if target <= existing {
            return Ok(Vec::new());
        }

        let mut created = Vec::with_capacity(target - existing);
        for index in existing..target {
            let coords = [Coordinate::new(self.block.uuid.as_str(), index)];
            let metrics = BlockRunMetrics {
                dynamic_block_index: Some(index),
                dynamic_block_indexes: [(self.block.uuid.clone(), index)].into_iter().collect(),
                ..Default::default()
            };

            let uuid = instance_uuid(&self.block.uuid, &coords);
            if let Some(run) = create_run(store, cache, uuid, metrics).await? {
                created.push(run);
            }
        }

        tracing::debug!(
            block = %self.block.uuid,
            existing,
            target,
            created = created.len(),
            "materialized dynamic block runs"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{DynamicOutput, MemoryOutputStore};
    use crate::pipeline::models::{BlockDefinition, FanoutConfig, Pipeline};
    use crate::runs::models::BlockRunStatus;
    use crate::runs::store::MemoryRunStore;
    use serde_json::json;

    fn graph() -> BlockGraph {
        let pipeline = Pipeline::new("incremental")
            .with_block(BlockDefinition::new("source_a").dynamic())
            .with_block(BlockDefinition::new("source_b").dynamic())
            .with_block(BlockDefinition::new("plain"))
            .with_block(
                BlockDefinition::new("consumer")
                    .upstream(&["source_a", "source_b", "plain"])
                    .fanout(FanoutConfig::incremental()),
            );
        BlockGraph::from_pipeline(&pipeline).unwrap()
    }

    fn items(n: usize) -> DynamicOutput {
        DynamicOutput::new((0..n).map(|i| json!(i)).collect())
    }

    #[tokio::test]
    async fn test_sums_upstream_counts() {
        let graph = graph();
        let store = MemoryRunStore::new();
        let reader = MemoryOutputStore::new();
        let run = store.create_pipeline_run("incremental", None).await.unwrap();
        reader.write("source_a", &run.execution_partition, items(2)).await;
        reader.write("source_b", &run.execution_partition, items(3)).await;

        let mut cache = TickCache::load(&store, run.id).await.unwrap();
        let factory = DynamicBlockFactory::new(&graph, graph.block("consumer").unwrap());

        assert_eq!(factory.counters().len(), 2);
        let created = factory.materialize(&mut cache, &reader, &store).await.unwrap();

        let uuids: Vec<&str> = created.iter().map(|r| r.block_uuid.as_str()).collect();
        assert_eq!(
            uuids,
            vec!["consumer:0", "consumer:1", "consumer:2", "consumer:3", "consumer:4"]
        );
        assert_eq!(created[3].metrics.dynamic_block_index, Some(3));
        assert_eq!(created[3].metrics.dynamic_block_indexes["consumer"], 3);
        assert!(created.iter().all(|r| r.status == BlockRunStatus::Initial));
    }

    #[tokio::test]
    async fn test_creates_only_new_items() {
        let graph = graph();
        let store = MemoryRunStore::new();
        let reader = MemoryOutputStore::new();
        let run = store.create_pipeline_run("incremental", None).await.unwrap();
        let partition = run.execution_partition.clone();
        let factory = DynamicBlockFactory::new(&graph, graph.block("consumer").unwrap());

        reader.append("source_a", &partition, json!("x"), None).await;
        let mut cache = TickCache::load(&store, run.id).await.unwrap();
        assert_eq!(factory.materialize(&mut cache, &reader, &store).await.unwrap().len(), 1);

        // unchanged upstream data creates nothing
        let mut cache = TickCache::load(&store, run.id).await.unwrap();
        assert!(factory.materialize(&mut cache, &reader, &store).await.unwrap().is_empty());

        reader.append("source_a", &partition, json!("y"), None).await;
        reader.append("source_b", &partition, json!("z"), None).await;
        let mut cache = TickCache::load(&store, run.id).await.unwrap();
        let created = factory.materialize(&mut cache, &reader, &store).await.unwrap();
        let uuids: Vec<&str> = created.iter().map(|r| r.block_uuid.as_str()).collect();
        assert_eq!(uuids, vec!["consumer:1", "consumer:2"]);

        assert_eq!(store.list_block_runs(run.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_no_output_yet() {
        let graph = graph();
        let store = MemoryRunStore::new();
        let reader = MemoryOutputStore::new();
        let run = store.create_pipeline_run("incremental", None).await.unwrap();

        let mut cache = TickCache::load(&store, run.id).await.unwrap();
        let factory = DynamicBlockFactory::new(&graph, graph.block("consumer").unwrap());
        assert_eq!(factory.target(&mut cache, &reader).await.unwrap(), 0);
        assert!(factory.materialize(&mut cache, &reader, &store).await.unwrap().is_empty());
    }
}
