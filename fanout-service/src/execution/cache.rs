// Tick Cache
// Read-through view of one pipeline run's block runs and outputs, scoped to one scheduling tick

use crate::error::ServiceResult;
use crate::execution::identifier::{base_uuid, is_instance_uuid};
use crate::outputs::{DynamicOutput, OutputReader};
use crate::runs::models::{BlockRun, PipelineRun, PipelineRunId};
use crate::runs::store::RunRecordStore;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Position of an instance: ancestor uuid -> item index
pub type PositionKey = BTreeMap<String, usize>;

/// Memoized fan-out evaluation of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutState {
    /// No further instances can appear
    pub settled: bool,
    /// Settled and every instance is COMPLETED
    pub complete: bool,
}

/// Snapshot of a pipeline run built once per tick
///
/// Duplicate attempts of the same `block_uuid` collapse to the most
/// recently started one. Runs created during the tick are inserted so that
/// blocks processed later see them.
#[derive(Debug, Clone)]
pub struct TickCache {
    pipeline_run: PipelineRun,
    runs: Vec<BlockRun>,
    by_uuid: HashMap<String, usize>,
    /// base uuid -> indices of suffixed instances, in creation order
    clones: HashMap<String, Vec<usize>>,
    /// base uuid -> instance position -> index
    positions: HashMap<String, HashMap<PositionKey, usize>>,
    outputs: HashMap<String, Option<Arc<DynamicOutput>>>,
    fanout: HashMap<String, FanoutState>,
}

impl TickCache {
    /// Load the pipeline run and its block runs from the store
    pub async fn load(
        store: &dyn RunRecordStore,
        pipeline_run_id: PipelineRunId,
    ) -> ServiceResult<Self> {
        let pipeline_run = store.get_pipeline_run(pipeline_run_id).await?;
        let runs = store.list_block_runs(pipeline_run_id).await?;
        Ok(Self::from_runs(pipeline_run, runs))
    }

    pub fn from_runs(pipeline_run: PipelineRun, runs: Vec<BlockRun>) -> Self {
        let mut cache = Self {
            pipeline_run,
            runs: Vec::with_capacity(runs.len()),
            by_uuid: HashMap::new(),
            clones: HashMap::new(),
            positions: HashMap::new(),
            outputs: HashMap::new(),
            fanout: HashMap::new(),
        };
        for run in runs {
            cache.insert(run);
        }
        cache
    }

    pub fn pipeline_run(&self) -> &PipelineRun {
        &self.pipeline_run
    }

    pub fn partition(&self) -> &str {
        &self.pipeline_run.execution_partition
    }

    /// All deduplicated block runs
    pub fn runs(&self) -> &[BlockRun] {
        &self.runs
    }

    /// Block run by exact uuid
    pub fn run(&self, block_uuid: &str) -> Option<&BlockRun> {
        self.by_uuid.get(block_uuid).map(|&idx| &self.runs[idx])
    }

    /// Suffixed instances cloned from `base`
    pub fn clones(&self, base: &str) -> Vec<&BlockRun> {
        self.clones
            .get(base)
            .map(|indices| indices.iter().map(|&idx| &self.runs[idx]).collect())
            .unwrap_or_default()
    }

    /// Instance of `base` at an exact position
    pub fn instance_at(&self, base: &str, position: &PositionKey) -> Option<&BlockRun> {
        self.positions
            .get(base)
            .and_then(|by_position| by_position.get(position))
            .map(|&idx| &self.runs[idx])
    }

    /// Add or replace a run, keeping the most recent attempt per uuid
    pub fn insert(&mut self, run: BlockRun) {
        let base = base_uuid(&run.block_uuid).to_string();
        self.fanout.remove(&base);

        if let Some(&idx) = self.by_uuid.get(&run.block_uuid) {
            if run.recency_key() >= self.runs[idx].recency_key() {
                self.runs[idx] = run;
            }
            return;
        }

        let idx = self.runs.len();
        self.by_uuid.insert(run.block_uuid.clone(), idx);
        if is_instance_uuid(&run.block_uuid) {
            self.clones.entry(base.clone()).or_default().push(idx);
            if !run.metrics.dynamic_block_indexes.is_empty() {
                self.positions
                    .entry(base)
                    .or_default()
                    .insert(run.metrics.dynamic_block_indexes.clone(), idx);
            }
        }
        self.runs.push(run);
    }

    /// Output of a block or instance, read once per tick
    pub async fn output(
        &mut self,
        reader: &dyn OutputReader,
        block_uuid: &str,
    ) -> ServiceResult<Option<Arc<DynamicOutput>>> {
        if let Some(cached) = self.outputs.get(block_uuid) {
            return Ok(cached.clone());
        }

        let output = reader
            .read_output(block_uuid, &self.pipeline_run.execution_partition)
            .await?
            .map(Arc::new);
        self.outputs.insert(block_uuid.to_string(), output.clone());
        Ok(output)
    }

    /// Drop memoized outputs so the next read goes to the reader
    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
    }

    pub fn fanout_state(&self, block_uuid: &str) -> Option<FanoutState> {
        self.fanout.get(block_uuid).copied()
    }

    pub fn remember_fanout_state(&mut self, block_uuid: &str, state: FanoutState) {
        self.fanout.insert(block_uuid.to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::MemoryOutputStore;
    use crate::runs::models::{BlockRunMetrics, BlockRunStatus, PipelineRunStatus};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn pipeline_run() -> PipelineRun {
        PipelineRun {
            id: 1,
            pipeline_uuid: "fan_out".to_string(),
            status: PipelineRunStatus::Running,
            execution_partition: "fan_out/1".to_string(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn run(id: u64, uuid: &str, status: BlockRunStatus, indexes: &[(&str, usize)]) -> BlockRun {
        BlockRun {
            id,
            pipeline_run_id: 1,
            block_uuid: uuid.to_string(),
            status,
            metrics: BlockRunMetrics {
                dynamic_block_index: None,
                dynamic_block_indexes: indexes.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                metadata: BTreeMap::new(),
            },
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_indexes_clones_and_positions() {
        let cache = TickCache::from_runs(
            pipeline_run(),
            vec![
                run(1, "dynamic1", BlockRunStatus::Completed, &[]),
                run(2, "child:0", BlockRunStatus::Initial, &[("dynamic1", 0)]),
                run(3, "child:1", BlockRunStatus::Initial, &[("dynamic1", 1)]),
            ],
        );

        assert_eq!(cache.clones("child").len(), 2);
        assert!(cache.clones("dynamic1").is_empty());
        assert!(cache.run("dynamic1").unwrap().is_completed());

        let position: PositionKey = [("dynamic1".to_string(), 1)].into_iter().collect();
        assert_eq!(cache.instance_at("child", &position).unwrap().id, 3);
    }

    #[test]
    fn test_most_recent_attempt_wins() {
        let mut first = run(1, "child:0", BlockRunStatus::Failed, &[("dynamic1", 0)]);
        first.started_at = Some(Utc::now() - Duration::minutes(5));
        let mut retry = run(2, "child:0", BlockRunStatus::Completed, &[("dynamic1", 0)]);
        retry.started_at = Some(Utc::now());

        let cache = TickCache::from_runs(pipeline_run(), vec![retry, first]);

        assert_eq!(cache.runs().len(), 1);
        assert_eq!(cache.run("child:0").unwrap().id, 2);
        assert!(cache.clones("child")[0].is_completed());
    }

    #[tokio::test]
    async fn test_output_memoization() {
        let reader = MemoryOutputStore::new();
        let mut cache = TickCache::from_runs(pipeline_run(), Vec::new());

        assert!(cache.output(&reader, "dynamic1").await.unwrap().is_none());

        reader
            .write("dynamic1", "fan_out/1", DynamicOutput::new(vec![json!(1)]))
            .await;
        // still the memoized miss
        assert!(cache.output(&reader, "dynamic1").await.unwrap().is_none());

        cache.clear_outputs();
        let output = cache.output(&reader, "dynamic1").await.unwrap().unwrap();
        assert_eq!(output.len(), 1);
    }

    #[test]
    fn test_insert_clears_fanout_memo() {
        let mut cache = TickCache::from_runs(pipeline_run(), Vec::new());
        cache.remember_fanout_state(
            "child",
            FanoutState {
                settled: true,
                complete: true,
            },
        );

        cache.insert(run(9, "child:0", BlockRunStatus::Initial, &[("dynamic1", 0)]));
        assert!(cache.fanout_state("child").is_none());
    }
}
