// Scheduler Configuration
// Tunables for the scheduling tick, streaming polls and the worker pool

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default poll interval for streaming fan-out, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Configuration for scheduling and dispatching block runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Poll interval for streaming blocks that do not set their own
    pub poll_interval_secs: u64,
    /// Delay between scheduler ticks while runs are in flight
    pub tick_interval_ms: u64,
    /// Maximum concurrently executing block runs (0 = unlimited)
    pub max_parallel_runs: usize,
    /// Cross-products larger than this are logged as a warning
    pub combination_warning_threshold: usize,
    /// Partition for block outputs (defaults to the pipeline run's own)
    pub execution_partition: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            tick_interval_ms: 500,
            max_parallel_runs: 0,
            combination_warning_threshold: 10_000,
            execution_partition: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    pub fn with_max_parallel_runs(mut self, max: usize) -> Self {
        self.max_parallel_runs = max;
        self
    }

    pub fn with_combination_warning_threshold(mut self, threshold: usize) -> Self {
        self.combination_warning_threshold = threshold;
        self
    }

    pub fn with_execution_partition(mut self, partition: impl Into<String>) -> Self {
        self.execution_partition = Some(partition.into());
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
