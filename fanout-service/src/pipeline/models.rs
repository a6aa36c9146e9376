use crate::config::SchedulerConfig;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline definition as authored in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub blocks: Vec<BlockDefinition>,
    #[serde(default)]
    pub settings: SchedulerConfig,
}

impl Pipeline {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
            blocks: Vec::new(),
            settings: SchedulerConfig::default(),
        }
    }

    pub fn with_block(mut self, block: BlockDefinition) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uuid)
    }
}

/// How a block with dynamic ancestry is instantiated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutMode {
    /// One instance per combination of ancestor items
    #[default]
    CrossProduct,
    /// One instance per item, summed over upstream sources, created as items appear
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub mode: FanoutMode,
    /// Read items while upstream sources are still running
    pub stream: bool,
    /// Seconds between completion polls for streaming fan-out
    pub poll_interval: Option<u64>,
}

impl FanoutConfig {
    pub fn incremental() -> Self {
        Self {
            mode: FanoutMode::Incremental,
            ..Default::default()
        }
    }

    pub fn streaming(poll_interval: u64) -> Self {
        Self {
            mode: FanoutMode::Incremental,
            stream: true,
            poll_interval: Some(poll_interval),
        }
    }
}

/// A block as declared in the pipeline file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub uuid: String,
    #[serde(default)]
    pub upstream_blocks: Vec<String>,
    /// Produces a runtime-determined number of items
    #[serde(default)]
    pub dynamic: bool,
    /// Explicit override; derived from the graph when omitted
    #[serde(default)]
    pub dynamic_child: Option<bool>,
    #[serde(default)]
    pub reduce_output: bool,
    #[serde(default)]
    pub replicated_block: Option<String>,
    #[serde(default)]
    pub fanout: FanoutConfig,
}

impl BlockDefinition {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            upstream_blocks: Vec::new(),
            dynamic: false,
            dynamic_child: None,
            reduce_output: false,
            replicated_block: None,
            fanout: FanoutConfig::default(),
        }
    }

    pub fn upstream(mut self, upstream: &[&str]) -> Self {
        self.upstream_blocks = upstream.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn dynamic_child(mut self, value: bool) -> Self {
        self.dynamic_child = Some(value);
        self
    }

    pub fn reduce_output(mut self) -> Self {
        self.reduce_output = true;
        self
    }

    pub fn replica_of(mut self, block_uuid: impl Into<String>) -> Self {
        self.replicated_block = Some(block_uuid.into());
        self
    }

    pub fn fanout(mut self, fanout: FanoutConfig) -> Self {
        self.fanout = fanout;
        self
    }
}

/// A resolved block: a node of the block graph
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub uuid: String,
    pub upstream_blocks: Vec<String>,
    pub downstream_blocks: Vec<String>,
    pub is_dynamic: bool,
    /// Has a dynamic ancestor and is instantiated per item combination
    pub is_dynamic_child: bool,
    pub reduce_output: bool,
    pub replicated_block: Option<String>,
    pub fanout: FanoutConfig,
}

impl Block {
    pub fn is_incremental(&self) -> bool {
        self.fanout.mode == FanoutMode::Incremental
    }

    pub fn is_streaming(&self) -> bool {
        self.is_incremental() && self.fanout.stream
    }

    /// Poll interval for completion checks, falling back to the scheduler default
    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.fanout
            .poll_interval
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}
