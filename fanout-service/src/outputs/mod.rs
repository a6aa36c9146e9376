// Block Outputs
// Items written by dynamic blocks, and the readers the scheduler counts them through

pub mod fs;
pub mod memory;

pub use fs::FsOutputStore;
pub use memory::MemoryOutputStore;

use crate::error::ServiceResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Items produced by one block (or block instance) in one execution partition
///
/// `values[i]` is the i-th item; `metadata[i]` is optional per-item metadata
/// such as a `block_uuid` override for the instance it spawns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicOutput {
    pub values: Vec<Value>,
    #[serde(default)]
    pub metadata: Vec<Value>,
}

impl DynamicOutput {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            metadata: Vec::new(),
        }
    }

    /// Attach metadata, padding with nulls so both lists have the same length
    pub fn with_metadata(mut self, mut metadata: Vec<Value>) -> Self {
        if metadata.len() < self.values.len() {
            metadata.resize(self.values.len(), Value::Null);
        }
        metadata.truncate(self.values.len());
        self.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: Value, metadata: Option<Value>) {
        if self.metadata.len() < self.values.len() {
            self.metadata.resize(self.values.len(), Value::Null);
        }
        self.values.push(value);
        self.metadata.push(metadata.unwrap_or(Value::Null));
    }

    /// Non-null metadata of item `index`
    pub fn metadata_at(&self, index: usize) -> Option<&Value> {
        self.metadata.get(index).filter(|m| !m.is_null())
    }

    /// Value and metadata of item `index`
    pub fn item(&self, index: usize) -> Option<(&Value, Option<&Value>)> {
        self.values.get(index).map(|v| (v, self.metadata_at(index)))
    }
}

/// Per-block, per-partition output reader
///
/// `Ok(None)` means the block has not written anything yet. Errors are
/// reserved for unreadable or malformed outputs.
#[async_trait]
pub trait OutputReader: Send + Sync {
    async fn read_output(
        &self,
        block_uuid: &str,
        partition: &str,
    ) -> ServiceResult<Option<DynamicOutput>>;
}

/// Destination for block outputs, used by executors
#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write_output(
        &self,
        block_uuid: &str,
        partition: &str,
        output: DynamicOutput,
    ) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_padding() {
        let output = DynamicOutput::new(vec![json!(1), json!(2), json!(3)])
            .with_metadata(vec![json!({"block_uuid": "one"})]);

        assert_eq!(output.metadata.len(), 3);
        assert_eq!(output.metadata_at(0), Some(&json!({"block_uuid": "one"})));
        assert_eq!(output.metadata_at(1), None);
        assert_eq!(output.item(2), Some((&json!(3), None)));
        assert_eq!(output.item(3), None);
    }

    #[test]
    fn test_push_keeps_lists_aligned() {
        let mut output = DynamicOutput::new(vec![json!("a")]);
        output.push(json!("b"), Some(json!({"k": 1})));

        assert_eq!(output.len(), 2);
        assert_eq!(output.metadata, vec![Value::Null, json!({"k": 1})]);
    }

    #[test]
    fn test_deserialize_without_metadata() {
        let output: DynamicOutput = serde_json::from_str(r#"{"values": [1, 2]}"#).unwrap();
        assert_eq!(output.len(), 2);
        assert!(output.metadata_at(0).is_none());
    }
}
