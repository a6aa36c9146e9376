use crate::error::ServiceResult;
use crate::outputs::{DynamicOutput, OutputReader, OutputWriter};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory output store keyed by (partition, block uuid)
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputStore {
    outputs: Arc<RwLock<HashMap<(String, String), DynamicOutput>>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self, block_uuid: &str, partition: &str, output: DynamicOutput) {
        self.outputs
            .write()
            .await
            .insert((partition.to_string(), block_uuid.to_string()), output);
    }

    /// Append one item, as a streaming source does while still running
    pub async fn append(
        &self,
        block_uuid: &str,
        partition: &str,
        value: Value,
        metadata: Option<Value>,
    ) {
        self.outputs
            .write()
            .await
            .entry((partition.to_string(), block_uuid.to_string()))
            .or_default()
            .push(value, metadata);
    }
}

#[async_trait]
impl OutputReader for MemoryOutputStore {
    async fn read_output(
        &self,
        block_uuid: &str,
        partition: &str,
    ) -> ServiceResult<Option<DynamicOutput>> {
        let outputs = self.outputs.read().await;
        Ok(outputs
            .get(&(partition.to_string(), block_uuid.to_string()))
            .cloned())
    }
}

#[async_trait]
impl OutputWriter for MemoryOutputStore {
    async fn write_output(
        &self,
        block_uuid: &str,
        partition: &str,
        output: DynamicOutput,
    ) -> ServiceResult<()> {
        self.write(block_uuid, partition, output).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_output_is_none() {
        let store = MemoryOutputStore::new();
        assert!(store.read_output("dynamic1", "p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = MemoryOutputStore::new();
        store
            .write("dynamic1", "p1", DynamicOutput::new(vec![json!(1), json!(2)]))
            .await;

        let p1 = store.read_output("dynamic1", "p1").await.unwrap().unwrap();
        assert_eq!(p1.len(), 2);
        assert!(store.read_output("dynamic1", "p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_grows_output() {
        let store = MemoryOutputStore::new();
        store.append("source", "p", json!("a"), None).await;
        store
            .append("source", "p", json!("b"), Some(json!({"block_uuid": "bee"})))
            .await;

        let output = store.read_output("source", "p").await.unwrap().unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output.metadata_at(1), Some(&json!({"block_uuid": "bee"})));
    }
}
