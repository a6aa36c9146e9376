// Filesystem Output Store
// Reads and writes block outputs under <root>/<partition>/<block>/<suffix...>/

use crate::error::{ServiceError, ServiceResult};
use crate::execution::identifier::{split_instance_uuid, SEGMENT_SEPARATOR};
use crate::outputs::{DynamicOutput, OutputReader, OutputWriter};

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

/// File holding the item values
pub const VALUES_FILE: &str = "output_0.json";
/// File holding the per-item metadata
pub const METADATA_FILE: &str = "output_1.json";

/// Output store backed by JSON files
#[derive(Debug, Clone)]
pub struct FsOutputStore {
    root: PathBuf,
}

impl FsOutputStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the outputs of a block or block instance
    pub fn output_dir(&self, block_uuid: &str, partition: &str) -> PathBuf {
        let mut dir = self.root.clone();
        for part in partition.split('/').filter(|p| !p.is_empty()) {
            dir.push(sanitize(part));
        }

        let (base, suffix) = split_instance_uuid(block_uuid);
        dir.push(sanitize(base));
        if let Some(suffix) = suffix {
            for segment in suffix.split(SEGMENT_SEPARATOR) {
                dir.push(sanitize(segment));
            }
        }
        dir
    }

    async fn read_list(block_uuid: &str, path: &Path) -> ServiceResult<Option<Vec<Value>>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let list: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
            ServiceError::output(block_uuid, format!("{}: {}", path.display(), e))
        })?;
        Ok(Some(list))
    }
}

/// Keep path components inside the partition directory
fn sanitize(component: &str) -> String {
    match component {
        "" | "." | ".." => "_".to_string(),
        other => other.replace(['/', '\\'], "_"),
    }
}

#[async_trait]
impl OutputReader for FsOutputStore {
    async fn read_output(
        &self,
        block_uuid: &str,
        partition: &str,
    ) -> ServiceResult<Option<DynamicOutput>> {
        let dir = self.output_dir(block_uuid, partition);

        let Some(values) = Self::read_list(block_uuid, &dir.join(VALUES_FILE)).await? else {
            return Ok(None);
        };
        let metadata = Self::read_list(block_uuid, &dir.join(METADATA_FILE))
            .await?
            .unwrap_or_default();

        Ok(Some(DynamicOutput::new(values).with_metadata(metadata)))
    }
}

#[async_trait]
impl OutputWriter for FsOutputStore {
    async fn write_output(
        &self,
        block_uuid: &str,
        partition: &str,
        output: DynamicOutput,
    ) -> ServiceResult<()> {
        let dir = self.output_dir(block_uuid, partition);
        tokio::fs::create_dir_all(&dir).await?;

        let values = serde_json::to_string_pretty(&output.values)
            .map_err(|e| ServiceError::output(block_uuid, e.to_string()))?;
        let metadata = serde_json::to_string_pretty(&output.metadata)
            .map_err(|e| ServiceError::output(block_uuid, e.to_string()))?;

        tokio::fs::write(dir.join(VALUES_FILE), values).await?;
        tokio::fs::write(dir.join(METADATA_FILE), metadata).await?;
        Ok(())
    }
}
