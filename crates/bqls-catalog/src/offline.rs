//! Offline metadata store backed by JSON snapshots
//!
//! Each table lives in `<dir>/<project>.<dataset>.<table>.json`, holding a
//! serialized [`TableMetadata`]. Useful without network access and for
//! pinning schemas in a repository.

use crate::store::{FetchError, MetadataStore, TablePath};
use bqls_core::TableMetadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct OfflineStore {
    dir: PathBuf,
}

impl OfflineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file for `path`
    pub fn snapshot_path(&self, path: &TablePath) -> PathBuf {
        self.dir.join(format!("{}.json", path.canonical()))
    }

    /// Write a snapshot, creating the directory if needed
    pub async fn save(&self, path: &TablePath, metadata: &TableMetadata) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| FetchError::ConfigError(format!("Cannot create {}: {}", self.dir.display(), e)))?;

        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        let file = self.snapshot_path(path);
        tokio::fs::write(&file, json)
            .await
            .map_err(|e| FetchError::ConfigError(format!("Cannot write {}: {}", file.display(), e)))
    }
}

#[async_trait::async_trait]
impl MetadataStore for OfflineStore {
    fn name(&self) -> &'static str {
        "Offline"
    }

    async fn get_table_metadata(&self, path: &TablePath) -> Result<TableMetadata, FetchError> {
        let file = self.snapshot_path(path);

        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::TableNotFound(path.canonical()));
            }
            Err(e) => {
                return Err(FetchError::ConfigError(format!(
                    "Cannot read {}: {}",
                    file.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            FetchError::InvalidResponse(format!("Malformed snapshot {}: {}", file.display(), e))
        })
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(FetchError::ConfigError(format!(
                "Snapshot directory {} does not exist",
                self.dir.display()
            ))),
        }
    }
}
