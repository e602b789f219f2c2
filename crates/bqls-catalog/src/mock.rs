//! Mock metadata store for testing
//!
//! Returns predefined table metadata without touching the network. Tables
//! are keyed by canonical path (`project.dataset.table`).
//!
//! ```rust,ignore
//! let store = MockStoreBuilder::new()
//!     .with_table("proj.ds.users", users_metadata)
//!     .with_error("proj.ds.secret", FetchError::PermissionDenied("nope".into()))
//!     .with_latency(50)
//!     .build();
//! ```

use crate::store::{FetchError, MetadataStore, TablePath};
use bqls_core::TableMetadata;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory metadata store
///
/// Clones share tables, errors and the call counter.
#[derive(Clone)]
pub struct MockStore {
    tables: Arc<RwLock<HashMap<String, TableMetadata>>>,

    /// Errors returned for specific tables, checked before `tables`
    errors: Arc<RwLock<HashMap<String, FetchError>>>,

    calls: Arc<AtomicUsize>,

    fail_connection: bool,

    /// Simulated latency per request (milliseconds)
    latency_ms: u64,
}

impl MockStore {
    pub fn new() -> Self {
        MockStoreBuilder::new().build()
    }

    pub async fn add_table(&self, path: impl Into<String>, metadata: TableMetadata) {
        self.tables.write().await.insert(path.into(), metadata);
    }

    pub async fn add_error(&self, path: impl Into<String>, error: FetchError) {
        self.errors.write().await.insert(path.into(), error);
    }

    pub async fn clear_errors(&self) {
        self.errors.write().await.clear();
    }

    /// Number of `get_table_metadata` calls served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetadataStore for MockStore {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn get_table_metadata(&self, path: &TablePath) -> Result<TableMetadata, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let key = path.canonical();
        if let Some(error) = self.errors.read().await.get(&key) {
            return Err(error.clone());
        }

        self.tables
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(FetchError::TableNotFound(key))
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builder for a [`MockStore`] with predefined tables
#[derive(Default)]
pub struct MockStoreBuilder {
    tables: HashMap<String, TableMetadata>,
    errors: HashMap<String, FetchError>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, path: impl Into<String>, metadata: TableMetadata) -> Self {
        self.tables.insert(path.into(), metadata);
        self
    }

    pub fn with_error(mut self, path: impl Into<String>, error: FetchError) -> Self {
        self.errors.insert(path.into(), error);
        self
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn build(self) -> MockStore {
        MockStore {
            tables: Arc::new(RwLock::new(self.tables)),
            errors: Arc::new(RwLock::new(self.errors)),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}
