//! Table metadata caching with TTL
//!
//! [`CachedStore`] wraps another store and remembers successful lookups by
//! canonical path. Failures are never cached, so a transient error is
//! retried on the next request. Expired entries are evicted on access.

use crate::store::{FetchError, MetadataStore, TablePath};
use bqls_core::TableMetadata;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    metadata: Arc<TableMetadata>,
    created_at: Instant,
}

/// TTL cache in front of a [`MetadataStore`]
pub struct CachedStore {
    inner: Arc<dyn MetadataStore>,

    cache: RwLock<HashMap<String, CacheEntry>>,

    ttl: Duration,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn MetadataStore>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached metadata for `path`, if present and not expired
    pub fn get_cached(&self, path: &TablePath) -> Option<Arc<TableMetadata>> {
        let key = path.canonical();

        if let Ok(cache) = self.cache.read() {
            match cache.get(&key) {
                Some(entry) if entry.created_at.elapsed() < self.ttl => {
                    return Some(Arc::clone(&entry.metadata));
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.evict(path);
        None
    }

    pub fn insert(&self, path: &TablePath, metadata: TableMetadata) {
        let entry = CacheEntry {
            metadata: Arc::new(metadata),
            created_at: Instant::now(),
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(path.canonical(), entry);
        }
    }

    pub fn evict(&self, path: &TablePath) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&path.canonical());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Number of entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl MetadataStore for CachedStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get_table_metadata(&self, path: &TablePath) -> Result<TableMetadata, FetchError> {
        if let Some(metadata) = self.get_cached(path) {
            tracing::debug!(table = %path, "metadata cache hit");
            return Ok(metadata.as_ref().clone());
        }

        let metadata = self.inner.get_table_metadata(path).await?;
        self.insert(path, metadata.clone());
        Ok(metadata)
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.inner.test_connection().await
    }
}
