//! Table metadata stores
//!
//! Everything the language server knows about a table's schema comes from
//! a [`MetadataStore`]:
//! - [`BigQueryStore`] calls the BigQuery tables API (feature `bigquery`)
//! - [`OfflineStore`] reads JSON snapshots from a directory
//! - [`MockStore`] serves predefined tables in tests
//!
//! [`CachedStore`] wraps any of them with a TTL cache.
//!
//! ```rust,ignore
//! use bqls_catalog::{BigQueryStore, CachedStore, MetadataStore, TablePath};
//!
//! let store = CachedStore::new(Arc::new(BigQueryStore::with_adc("my-project").await?), ttl);
//! let table = store.get_table_metadata(&TablePath::parse("ds.users", Some("my-project"))?).await?;
//! ```

pub mod bigquery;
pub mod cache;
pub mod mock;
pub mod offline;
pub mod store;

pub use bigquery::BigQueryStore;
pub use cache::CachedStore;
pub use mock::{MockStore, MockStoreBuilder};
pub use offline::OfflineStore;
pub use store::{FetchError, MetadataStore, TablePath};
