//! Integration tests for metadata stores
//!
//! Tests against the live BigQuery API are marked `#[ignore]`:
//!
//! ```bash
//! GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json \
//! BQLS_TEST_TABLE=my-project.my_dataset.my_table \
//! cargo test -p bqls-catalog --features bigquery --test integration_tests -- --ignored
//! ```

mod fixtures;

use bqls_catalog::{CachedStore, FetchError, MetadataStore, MockStoreBuilder, OfflineStore, TablePath};
use bqls_core::SqlType;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn users_path() -> TablePath {
    TablePath::new("my-project", "shop", "users")
}

fn orders_path() -> TablePath {
    TablePath::new("my-project", "shop", "orders")
}

#[tokio::test]
async fn test_offline_snapshots_round_trip_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let offline = OfflineStore::new(dir.path());
    offline.save(&users_path(), &fixtures::users_table()).await.unwrap();
    offline.save(&orders_path(), &fixtures::orders_table()).await.unwrap();

    let store = CachedStore::new(Arc::new(offline), Duration::from_secs(300));
    assert_eq!(store.name(), "Offline");

    let orders = store.get_table_metadata(&orders_path()).await.unwrap();
    assert_eq!(orders, fixtures::orders_table());

    let shipping = orders.find_field("shipping").unwrap();
    assert_eq!(shipping.sql_type().to_string(), "STRUCT<city STRING, zip STRING>");
    let tags = orders.find_field("tags").unwrap();
    assert_eq!(tags.sql_type(), SqlType::array_of(SqlType::String));

    // Served from the cache even after the snapshot disappears
    std::fs::remove_file(dir.path().join("my-project.shop.orders.json")).unwrap();
    assert!(store.get_table_metadata(&orders_path()).await.is_ok());
}

#[tokio::test]
async fn test_parsed_paths_hit_the_same_entry() {
    let store = MockStoreBuilder::new()
        .with_table("my-project.shop.users", fixtures::users_table())
        .build();

    for written in ["my-project.shop.users", "my-project:shop.users", "shop.users"] {
        let path = TablePath::parse(written, Some("my-project")).unwrap();
        let table = store.get_table_metadata(&path).await.unwrap();
        assert_eq!(table.full_id, "my-project:shop.users");
    }
}

#[tokio::test]
async fn test_mock_latency_and_errors() {
    let store = MockStoreBuilder::new()
        .with_error(
            "my-project.shop.users",
            FetchError::NetworkError("connection reset".to_string()),
        )
        .with_latency(20)
        .build();

    let started = std::time::Instant::now();
    let err = store.get_table_metadata(&users_path()).await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert!(!err.is_not_found());

    let timed = tokio::time::timeout(Duration::from_millis(1), store.get_table_metadata(&orders_path())).await;
    assert!(timed.is_err(), "latency should outlast the timeout");
}

#[tokio::test]
#[ignore] // Run with: cargo test --features bigquery -- --ignored
async fn test_bigquery_fetch_table() {
    let Ok(table) = std::env::var("BQLS_TEST_TABLE") else {
        eprintln!("Skipping BigQuery test: BQLS_TEST_TABLE not set");
        return;
    };

    #[cfg(feature = "bigquery")]
    {
        use bqls_catalog::BigQueryStore;

        let path = TablePath::parse(&table, None).unwrap();
        let store = BigQueryStore::with_adc(&path.project_id).await.unwrap();
        let metadata = store.get_table_metadata(&path).await.unwrap();

        assert_eq!(metadata.full_id, path.full_id());
        assert!(!metadata.schema.is_empty());
    }

    #[cfg(not(feature = "bigquery"))]
    let _ = table;
}
