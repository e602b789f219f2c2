//! Test fixtures for metadata store integration tests
//!
//! Table definitions shaped like real BigQuery tables, including nested
//! RECORD columns and REPEATED modes.

use bqls_core::{FieldMode, SchemaField, TableMetadata};
use chrono::{TimeZone, Utc};

/// `shop.users`: flat table with descriptions
pub fn users_table() -> TableMetadata {
    TableMetadata::new(
        "my-project:shop.users",
        Utc.with_ymd_and_hms(2023, 11, 5, 8, 30, 0).unwrap(),
        vec![
            SchemaField::new("id", "INTEGER")
                .with_mode(FieldMode::Required)
                .with_description("Primary key"),
            SchemaField::new("email", "STRING").with_mode(FieldMode::Required),
            SchemaField::new("name", "STRING").with_description("Display name"),
            SchemaField::new("created_at", "TIMESTAMP"),
            SchemaField::new("is_active", "BOOLEAN"),
        ],
    )
    .with_description("Registered users")
    .with_last_modified(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
}

/// `shop.orders`: nested and repeated columns
pub fn orders_table() -> TableMetadata {
    TableMetadata::new(
        "my-project:shop.orders",
        Utc.with_ymd_and_hms(2023, 11, 5, 8, 31, 0).unwrap(),
        vec![
            SchemaField::new("id", "INTEGER").with_mode(FieldMode::Required),
            SchemaField::new("user_id", "INTEGER"),
            SchemaField::new("total_amount", "NUMERIC"),
            SchemaField::new("shipping", "RECORD").with_fields(vec![
                SchemaField::new("city", "STRING"),
                SchemaField::new("zip", "STRING"),
            ]),
            SchemaField::new("tags", "STRING").with_mode(FieldMode::Repeated),
        ],
    )
}
