//! bqls core
//!
//! Domain model shared by the analyzer, the metadata stores and the
//! language server: text ranges, diagnostics, BigQuery types, table
//! metadata and configuration.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod range;
pub mod schema;
pub mod types;

pub use config::{Config, ConfigError, DiagnosticsConfig, MetadataBackend, MetadataConfig};
pub use diagnostic::{Diagnostic, DiagnosticCode, Severity};
pub use range::TextRange;
pub use schema::{FieldMode, SchemaField, TableMetadata};
pub use types::{SqlType, StructField};
