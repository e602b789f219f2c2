//! BigQuery metadata store using the tables API
//!
//! Fetches `tables.get` for each requested table. Requires the
//! `bigquery.tables.get` permission on the dataset.
//!
//! ## Authentication
//!
//! 1. Application Default Credentials (ADC)
//! 2. Service account JSON file (explicit path)
//!
//! ```rust,ignore
//! let store = BigQueryStore::with_adc("my-project").await?;
//! let table = store.get_table_metadata(&TablePath::new("proj", "ds", "users")).await?;
//! ```
//!
//! Reference: https://cloud.google.com/bigquery/docs/reference/rest/v2/tables/get

use crate::store::{FetchError, MetadataStore, TablePath};
use bqls_core::{SchemaField, TableMetadata};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::Client as BigQueryClient;

#[cfg(not(feature = "bigquery"))]
const NOT_COMPILED: &str = "BigQuery support not compiled. Rebuild with: cargo build --features bigquery";

/// BigQuery metadata store
pub struct BigQueryStore {
    /// Project used for the connection test query
    #[cfg_attr(not(feature = "bigquery"), allow(dead_code))]
    project_id: String,

    #[cfg(feature = "bigquery")]
    client: BigQueryClient,

    #[cfg(not(feature = "bigquery"))]
    _phantom: std::marker::PhantomData<()>,
}

impl BigQueryStore {
    /// Authenticate with Application Default Credentials
    ///
    /// ADC looks at `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud CLI
    /// default credentials and the GCE/GKE metadata service.
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, FetchError> {
        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self {
            project_id: project_id.into(),
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(_project_id: impl Into<String>) -> Result<Self, FetchError> {
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }

    /// Authenticate with a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        let key_path = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path)
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to read service account key file '{}': {}",
                key_path, e
            )))?;

        Ok(Self {
            project_id: project_id.into(),
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        _project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }
}

#[cfg(feature = "bigquery")]
fn classify_error(path: &TablePath, err: impl std::fmt::Display) -> FetchError {
    let message = err.to_string();
    if message.contains("Not found") || message.contains("notFound") {
        FetchError::TableNotFound(path.canonical())
    } else if message.contains("Access Denied") || message.contains("Permission") {
        FetchError::PermissionDenied(format!("Cannot access {}: {}", path, message))
    } else {
        FetchError::RequestError(message)
    }
}

#[async_trait::async_trait]
impl MetadataStore for BigQueryStore {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn get_table_metadata(&self, path: &TablePath) -> Result<TableMetadata, FetchError> {
        let table = self
            .client
            .table()
            .get(&path.project_id, &path.dataset_id, &path.table_id, None)
            .await
            .map_err(|e| classify_error(path, e))?;

        let value = serde_json::to_value(&table)
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        table_from_json(path, value)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn get_table_metadata(&self, _path: &TablePath) -> Result<TableMetadata, FetchError> {
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "bigquery")]
    async fn test_connection(&self) -> Result<(), FetchError> {
        let request = gcp_bigquery_client::model::query_request::QueryRequest::new("SELECT 1");

        self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| FetchError::RequestError(format!("Connection test failed: {}", e)))?;

        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn test_connection(&self) -> Result<(), FetchError> {
        Err(FetchError::ConfigError(NOT_COMPILED.to_string()))
    }
}

/// Convert a `tables.get` response body into [`TableMetadata`]
///
/// Timestamps arrive as epoch milliseconds, either as a string or as a
/// number. A missing last-modified time falls back to the creation time.
pub fn table_from_json(path: &TablePath, mut value: Value) -> Result<TableMetadata, FetchError> {
    strip_nulls(&mut value);

    let full_id = value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| path.full_id());

    let description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let creation_time = value
        .get("creationTime")
        .and_then(epoch_millis)
        .unwrap_or_default();
    let last_modified_time = value
        .get("lastModifiedTime")
        .and_then(epoch_millis)
        .unwrap_or(creation_time);

    let schema: Vec<SchemaField> = match value.pointer("/schema/fields") {
        Some(fields) => serde_json::from_value(fields.clone())
            .map_err(|e| FetchError::InvalidResponse(format!("Malformed schema for {}: {}", path, e)))?,
        None => Vec::new(),
    };

    Ok(TableMetadata {
        full_id,
        description,
        creation_time,
        last_modified_time,
        schema,
    })
}

fn epoch_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}
