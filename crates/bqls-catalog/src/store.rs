//! Metadata store trait for fetching table metadata

use bqls_core::TableMetadata;
use std::fmt;

/// Identifies a BigQuery table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePath {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TablePath {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Parse a table path as written in SQL
    ///
    /// Accepts `project.dataset.table`, `project:dataset.table` and
    /// `dataset.table`; the last form needs `default_project`.
    pub fn parse(path: &str, default_project: Option<&str>) -> Result<Self, FetchError> {
        let normalized = path.replacen(':', ".", 1);
        let parts: Vec<&str> = normalized.split('.').collect();

        if parts.iter().any(|p| p.is_empty()) {
            return Err(FetchError::InvalidPath(path.to_string()));
        }

        match parts.as_slice() {
            [project, dataset, table] => Ok(Self::new(*project, *dataset, *table)),
            [dataset, table] => match default_project {
                Some(project) => Ok(Self::new(project, *dataset, *table)),
                None => Err(FetchError::ConfigError(format!(
                    "Table {path} has no project and no default project_id is configured"
                ))),
            },
            _ => Err(FetchError::InvalidPath(path.to_string())),
        }
    }

    /// `project.dataset.table`, used as the cache and snapshot key
    pub fn canonical(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }

    /// `project:dataset.table`, the form BigQuery reports as the table id
    pub fn full_id(&self) -> String {
        format!("{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Errors that can occur when fetching table metadata
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid table path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FetchError {
    /// The table definitively does not exist
    ///
    /// Every other variant is transient or environmental; callers degrade
    /// instead of reporting the table as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::TableNotFound(_) | FetchError::InvalidPath(_))
    }
}

/// Source of table metadata
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Store name for logs (e.g., "BigQuery", "Offline")
    fn name(&self) -> &'static str;

    /// Fetch metadata for one table
    async fn get_table_metadata(&self, path: &TablePath) -> Result<TableMetadata, FetchError>;

    /// Check that the store is reachable and credentials work
    async fn test_connection(&self) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_paths() {
        let path = TablePath::parse("my-project.ds.users", None).unwrap();
        assert_eq!(path, TablePath::new("my-project", "ds", "users"));
        assert_eq!(path.canonical(), "my-project.ds.users");
        assert_eq!(path.full_id(), "my-project:ds.users");
        assert_eq!(path.to_string(), "my-project.ds.users");

        let legacy = TablePath::parse("my-project:ds.users", None).unwrap();
        assert_eq!(legacy, path);

        let short = TablePath::parse("ds.users", Some("default-proj")).unwrap();
        assert_eq!(short.canonical(), "default-proj.ds.users");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            TablePath::parse("ds.users", None),
            Err(FetchError::ConfigError(_))
        ));
        assert!(TablePath::parse("users", Some("p")).unwrap_err().is_not_found());
        assert!(TablePath::parse("a.b.c.d", None).unwrap_err().is_not_found());
        assert!(TablePath::parse("a..c", None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(FetchError::TableNotFound("t".into()).is_not_found());
        assert!(!FetchError::Timeout(100).is_not_found());
        assert!(!FetchError::PermissionDenied("t".into()).is_not_found());
        assert_eq!(
            FetchError::Timeout(250).to_string(),
            "Request timed out after 250 ms"
        );
    }
}
