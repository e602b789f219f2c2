//! Project: documents, parsed files and table metadata
//!
//! The [`Project`] is the one place that knows how to turn the current
//! text of a document into a [`ParsedFile`]. Parsed files are cached per
//! URI and reused while their fingerprint matches the document text.

use crate::diagnostics::to_lsp_diagnostic;
use crate::documents::{Document, DocumentCache};
use bqls_catalog::{FetchError, MetadataStore, TablePath};
use bqls_core::{Config, Diagnostic as SqlDiagnostic, DiagnosticCode, TableMetadata};
use bqls_sql::{ParsedFile, Position, PositionError, SimpleCatalog, SqlParser};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{self, MarkedString, Url};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Url),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to get table metadata: {0}")]
    Metadata(#[from] FetchError),

    #[error("Failed to render hover: {0}")]
    Render(String),
}

pub struct Project {
    config: Config,
    documents: DocumentCache,
    parsed: RwLock<HashMap<Url, Arc<ParsedFile>>>,
    store: Arc<dyn MetadataStore>,
    parser: SqlParser,
}

impl Project {
    pub fn new(config: Config, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            config,
            documents: DocumentCache::new(),
            parsed: RwLock::new(HashMap::new()),
            store,
            parser: SqlParser::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn update_file(&self, uri: Url, text: String, version: i32) {
        self.parsed.write().await.remove(&uri);
        self.documents.put(uri, text, version).await;
    }

    pub async fn get_file(&self, uri: &Url) -> Option<Document> {
        self.documents.get(uri).await
    }

    pub async fn delete_file(&self, uri: &Url) {
        self.parsed.write().await.remove(uri);
        self.documents.delete(uri).await;
    }

    /// Parse and analyze the current text of `uri`
    ///
    /// Reuses the cached artifact while it matches the document text.
    /// Artifacts built while some table metadata was unavailable are
    /// never cached. Table metadata is fetched for every table path in the file before
    /// analysis; `cancel` aborts those fetches.
    pub async fn parse_file(&self, uri: &Url, cancel: &CancellationToken) -> Result<Arc<ParsedFile>, ProjectError> {
        let document = self
            .documents
            .get(uri)
            .await
            .ok_or_else(|| ProjectError::DocumentNotFound(uri.clone()))?;

        if let Some(cached) = self.parsed.read().await.get(uri) {
            if cached.is_current(&document.text) {
                return Ok(Arc::clone(cached));
            }
        }

        let script = self.parser.parse_script(&document.text);
        let mut catalog = SimpleCatalog::new();
        let mut warnings = Vec::new();
        let mut unavailable = HashSet::new();

        for (path, range) in script.tree.table_paths() {
            match self.fetch_table(&path, cancel).await {
                Ok(metadata) => catalog.add_table(path, metadata),
                Err(ProjectError::Metadata(err)) if !err.is_not_found() => {
                    tracing::warn!(uri = %uri, table = %path, error = %err, "table metadata unavailable");
                    warnings.push(
                        SqlDiagnostic::warning(
                            DiagnosticCode::MetadataUnavailable,
                            format!("Metadata unavailable for {path}: {err}"),
                        )
                        .with_span(range),
                    );
                    unavailable.insert(format!("Table not found: {path}"));
                }
                Err(ProjectError::Metadata(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let mut file = ParsedFile::build(document.text, script, &catalog, warnings);
        // A table that could not be fetched is not known to be missing
        file.diagnostics.retain(|d| {
            !(d.code == DiagnosticCode::TableNotFound && unavailable.contains(&d.message))
        });

        let file = Arc::new(file);
        // A degraded artifact is rebuilt on the next request
        if unavailable.is_empty() {
            self.parsed.write().await.insert(uri.clone(), Arc::clone(&file));
        }
        tracing::debug!(uri = %uri, outputs = file.outputs.len(), diagnostics = file.diagnostics.len(), "parsed file");
        Ok(file)
    }

    /// Fetch metadata for a table path as written in SQL
    pub async fn fetch_table(&self, written: &str, cancel: &CancellationToken) -> Result<TableMetadata, ProjectError> {
        let path = TablePath::parse(written, self.config.project_id.as_deref())?;
        let timeout_ms = self.config.metadata.request_timeout_ms;

        tokio::select! {
            _ = cancel.cancelled() => Err(ProjectError::Cancelled),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), self.store.get_table_metadata(&path)) => {
                match result {
                    Ok(fetched) => Ok(fetched?),
                    Err(_) => Err(FetchError::Timeout(timeout_ms).into()),
                }
            }
        }
    }

    /// Diagnostics of `uri`, keyed by the file they belong to
    pub async fn diagnose(
        &self,
        uri: &Url,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Url, Vec<lsp_types::Diagnostic>>, ProjectError> {
        let file = self.parse_file(uri, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ProjectError::Cancelled);
        }

        let diagnostics = file
            .diagnostics
            .iter()
            .map(|d| to_lsp_diagnostic(&file.text, d))
            .collect();
        Ok(HashMap::from([(uri.clone(), diagnostics)]))
    }

    /// Hover contents at `position`; empty when there is nothing to show
    pub async fn hover(&self, uri: &Url, position: Position) -> Result<Vec<MarkedString>, ProjectError> {
        crate::hover::resolve(self, uri, position).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqls_catalog::{MockStore, MockStoreBuilder};
    use bqls_core::SchemaField;
    use pretty_assertions::assert_eq;
    use tower_lsp::lsp_types::DiagnosticSeverity;

    fn uri() -> Url {
        Url::parse("file:///work/query.sql").unwrap()
    }

    fn config() -> Config {
        Config {
            project_id: Some("proj".to_string()),
            ..Config::default()
        }
    }

    fn users() -> TableMetadata {
        TableMetadata::new(
            "proj:ds.users",
            Default::default(),
            vec![SchemaField::new("id", "INTEGER")],
        )
    }

    #[tokio::test]
    async fn test_parse_file_is_cached_until_the_text_changes() {
        let store = MockStoreBuilder::new().with_table("proj.ds.users", users()).build();
        let project = Project::new(config(), Arc::new(store.clone()));
        let cancel = CancellationToken::new();

        project.update_file(uri(), "SELECT id FROM ds.users".into(), 1).await;
        let first = project.parse_file(&uri(), &cancel).await.unwrap();
        let second = project.parse_file(&uri(), &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.call_count(), 1);

        project.update_file(uri(), "SELECT id, id FROM ds.users".into(), 2).await;
        let third = project.parse_file(&uri(), &cancel).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_missing_document() {
        let project = Project::new(config(), Arc::new(MockStore::new()));
        let err = project.parse_file(&uri(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProjectError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_table_is_an_error_diagnostic() {
        let project = Project::new(config(), Arc::new(MockStore::new()));
        let text = "SELECT *\nFROM ds.nope";
        project.update_file(uri(), text.into(), 1).await;

        let diagnostics = project.diagnose(&uri(), &CancellationToken::new()).await.unwrap();
        let diagnostics = &diagnostics[&uri()];
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Table not found: ds.nope");
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(
            diagnostics[0].range,
            lsp_types::Range::new(lsp_types::Position::new(1, 5), lsp_types::Position::new(1, 12))
        );
    }

    #[tokio::test]
    async fn test_transient_failures_become_warnings() {
        let store = MockStoreBuilder::new()
            .with_error("proj.ds.users", FetchError::PermissionDenied("denied".into()))
            .build();
        let project = Project::new(config(), Arc::new(store));
        project.update_file(uri(), "SELECT id FROM ds.users".into(), 1).await;

        let file = project.parse_file(&uri(), &CancellationToken::new()).await.unwrap();
        let codes: Vec<DiagnosticCode> = file.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::MetadataUnavailable]);
    }

    #[tokio::test]
    async fn test_recovers_once_metadata_is_reachable_again() {
        let store = MockStoreBuilder::new()
            .with_table(
                "proj.ds.users",
                TableMetadata::new(
                    "proj:ds.users",
                    Default::default(),
                    vec![SchemaField::new("id", "INTEGER"), SchemaField::new("name", "STRING")],
                ),
            )
            .with_error("proj.ds.users", FetchError::NetworkError("offline".into()))
            .build();
        let project = Project::new(config(), Arc::new(store.clone()));
        let text = "SELECT name FROM ds.users";
        project.update_file(uri(), text.into(), 1).await;
        let cancel = CancellationToken::new();
        let name = Position::new(0, 8);

        assert!(project.hover(&uri(), name).await.unwrap().is_empty());
        let diagnostics = project.diagnose(&uri(), &cancel).await.unwrap();
        assert_eq!(diagnostics[&uri()].len(), 1);
        assert_eq!(diagnostics[&uri()][0].severity, Some(DiagnosticSeverity::WARNING));

        // Same text, metadata back
        store.clear_errors().await;
        let hover = project.hover(&uri(), name).await.unwrap();
        assert_eq!(hover.len(), 1);
        assert!(project.diagnose(&uri(), &cancel).await.unwrap()[&uri()].is_empty());

        let file = project.parse_file(&uri(), &cancel).await.unwrap();
        assert_eq!(file.outputs.len(), 1);
        let calls = store.call_count();
        let again = project.parse_file(&uri(), &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&file, &again));
        assert_eq!(store.call_count(), calls);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = MockStoreBuilder::new()
            .with_table("proj.ds.users", users())
            .with_latency(500)
            .build();
        let mut config = config();
        config.metadata.request_timeout_ms = 10;
        let project = Project::new(config, Arc::new(store));

        let err = project
            .fetch_table("ds.users", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectError::Metadata(FetchError::Timeout(10))));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_fetches() {
        let store = MockStoreBuilder::new()
            .with_table("proj.ds.users", users())
            .with_latency(500)
            .build();
        let project = Project::new(config(), Arc::new(store));
        project.update_file(uri(), "SELECT id FROM ds.users".into(), 1).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = project.diagnose(&uri(), &cancel).await.unwrap_err();
        assert!(matches!(err, ProjectError::Cancelled));
    }

    #[tokio::test]
    async fn test_delete_forgets_the_document() {
        let project = Project::new(config(), Arc::new(MockStore::new()));
        project.update_file(uri(), "SELECT 1".into(), 1).await;
        assert_eq!(project.get_file(&uri()).await.map(|d| d.version), Some(1));

        project.delete_file(&uri()).await;
        assert!(project.get_file(&uri()).await.is_none());
    }
}
