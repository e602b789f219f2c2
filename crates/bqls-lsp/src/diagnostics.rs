//! Diagnostic scheduling
//!
//! Every document change sends an event to a single coordinator task. The
//! coordinator cancels the run still in flight for that URI and spawns a
//! fresh one, so at most one run per URI is live at a time. Runs publish
//! through a shared gate and re-check their token once inside it, which
//! keeps a superseded run from publishing after its replacement.

use crate::project::{Project, ProjectError};
use bqls_core::{Diagnostic as SqlDiagnostic, Severity, TextRange};
use bqls_sql::byte_offset_to_position;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{self, Diagnostic, DiagnosticSeverity, NumberOrString, Url};
use tower_lsp::Client;

/// Where finished diagnostics go
#[async_trait::async_trait]
pub trait DiagnosticsSink: Send + Sync + 'static {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>);
}

#[async_trait::async_trait]
impl DiagnosticsSink for Client {
    async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.publish_diagnostics(uri, diagnostics, None).await;
    }
}

fn to_lsp_position(text: &str, offset: usize) -> lsp_types::Position {
    byte_offset_to_position(text, offset)
        .map(|p| lsp_types::Position::new(p.line, p.character))
        .unwrap_or_default()
}

fn to_lsp_range(text: &str, span: Option<TextRange>) -> lsp_types::Range {
    match span {
        Some(span) => lsp_types::Range::new(to_lsp_position(text, span.start), to_lsp_position(text, span.end)),
        None => lsp_types::Range::default(),
    }
}

/// Convert an analysis diagnostic to its LSP form
pub fn to_lsp_diagnostic(text: &str, diagnostic: &SqlDiagnostic) -> Diagnostic {
    let severity = match diagnostic.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warn => DiagnosticSeverity::WARNING,
        Severity::Info => DiagnosticSeverity::INFORMATION,
    };

    Diagnostic {
        range: to_lsp_range(text, diagnostic.span),
        severity: Some(severity),
        code: Some(NumberOrString::String(diagnostic.code.as_str().to_string())),
        source: Some("bqls".to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

#[derive(Debug)]
enum Event {
    Changed(Url),
    Closed(Url),
}

/// Handle for requesting diagnostic runs
///
/// Cheap to clone. The coordinator stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct DiagnosticScheduler {
    events: mpsc::UnboundedSender<Event>,
}

impl DiagnosticScheduler {
    /// Start the coordinator on the current tokio runtime
    pub fn spawn(project: Arc<Project>, sink: Arc<dyn DiagnosticsSink>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(coordinate(receiver, project, sink));
        Self { events }
    }

    /// Schedule a run for `uri`, superseding any run in flight
    pub fn notify(&self, uri: Url) {
        if self.events.send(Event::Changed(uri)).is_err() {
            tracing::warn!("diagnostic coordinator has stopped");
        }
    }

    /// Cancel any run for `uri` and clear its published diagnostics
    pub fn notify_closed(&self, uri: Url) {
        if self.events.send(Event::Closed(uri)).is_err() {
            tracing::warn!("diagnostic coordinator has stopped");
        }
    }
}

async fn coordinate(mut receiver: mpsc::UnboundedReceiver<Event>, project: Arc<Project>, sink: Arc<dyn DiagnosticsSink>) {
    let mut pending: HashMap<Url, CancellationToken> = HashMap::new();
    let gate = Arc::new(Mutex::new(()));

    while let Some(event) = receiver.recv().await {
        match event {
            Event::Changed(uri) => {
                if let Some(previous) = pending.remove(&uri) {
                    previous.cancel();
                }

                let token = CancellationToken::new();
                tokio::spawn(run(
                    uri.clone(),
                    token.clone(),
                    Arc::clone(&project),
                    Arc::clone(&sink),
                    Arc::clone(&gate),
                ));
                pending.insert(uri, token);
            }
            Event::Closed(uri) => {
                if let Some(previous) = pending.remove(&uri) {
                    previous.cancel();
                }

                tokio::spawn(clear(uri, Arc::clone(&sink), Arc::clone(&gate)));
            }
        }
    }

    tracing::debug!("diagnostic coordinator stopped");
}

async fn clear(uri: Url, sink: Arc<dyn DiagnosticsSink>, gate: Arc<Mutex<()>>) {
    let _guard = gate.lock().await;
    tracing::debug!(uri = %uri, "clearing diagnostics");
    sink.publish(uri, Vec::new()).await;
}

async fn run(
    uri: Url,
    token: CancellationToken,
    project: Arc<Project>,
    sink: Arc<dyn DiagnosticsSink>,
    gate: Arc<Mutex<()>>,
) {
    let diagnostics = match project.diagnose(&uri, &token).await {
        Ok(diagnostics) => diagnostics,
        Err(ProjectError::Cancelled) => return,
        Err(err) => {
            tracing::warn!(uri = %uri, error = %err, "diagnostic run failed");
            return;
        }
    };

    let _guard = gate.lock().await;
    if token.is_cancelled() {
        return;
    }
    for (file, list) in diagnostics {
        tracing::debug!(uri = %file, count = list.len(), "publishing diagnostics");
        sink.publish(file, list).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqls_catalog::MockStoreBuilder;
    use bqls_core::{Config, SchemaField, TableMetadata};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        published: Mutex<Vec<(Url, Vec<Diagnostic>)>>,
    }

    #[async_trait::async_trait]
    impl DiagnosticsSink for CollectingSink {
        async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
            self.published.lock().await.push((uri, diagnostics));
        }
    }

    fn uri() -> Url {
        Url::parse("file:///work/query.sql").unwrap()
    }

    fn project(latency_ms: u64) -> Arc<Project> {
        let store = MockStoreBuilder::new()
            .with_table(
                "proj.ds.users",
                TableMetadata::new("proj:ds.users", Default::default(), vec![SchemaField::new("id", "INTEGER")]),
            )
            .with_latency(latency_ms)
            .build();
        let config = Config {
            project_id: Some("proj".to_string()),
            ..Config::default()
        };
        Arc::new(Project::new(config, Arc::new(store)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn test_publishes_diagnostics() {
        let project = project(0);
        let sink = Arc::new(CollectingSink::default());
        let scheduler = DiagnosticScheduler::spawn(Arc::clone(&project), sink.clone());

        project.update_file(uri(), "SELECT missing FROM ds.users".into(), 1).await;
        scheduler.notify(uri());
        settle().await;

        let published = sink.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, uri());
        assert_eq!(published[0].1.len(), 1);
        assert_eq!(published[0].1[0].message, "Unrecognized name: missing");
    }

    #[tokio::test]
    async fn test_rapid_changes_publish_once() {
        let project = project(100);
        let sink = Arc::new(CollectingSink::default());
        let scheduler = DiagnosticScheduler::spawn(Arc::clone(&project), sink.clone());

        project.update_file(uri(), "SELECT missing FROM ds.users".into(), 1).await;
        scheduler.notify(uri());
        tokio::time::sleep(Duration::from_millis(20)).await;
        project.update_file(uri(), "SELECT id FROM ds.users".into(), 2).await;
        scheduler.notify(uri());
        settle().await;

        let published = sink.published.lock().await;
        assert_eq!(published.len(), 1);
        assert!(published[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_close_cancels_and_clears() {
        let project = project(100);
        let sink = Arc::new(CollectingSink::default());
        let scheduler = DiagnosticScheduler::spawn(Arc::clone(&project), sink.clone());

        project.update_file(uri(), "SELECT missing FROM ds.users".into(), 1).await;
        scheduler.notify(uri());
        tokio::time::sleep(Duration::from_millis(20)).await;
        project.delete_file(&uri()).await;
        scheduler.notify_closed(uri());
        settle().await;

        let published = sink.published.lock().await;
        assert_eq!(published.len(), 1);
        assert!(published[0].1.is_empty());
    }

    /// Holds every publish until released
    struct BlockingSink {
        release: tokio::sync::Notify,
        published: Mutex<Vec<(Url, Vec<Diagnostic>)>>,
    }

    #[async_trait::async_trait]
    impl DiagnosticsSink for BlockingSink {
        async fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
            self.release.notified().await;
            self.published.lock().await.push((uri, diagnostics));
        }
    }

    #[tokio::test]
    async fn test_slow_clear_does_not_stall_other_documents() {
        let store = MockStoreBuilder::new()
            .with_table(
                "proj.ds.users",
                TableMetadata::new("proj:ds.users", Default::default(), vec![SchemaField::new("id", "INTEGER")]),
            )
            .build();
        let config = Config {
            project_id: Some("proj".to_string()),
            ..Config::default()
        };
        let project = Arc::new(Project::new(config, Arc::new(store.clone())));
        let sink = Arc::new(BlockingSink {
            release: tokio::sync::Notify::new(),
            published: Mutex::new(Vec::new()),
        });
        let scheduler = DiagnosticScheduler::spawn(Arc::clone(&project), sink.clone());
        let other = Url::parse("file:///work/other.sql").unwrap();

        scheduler.notify_closed(uri());
        project.update_file(other.clone(), "SELECT missing FROM ds.users".into(), 1).await;
        scheduler.notify(other.clone());
        settle().await;

        // The run for the other document was spawned and analyzed while the clear holds the gate
        assert_eq!(store.call_count(), 1);
        assert!(sink.published.lock().await.is_empty());

        // Both publishes are queued behind the gate; release them in order
        sink.release.notify_one();
        settle().await;
        sink.release.notify_one();
        settle().await;

        let published = sink.published.lock().await;
        let uris: Vec<&Url> = published.iter().map(|(u, _)| u).collect();
        assert_eq!(uris, vec![&uri(), &other]);
        assert!(published[0].1.is_empty());
        assert_eq!(published[1].1[0].message, "Unrecognized name: missing");
    }

    #[tokio::test]
    async fn test_missing_document_publishes_nothing() {
        let sink = Arc::new(CollectingSink::default());
        let scheduler = DiagnosticScheduler::spawn(project(0), sink.clone());

        scheduler.notify(uri());
        settle().await;

        assert!(sink.published.lock().await.is_empty());
    }

    #[test]
    fn test_to_lsp_diagnostic() {
        let text = "SELECT 1;\nSELECT nope";
        let diagnostic = SqlDiagnostic::error(bqls_core::DiagnosticCode::SqlAnalysisError, "Unrecognized name: nope")
            .with_span(TextRange::new(17, 21));

        let converted = to_lsp_diagnostic(text, &diagnostic);
        assert_eq!(converted.severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(converted.source.as_deref(), Some("bqls"));
        assert_eq!(converted.code, Some(NumberOrString::String("SQL_ANALYSIS_ERROR".to_string())));
        assert_eq!(
            converted.range,
            lsp_types::Range::new(lsp_types::Position::new(1, 7), lsp_types::Position::new(1, 11))
        );

        let unspanned = SqlDiagnostic::warning(bqls_core::DiagnosticCode::MetadataUnavailable, "offline");
        let converted = to_lsp_diagnostic(text, &unspanned);
        assert_eq!(converted.severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(converted.range, lsp_types::Range::default());
    }
}
