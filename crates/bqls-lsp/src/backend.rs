//! LSP backend
//!
//! Wires the tower-lsp request handlers to the [`Project`]. Document
//! lifecycle notifications update the project and hand the URI to the
//! [`DiagnosticScheduler`]; hover requests are answered directly.

use crate::diagnostics::DiagnosticScheduler;
use crate::project::Project;
use bqls_sql::Position;
use std::sync::Arc;
use tower_lsp::jsonrpc::{Error, ErrorCode, Result};
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, Hover, HoverContents, HoverParams, HoverProviderCapability,
    InitializeParams, InitializeResult, InitializedParams, MessageType, ServerCapabilities, ServerInfo,
    TextDocumentSyncCapability, TextDocumentSyncKind, Url,
};
use tower_lsp::{Client, LanguageServer};

/// LSP backend for BigQuery SQL
pub struct Backend {
    /// LSP client for communicating with the editor
    client: Client,
    project: Arc<Project>,
    scheduler: DiagnosticScheduler,
}

impl Backend {
    /// Create a backend and start its diagnostic coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(client: Client, project: Arc<Project>) -> Self {
        let scheduler = DiagnosticScheduler::spawn(Arc::clone(&project), Arc::new(client.clone()));
        Self {
            client,
            project,
            scheduler,
        }
    }

    async fn document_changed(&self, uri: Url, text: String, version: i32) {
        self.project.update_file(uri.clone(), text, version).await;
        if self.project.config().diagnostics.enabled {
            self.scheduler.notify(uri);
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("language server initialized");
        self.client
            .log_message(MessageType::INFO, "bqls initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutdown requested");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        tracing::debug!(uri = %document.uri, version = document.version, "did open");
        self.document_changed(document.uri, document.text, document.version)
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Full sync: the last change carries the whole text
        if let Some(change) = params.content_changes.into_iter().last() {
            self.document_changed(uri, change.text, version).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;

        match params.text {
            Some(text) => {
                let version = self
                    .project
                    .get_file(&uri)
                    .await
                    .map(|d| d.version)
                    .unwrap_or_default();
                self.document_changed(uri, text, version).await;
            }
            None if self.project.config().diagnostics.enabled => self.scheduler.notify(uri),
            None => {}
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::debug!(uri = %uri, "did close");
        self.project.delete_file(&uri).await;
        self.scheduler.notify_closed(uri);
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        match self
            .project
            .hover(&uri, Position::new(position.line, position.character))
            .await
        {
            Ok(contents) if contents.is_empty() => Ok(None),
            Ok(contents) => Ok(Some(Hover {
                contents: HoverContents::Array(contents),
                range: None,
            })),
            Err(err) => {
                tracing::error!(uri = %uri, error = %err, "hover failed");
                self.client
                    .log_message(MessageType::ERROR, format!("Hover failed: {}", err))
                    .await;
                Err(Error {
                    code: ErrorCode::InternalError,
                    message: err.to_string().into(),
                    data: None,
                })
            }
        }
    }
}
