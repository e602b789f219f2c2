//! BigQuery SQL language server
//!
//! Answers hover requests and publishes diagnostics for BigQuery SQL
//! documents, using table metadata fetched from BigQuery (or offline
//! snapshots).
//!
//! ## Usage
//!
//! The server talks LSP over stdin/stdout:
//!
//! ```bash
//! bqls --project-id my-project
//! ```

mod backend;
pub mod diagnostics;
pub mod documents;
mod hover;
pub mod project;

pub use backend::Backend;
pub use diagnostics::{to_lsp_diagnostic, DiagnosticScheduler, DiagnosticsSink};
pub use documents::{Document, DocumentCache};
pub use project::{Project, ProjectError};
