//! Parsed-file artifact
//!
//! A [`ParsedFile`] binds one snapshot of a document's text to everything
//! derived from it. It is built once and never mutated; callers share it
//! behind an `Arc` and rebuild it when the fingerprint no longer matches.

use crate::analyzer::{Analyzer, Catalog};
use crate::ast::SyntaxTree;
use crate::parser::{ParseError, ParsedScript, SqlParser};
use crate::resolved::{QueryStatement, ResolvedNode};
use bqls_core::{Diagnostic, TextRange};
use sha2::{Digest, Sha256};

/// Resolved tree of one statement
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub statement: QueryStatement,
    pub range: Option<TextRange>,
}

impl AnalysisOutput {
    pub fn root(&self) -> ResolvedNode<'_> {
        ResolvedNode::Statement(&self.statement)
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.range.is_some_and(|r| r.contains(offset))
    }
}

#[derive(Debug)]
pub struct ParsedFile {
    pub text: String,

    /// SHA-256 of `text`, hex encoded
    pub fingerprint: String,

    pub tree: SyntaxTree,

    /// One output per statement that analyzed cleanly, in source order
    pub outputs: Vec<AnalysisOutput>,

    pub diagnostics: Vec<Diagnostic>,
}

impl ParsedFile {
    /// Analyze every statement of a parsed script against `catalog`
    ///
    /// `extra` diagnostics (metadata warnings and the like) are appended
    /// after the parse and analysis diagnostics.
    pub fn build(
        text: impl Into<String>,
        script: ParsedScript,
        catalog: &dyn Catalog,
        extra: Vec<Diagnostic>,
    ) -> Self {
        let text = text.into();
        let ParsedScript { tree, errors } = script;

        let mut diagnostics: Vec<Diagnostic> = errors.iter().map(ParseError::to_diagnostic).collect();
        let mut outputs = Vec::new();
        let mut analyzer = Analyzer::new(catalog);

        for statement in tree.statements() {
            match analyzer.analyze_statement(statement) {
                Ok(resolved) => outputs.push(AnalysisOutput {
                    range: resolved.range,
                    statement: resolved,
                }),
                Err(err) => {
                    tracing::debug!(error = %err, "statement failed analysis");
                    diagnostics.push(err.to_diagnostic());
                }
            }
        }
        diagnostics.extend(extra);

        Self {
            fingerprint: Self::fingerprint_of(&text),
            text,
            tree,
            outputs,
            diagnostics,
        }
    }

    /// Parse and analyze `text` in one go
    pub fn analyze(text: &str, catalog: &dyn Catalog) -> Self {
        let script = SqlParser::new().parse_script(text);
        Self::build(text, script, catalog, Vec::new())
    }

    pub fn fingerprint_of(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Whether this artifact was built from `text`
    pub fn is_current(&self, text: &str) -> bool {
        self.fingerprint == Self::fingerprint_of(text)
    }

    /// The statement output whose range contains `offset`
    pub fn find_target_output(&self, offset: usize) -> Option<&AnalysisOutput> {
        self.outputs.iter().find(|output| output.contains(offset))
    }
}
