//! SQL parsing and analysis for BigQuery
//!
//! This crate handles:
//! - Tokenizing with sqlparser's BigQuery dialect
//! - Parsing statements with sqlparser and lowering them into a
//!   byte-ranged surface tree
//! - Resolving names and types into per-statement scan trees
//! - Mapping editor positions to byte offsets
//! - Locating nodes of either tree at an offset

pub mod analyzer;
pub mod ast;
pub mod file;
pub mod functions;
pub mod lexer;
pub mod locator;
mod lower;
pub mod parser;
pub mod position;
pub mod resolved;

pub use analyzer::{AnalysisError, Analyzer, Catalog, SimpleCatalog};
pub use ast::{AstKind, AstRef, PathExpression, SelectColumn, SyntaxTree, TablePathExpression};
pub use file::{AnalysisOutput, ParsedFile};
pub use functions::Function;
pub use locator::{lookup_node, search_node, search_nodes, NodeKind, TreeNode};
pub use parser::{ParseError, ParsedScript, SqlParser};
pub use position::{byte_offset_to_position, position_to_byte_offset, Position, PositionError};
pub use resolved::{ColumnRef, Expr, FunctionCall, GetStructField, QueryStatement, ResolvedNode, Scan};
