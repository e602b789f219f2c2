//! BigQuery query parser
//!
//! A script is tokenized once, split at top-level `;`, and each statement
//! is handed to sqlparser's BigQuery grammar. The resulting AST is lowered
//! into a [`SyntaxTree`] whose nodes carry byte ranges. A syntax error drops
//! only the statement it occurs in.

use crate::ast::{AstKind, NodeId, SyntaxTree, TreeBuilder};
use crate::lexer::{scan, LineIndex, RawToken, Tok};
use crate::lower::Lowerer;
use bqls_core::{Diagnostic, DiagnosticCode, Severity, TextRange};
use sqlparser::ast::Statement;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;

/// Parser for BigQuery query scripts
#[derive(Debug, Clone, Default)]
pub struct SqlParser {}

impl SqlParser {
    pub fn new() -> Self {
        Self {}
    }

    /// Parse a script, failing on the first statement that does not parse
    pub fn parse(&self, sql: &str) -> Result<SyntaxTree, ParseError> {
        let script = self.parse_script(sql);
        match script.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(script.tree),
        }
    }

    /// Parse a script, keeping every statement that parses
    pub fn parse_script(&self, sql: &str) -> ParsedScript {
        let mut builder = TreeBuilder::default();
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        match scan(sql) {
            Ok(raw) => {
                let index = LineIndex::new(sql);
                for chunk in raw.split(|t| t.token.token == Token::SemiColon) {
                    let tokens: Vec<Tok> = chunk.iter().filter_map(RawToken::to_tok).collect();
                    if tokens.is_empty() {
                        continue;
                    }

                    let mark = builder.mark();
                    match parse_statement(chunk, &tokens, &index, &mut builder) {
                        Ok(statement) => statements.push(statement),
                        Err(err) => {
                            tracing::debug!(error = %err, code = %err.code, "statement skipped");
                            builder.rollback(mark);
                            errors.push(err);
                        }
                    }
                }
            }
            Err(err) => errors.push(ParseError::new(
                format!("Syntax error: {}", err.message),
                Some(TextRange::empty(err.offset)),
            )),
        }

        let root = builder.push(AstKind::Script, Some(TextRange::new(0, sql.len())), statements);
        ParsedScript {
            tree: builder.finish(root),
            errors,
        }
    }
}

/// Parse one `;`-free chunk of raw tokens and lower it into `builder`
fn parse_statement(
    chunk: &[RawToken],
    tokens: &[Tok],
    index: &LineIndex<'_>,
    builder: &mut TreeBuilder,
) -> Result<NodeId, ParseError> {
    let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
        return Err(ParseError::new("Syntax error: empty statement", None));
    };
    let range = first.range.cover(last.range);

    let dialect = BigQueryDialect {};
    let mut parser =
        Parser::new(&dialect).with_tokens_with_locations(chunk.iter().map(|t| t.token.clone()).collect());
    let statement = parser
        .parse_statement()
        .map_err(|err| syntax_error(err, index, tokens, range))?;

    let rest = parser.peek_token();
    if rest.token != Token::EOF {
        let offset = index.location(rest.span.start);
        return Err(ParseError::new(
            format!("Syntax error: Expected: end of statement, found: {}", rest.token),
            Some(token_span(tokens, offset)),
        ));
    }

    match statement {
        Statement::Query(query) => Lowerer::new(tokens, index, builder)
            .statement(&query, range)
            .map_err(|u| {
                ParseError::unsupported(format!("{} is not supported", u.what), u.span.or(Some(first.range)))
            }),
        _ => Err(ParseError::unsupported(
            format!("{} statements are not analyzed", first.kind.to_string().to_uppercase()),
            Some(first.range),
        )),
    }
}

/// Range of the token starting at `offset`, or an empty range there
fn token_span(tokens: &[Tok], offset: usize) -> TextRange {
    tokens
        .iter()
        .find(|t| t.range.start == offset)
        .map(|t| t.range)
        .unwrap_or(TextRange::empty(offset))
}

fn syntax_error(err: ParserError, index: &LineIndex<'_>, tokens: &[Tok], statement: TextRange) -> ParseError {
    let message = match err {
        ParserError::TokenizerError(message) | ParserError::ParserError(message) => message,
        ParserError::RecursionLimitExceeded => "query is nested too deeply".to_string(),
    };
    let (message, offset) = split_location(&message, index);
    // Errors at end of input carry no location
    let span = match offset {
        Some(offset) => token_span(tokens, offset),
        None => TextRange::empty(statement.end),
    };
    ParseError::new(format!("Syntax error: {message}"), Some(span))
}

/// Split sqlparser's ` at Line: L, Column: C` suffix off a message
fn split_location<'m>(message: &'m str, index: &LineIndex<'_>) -> (&'m str, Option<usize>) {
    const MARKER: &str = " at Line: ";
    let Some(at) = message.rfind(MARKER) else {
        return (message, None);
    };
    let Some((line, column)) = message[at + MARKER.len()..].split_once(", Column: ") else {
        return (message, None);
    };
    match (line.trim().parse::<usize>(), column.trim().parse::<usize>()) {
        (Ok(line), Ok(column)) => (&message[..at], Some(index.offset(line, column))),
        _ => (message, None),
    }
}

/// Result of parsing a whole script
#[derive(Debug, Clone)]
pub struct ParsedScript {
    /// Tree holding every statement that parsed
    pub tree: SyntaxTree,

    /// One error per statement that did not
    pub errors: Vec<ParseError>,
}

/// A statement that produced no tree
///
/// Either a syntax error, or valid SQL the tree has no shape for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<TextRange>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Option<TextRange>) -> Self {
        Self {
            code: DiagnosticCode::SqlParseError,
            message: message.into(),
            span,
        }
    }

    /// Valid SQL outside what the analyzer understands
    pub fn unsupported(message: impl Into<String>, span: Option<TextRange>) -> Self {
        Self {
            code: DiagnosticCode::UnsupportedSyntax,
            message: message.into(),
            span,
        }
    }

    /// Convert to a diagnostic; unsupported syntax is informational
    pub fn to_diagnostic(&self) -> Diagnostic {
        let severity = match self.code {
            DiagnosticCode::UnsupportedSyntax => Severity::Info,
            _ => Severity::Error,
        };
        Diagnostic::new(self.code, severity, self.message.clone()).with_span_opt(self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstRef, JoinKind, PathExpression, SetOp, TablePathExpression};
    use pretty_assertions::assert_eq;

    fn parse(sql: &str) -> SyntaxTree {
        SqlParser::new().parse(sql).unwrap()
    }

    fn find<'a>(tree: &'a SyntaxTree, name: &str) -> Vec<AstRef<'a>> {
        tree.root()
            .descendants()
            .filter(|n| n.kind().name() == name)
            .collect()
    }

    fn text<'s>(node: &AstRef<'_>, sql: &'s str) -> &'s str {
        node.range().and_then(|r| r.slice(sql)).unwrap_or("")
    }

    #[test]
    fn parse_simple_select() {
        let sql = "SELECT id, name FROM users";
        let tree = parse(sql);
        assert_eq!(tree.statements().count(), 1);
        assert_eq!(text(&tree.statements().next().unwrap(), sql), sql);

        let tables = find(&tree, "TablePathExpression");
        assert_eq!(tables.len(), 1);
        assert_eq!(text(&tables[0], sql), "users");

        let columns = find(&tree, "SelectColumn");
        assert_eq!(columns.len(), 2);
    }

    #[test]
    fn parse_qualified_and_quoted_paths() {
        let sql = "SELECT u.id FROM `proj.ds.users` AS u";
        let tree = parse(sql);

        let table = find(&tree, "TablePathExpression")
            .into_iter()
            .find_map(TablePathExpression::cast)
            .unwrap();
        assert_eq!(table.alias(), Some("u"));

        let path = table.path().unwrap();
        assert_eq!(path.names(), vec!["proj", "ds", "users"]);
        let ranges: Vec<&str> = path.identifiers().iter().map(|i| text(i, sql)).collect();
        assert_eq!(ranges, vec!["proj", "ds", "users"]);
    }

    #[test]
    fn parse_dashed_project_name() {
        let sql = "SELECT * FROM my-project.ds.t";
        let tree = parse(sql);
        assert_eq!(
            tree.table_paths().into_iter().map(|(p, _)| p).collect::<Vec<_>>(),
            vec!["my-project.ds.t".to_string()]
        );
        let (_, range) = &tree.table_paths()[0];
        assert_eq!(range.slice(sql), Some("my-project.ds.t"));
    }

    #[test]
    fn parse_joins_nest_left_deep() {
        let sql = "SELECT a.x FROM a JOIN b ON a.id = b.id LEFT JOIN c ON b.id = c.id";
        let tree = parse(sql);
        let joins = find(&tree, "Join");
        assert_eq!(joins.len(), 2);
        // Outer join covers everything after FROM
        assert_eq!(text(&joins[0], sql), "a JOIN b ON a.id = b.id LEFT JOIN c ON b.id = c.id");
        assert_eq!(text(&joins[1], sql), "a JOIN b ON a.id = b.id");
    }

    #[test]
    fn parse_with_clause() {
        let sql = "WITH c AS (SELECT 1 AS x) SELECT x FROM c";
        let tree = parse(sql);
        assert_eq!(tree.with_entry_names(), vec!["c"]);
        assert!(tree.table_paths().is_empty());
        assert_eq!(text(&find(&tree, "WithEntry")[0], sql), "c AS (SELECT 1 AS x)");
    }

    #[test]
    fn parse_function_calls_and_operators() {
        let sql = "SELECT UPPER(name), COUNT(*), a + b * 2 FROM t WHERE x IS NOT NULL AND y IN (1, 2)";
        let tree = parse(sql);

        let calls = find(&tree, "FunctionCall");
        assert_eq!(calls.len(), 2);
        assert_eq!(text(&calls[0], sql), "UPPER(name)");
        assert_eq!(text(&calls[1], sql), "COUNT(*)");

        let name = PathExpression::cast(calls[0].child(0).unwrap()).unwrap();
        assert_eq!(name.names(), vec!["UPPER"]);

        assert_eq!(find(&tree, "BinaryExpression").len(), 3);
        assert_eq!(text(&find(&tree, "IsNull")[0], sql), "x IS NOT NULL");
        assert_eq!(text(&find(&tree, "InList")[0], sql), "y IN (1, 2)");
    }

    #[test]
    fn parse_cast_case_and_struct_access() {
        let sql = "SELECT CAST(x AS INT64), CASE WHEN a THEN 1 ELSE 2 END, (s).field FROM t";
        let tree = parse(sql);
        let cast = &find(&tree, "Cast")[0];
        assert_eq!(text(cast, sql), "CAST(x AS INT64)");
        assert_eq!(text(&find(&tree, "TypeName")[0], sql), "INT64");
        assert_eq!(text(&find(&tree, "Case")[0], sql), "CASE WHEN a THEN 1 ELSE 2 END");
        assert_eq!(find(&tree, "DotIdentifier").len(), 1);
    }

    #[test]
    fn parse_order_by_and_limit() {
        let sql = "SELECT x FROM t ORDER BY x DESC LIMIT 10 OFFSET 5";
        let tree = parse(sql);
        let item = &find(&tree, "OrderingItem")[0];
        assert_eq!(item.kind(), &AstKind::OrderingItem { descending: true });
        assert_eq!(text(item, sql), "x DESC");
        let limit = &find(&tree, "Limit")[0];
        assert_eq!(limit.children().count(), 2);
        assert_eq!(text(limit, sql), "LIMIT 10 OFFSET 5");
    }

    #[test]
    fn trailing_comma_in_select_list() {
        let tree = parse("SELECT a, b, FROM t");
        assert_eq!(find(&tree, "SelectColumn").len(), 2);
    }

    #[test]
    fn parse_set_operations() {
        let sql = "SELECT id FROM a UNION ALL SELECT id FROM b EXCEPT DISTINCT SELECT id FROM c";
        let tree = parse(sql);
        let ops = find(&tree, "SetOperation");
        assert_eq!(ops.len(), 2);
        // Set operators are left-associative
        assert_eq!(
            ops[0].kind(),
            &AstKind::SetOperation {
                op: SetOp::Except,
                distinct: true
            }
        );
        assert_eq!(
            ops[1].kind(),
            &AstKind::SetOperation {
                op: SetOp::Union,
                distinct: false
            }
        );
        assert_eq!(text(&ops[1], sql), "SELECT id FROM a UNION ALL SELECT id FROM b");
        assert_eq!(tree.table_paths().len(), 3);
    }

    #[test]
    fn set_operation_needs_a_quantifier() {
        let err = SqlParser::new().parse("SELECT 1 UNION SELECT 2").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnsupportedSyntax);
    }

    #[test]
    fn parse_analytic_call_with_qualify_and_window() {
        let sql = "SELECT id, ROW_NUMBER() OVER (PARTITION BY dept ORDER BY id) AS rn, \
                   SUM(x) OVER w AS s FROM t QUALIFY rn = 1 WINDOW w AS (ORDER BY id)";
        let tree = parse(sql);

        let calls = find(&tree, "FunctionCall");
        assert_eq!(text(&calls[0], sql), "ROW_NUMBER() OVER (PARTITION BY dept ORDER BY id)");
        let spec = calls[0].children().last().unwrap();
        assert_eq!(spec.kind(), &AstKind::WindowSpec { base: None });
        assert_eq!(text(&spec, sql), "OVER (PARTITION BY dept ORDER BY id)");
        assert_eq!(text(&find(&tree, "PartitionBy")[0], sql), "PARTITION BY dept");

        let named = calls[1].children().last().unwrap();
        assert_eq!(
            named.kind(),
            &AstKind::WindowSpec {
                base: Some("w".to_string())
            }
        );

        assert_eq!(text(&find(&tree, "Qualify")[0], sql), "QUALIFY rn = 1");
        let window = &find(&tree, "NamedWindow")[0];
        assert_eq!(window.name(), Some("w"));
        assert_eq!(text(window, sql), "w AS (ORDER BY id)");
    }

    #[test]
    fn parse_unnest_with_offset() {
        let sql = "SELECT n, pos FROM t, UNNEST([1, 2]) AS n WITH OFFSET AS pos";
        let tree = parse(sql);
        let unnest = &find(&tree, "Unnest")[0];
        assert_eq!(text(unnest, sql), "UNNEST([1, 2]) AS n WITH OFFSET AS pos");
        assert_eq!(unnest.alias(), Some("n"));
        assert_eq!(text(&find(&tree, "ArrayLiteral")[0], sql), "[1, 2]");

        let offset = &find(&tree, "WithOffset")[0];
        assert_eq!(offset.alias(), Some("pos"));
        assert_eq!(find(&tree, "Join")[0].kind(), &AstKind::Join { kind: JoinKind::Comma });
    }

    #[test]
    fn parse_subqueries_and_array_access() {
        let sql = "SELECT arr[OFFSET(0)], (SELECT MAX(x) FROM u) FROM t WHERE id IN (SELECT id FROM v)";
        let tree = parse(sql);

        let element = &find(&tree, "ArrayElement")[0];
        assert_eq!(text(element, sql), "arr[OFFSET(0)]");

        let subqueries = find(&tree, "Subquery");
        assert_eq!(subqueries.len(), 2);
        assert_eq!(text(&subqueries[0], sql), "(SELECT MAX(x) FROM u)");
        assert_eq!(text(&subqueries[1], sql), "id IN (SELECT id FROM v)");
    }

    #[test]
    fn syntax_error_has_span() {
        let sql = "SELECT id FROM users WHERE )";
        let err = SqlParser::new().parse(sql).unwrap_err();
        assert!(err.message.starts_with("Syntax error"), "{}", err.message);
        assert!(!err.message.contains("Line:"), "{}", err.message);
        assert_eq!(err.span.unwrap().slice(sql), Some(")"));
        assert_eq!(err.to_diagnostic().code, DiagnosticCode::SqlParseError);
        assert_eq!(err.to_diagnostic().severity, Severity::Error);
    }

    #[test]
    fn error_at_end_of_input_points_at_statement_end() {
        let sql = "SELECT * FROM";
        let err = SqlParser::new().parse(sql).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::SqlParseError);
        assert_eq!(err.span, Some(TextRange::empty(sql.len())));
    }

    #[test]
    fn other_statements_are_informational() {
        let sql = "CREATE TABLE t (x INT64)";
        let err = SqlParser::new().parse(sql).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnsupportedSyntax);
        assert_eq!(err.span.unwrap().slice(sql), Some("CREATE"));

        let diagnostic = err.to_diagnostic();
        assert_eq!(diagnostic.code, DiagnosticCode::UnsupportedSyntax);
        assert_eq!(diagnostic.severity, Severity::Info);
    }

    #[test]
    fn script_keeps_statements_that_parse() {
        let sql = "SELECT 1;\nSELECT * FROM;\nSELECT 2";
        let script = SqlParser::new().parse_script(sql);
        assert_eq!(script.tree.statements().count(), 2);
        assert_eq!(script.errors.len(), 1);
        // Nodes of the failed statement are not left behind
        assert!(script
            .tree
            .root()
            .descendants()
            .filter_map(|n| n.range())
            .all(|r| r.end <= sql.len()));
        let texts: Vec<&str> = script.tree.statements().map(|s| text(&s, sql)).collect();
        assert_eq!(texts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn empty_script() {
        let script = SqlParser::new().parse_script("  -- nothing here\n;;");
        assert!(script.tree.is_empty());
        assert!(script.errors.is_empty());
    }

    #[test]
    fn tokenizer_error_is_reported() {
        let script = SqlParser::new().parse_script("SELECT 'unterminated");
        assert_eq!(script.errors.len(), 1);
        assert_eq!(script.errors[0].code, DiagnosticCode::SqlParseError);
    }

    #[test]
    fn parent_links() {
        let tree = parse("SELECT name FROM users");
        let path = find(&tree, "PathExpression")[0];
        let column = path.parent().unwrap();
        assert_eq!(column.kind(), &AstKind::SelectColumn);
        assert_eq!(tree.root().parent(), None);
    }
}
