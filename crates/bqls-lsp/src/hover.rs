//! Hover resolution
//!
//! Strategies run in order and the first one producing content wins:
//!
//! 1. table reference in a FROM clause (metadata block plus YAML schema)
//! 2. function call (signatures)
//! 3. struct field access (result type)
//! 4. column reference (schema field, or the inferred type)
//! 5. select-list item (column of the narrowest enclosing scan)
//!
//! Only the table strategy fails hard when metadata cannot be fetched. The
//! column strategies fall back to the type known from analysis.

use crate::project::{Project, ProjectError};
use bqls_core::TableMetadata;
use bqls_core::TextRange;
use bqls_sql::resolved::{AnalyticFunctionCall, Column};
use bqls_sql::{
    lookup_node, position_to_byte_offset, search_node, search_nodes, AnalysisOutput, AstKind, AstRef, ColumnRef,
    Function, FunctionCall, GetStructField, PathExpression, Position, Scan, SelectColumn, TablePathExpression,
};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{MarkedString, Url};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) async fn resolve(project: &Project, uri: &Url, position: Position) -> Result<Vec<MarkedString>, ProjectError> {
    let cancel = CancellationToken::new();
    let file = project.parse_file(uri, &cancel).await?;
    let offset = position_to_byte_offset(&file.text, position)?;

    let Some(path) = search_node::<_, PathExpression>(file.tree.root(), offset) else {
        tracing::debug!(uri = %uri, offset, "no path expression at offset");
        return Ok(Vec::new());
    };

    if let Some(table) = table_reference(path) {
        let metadata = project.fetch_table(&table, &cancel).await?;
        return render_table(&metadata);
    }

    let Some(output) = file.find_target_output(offset) else {
        tracing::debug!(uri = %uri, offset, "no analyzed statement at offset");
        return Ok(Vec::new());
    };

    if let Some(function) = called_function(output, offset) {
        return Ok(vec![markdown(format!(
            "## {}\n\n{}",
            function.name,
            function.signatures_text()
        ))]);
    }

    if let Some(access) = search_node::<_, &GetStructField>(output.root(), offset) {
        return Ok(vec![markdown(access.field_type.to_string())]);
    }

    if let Some(column_ref) = search_node::<_, &ColumnRef>(output.root(), offset) {
        return Ok(column_hover(project, &column_ref.column, &cancel).await);
    }

    if let Some(select_column) = lookup_node::<_, SelectColumn>(path.node()) {
        if let Some(column) = select_column_target(output, select_column, path, offset) {
            return Ok(column_hover(project, &column, &cancel).await);
        }
    }

    Ok(Vec::new())
}

/// Function of the narrowest call, windowed or not, around `offset`
fn called_function(output: &AnalysisOutput, offset: usize) -> Option<&Function> {
    let width = |range: Option<TextRange>| range.map(|r| r.width()).unwrap_or(usize::MAX);
    let plain = search_node::<_, &FunctionCall>(output.root(), offset).map(|c| (c.function.as_ref(), width(c.range)));
    let analytic = search_node::<_, &AnalyticFunctionCall>(output.root(), offset)
        .map(|c| (c.function.as_ref(), width(c.range)));

    match (plain, analytic) {
        (Some(plain), Some(analytic)) if analytic.1 < plain.1 => Some(analytic.0),
        (Some((function, _)), _) | (None, Some((function, _))) => Some(function),
        (None, None) => None,
    }
}

/// Dotted table path when `path` is a FROM-clause table that is not a WITH entry
fn table_reference(path: PathExpression<'_>) -> Option<String> {
    lookup_node::<_, TablePathExpression>(path.node())?;

    let names = path.names();
    if let [name] = names.as_slice() {
        if statement_with_names(path.node()).iter().any(|w| w.eq_ignore_ascii_case(name)) {
            return None;
        }
    }
    Some(path.dotted())
}

fn statement_with_names(node: AstRef<'_>) -> Vec<&str> {
    let mut statement = node;
    while !matches!(statement.kind(), AstKind::QueryStatement) {
        match statement.parent() {
            Some(parent) => statement = parent,
            None => return Vec::new(),
        }
    }

    statement
        .descendants()
        .filter_map(|n| match n.kind() {
            AstKind::WithEntry { name } => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

fn render_table(metadata: &TableMetadata) -> Result<Vec<MarkedString>, ProjectError> {
    let mut lines = vec![format!("## {}", metadata.full_id)];
    if !metadata.description.is_empty() {
        lines.push(metadata.description.clone());
    }
    lines.push(format!("created at {}", metadata.creation_time.format(TIME_FORMAT)));
    lines.push(format!("last modified at {}", metadata.last_modified_time.format(TIME_FORMAT)));

    let schema = serde_yaml::to_string(&metadata.schema).map_err(|e| ProjectError::Render(e.to_string()))?;

    Ok(vec![
        markdown(lines.join("\n")),
        MarkedString::LanguageString(tower_lsp::lsp_types::LanguageString {
            language: "yaml".to_string(),
            value: schema,
        }),
    ])
}

/// Column description from table metadata, or the analyzed type
async fn column_hover(project: &Project, column: &Column, cancel: &CancellationToken) -> Vec<MarkedString> {
    match project.fetch_table(&column.table_name, cancel).await {
        Ok(metadata) => {
            if let Some(field) = metadata
                .schema
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(&column.name))
            {
                return vec![markdown(format!(
                    "{}: {}\n{}",
                    field.name, field.field_type, field.description
                ))];
            }
        }
        Err(err) => {
            tracing::debug!(table = %column.table_name, error = %err, "column metadata lookup failed");
        }
    }

    vec![markdown(format!("{}: {}", column.name, column.column_type))]
}

/// Column of the narrowest scan that a select-list item refers to
fn select_column_target(
    output: &AnalysisOutput,
    select_column: SelectColumn<'_>,
    path: PathExpression<'_>,
    offset: usize,
) -> Option<Column> {
    let mut target: Option<&Scan> = None;
    for scan in search_nodes::<_, &Scan>(output.root(), offset) {
        let narrower = match (target.and_then(Scan::range), scan.range()) {
            (Some(best), Some(range)) => range.width() < best.width(),
            (None, _) => true,
            (Some(_), None) => false,
        };
        if narrower {
            target = Some(scan);
        }
    }
    let target = target?;

    let prefixes: Vec<String> = range_variables(target).into_iter().map(|name| format!("{name}.")).collect();

    let mut candidates = Vec::new();
    if let Some(alias) = select_column.alias() {
        candidates.push(alias.to_string());
    }
    candidates.push(path.dotted());

    candidates.iter().find_map(|candidate| {
        let name = prefixes
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(candidate, prefix))
            .unwrap_or(candidate.as_str());
        target
            .column_list()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
    })
}

/// Range variable names visible through pass-through scans below `scan`
fn range_variables(scan: &Scan) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = scan;

    loop {
        current = match current {
            Scan::Project(s) => s.input.as_ref(),
            Scan::Filter(s) => s.input.as_ref(),
            Scan::Analytic(s) => s.input.as_ref(),
            Scan::Array(s) => match &s.input {
                Some(input) => input.as_ref(),
                None => break,
            },
            Scan::OrderBy(s) => s.input.as_ref(),
            Scan::LimitOffset(s) => s.input.as_ref(),
            Scan::With(s) => s.query.as_ref(),
            Scan::Table(s) => {
                names.extend(s.alias.clone());
                break;
            }
            Scan::WithRef(s) => {
                names.push(s.alias.clone());
                if !s.alias.eq_ignore_ascii_case(&s.with_query_name) {
                    names.push(s.with_query_name.clone());
                }
                break;
            }
            other => {
                tracing::debug!(kind = other.kind_name(), "unsupported scan below select column");
                break;
            }
        };
    }

    names
}

fn strip_prefix_ignore_case<'s>(value: &'s str, prefix: &str) -> Option<&'s str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}

fn markdown(value: String) -> MarkedString {
    MarkedString::LanguageString(tower_lsp::lsp_types::LanguageString {
        language: "markdown".to_string(),
        value,
    })
}
