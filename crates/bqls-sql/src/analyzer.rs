//! Semantic analysis of parsed statements
//!
//! Resolves table paths against a [`Catalog`], binds column names through
//! FROM-clause scopes, type-checks function calls and builds the resolved
//! scan tree. Analysis is per statement; a failure in one statement says
//! nothing about the others.

use crate::ast::{
    ArrayPosition, AstKind, AstRef, BinaryOp, JoinKind, LiteralValue, PathExpression, SetOp, SubqueryKind,
    SyntaxTree, TablePathExpression, UnaryOp,
};
use crate::functions::{self, is_date_part};
use crate::resolved::{
    AggregateScan, AnalyticFunctionCall, AnalyticScan, ArrayScan, Cast, Column, ColumnId, ColumnRef,
    ComputedColumn, Expr, FilterScan, FunctionCall, GetStructField, JoinScan, JoinType, LimitOffsetScan, Literal,
    OrderByItem, OrderByScan, OutputColumn, ProjectScan, QueryStatement, Scan, SetOperationScan,
    SetOperationType, SingleRowScan, SubqueryExpr, SubqueryType, TableScan, WithEntry, WithRefScan, WithScan,
    ANALYTIC_TABLE_NAME, ARRAY_TABLE_NAME, QUERY_TABLE_NAME,
};
use bqls_core::{Diagnostic, DiagnosticCode, SqlType, TableMetadata, TextRange};
use std::collections::HashMap;

/// Source of table metadata during analysis
pub trait Catalog: Send + Sync {
    /// Find a table by its path as written in the query
    fn find_table(&self, path: &str) -> Option<&TableMetadata>;
}

/// In-memory catalog keyed by table path
#[derive(Debug, Clone, Default)]
pub struct SimpleCatalog {
    tables: HashMap<String, TableMetadata>,
}

impl SimpleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, path: impl Into<String>, metadata: TableMetadata) {
        self.tables.insert(path.into(), metadata);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tables.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Catalog for SimpleCatalog {
    fn find_table(&self, path: &str) -> Option<&TableMetadata> {
        self.tables.get(path)
    }
}

/// Semantic error in one statement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AnalysisError {
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<TextRange>,
}

impl AnalysisError {
    pub fn new(message: impl Into<String>, span: Option<TextRange>) -> Self {
        Self {
            code: DiagnosticCode::SqlAnalysisError,
            message: message.into(),
            span,
        }
    }

    pub fn table_not_found(path: &str, span: Option<TextRange>) -> Self {
        Self {
            code: DiagnosticCode::TableNotFound,
            message: format!("Table not found: {path}"),
            span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.code, self.message.clone()).with_span_opt(self.span)
    }
}

type AResult<T> = Result<T, AnalysisError>;

fn malformed(node: AstRef<'_>) -> AnalysisError {
    AnalysisError::new(format!("Malformed {} node", node.kind().name()), node.range())
}

fn child(node: AstRef<'_>, index: usize) -> AResult<AstRef<'_>> {
    node.child(index).ok_or_else(|| malformed(node))
}

fn type_list(types: &[SqlType]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_count(count: usize) -> String {
    if count == 1 {
        "1 column".to_string()
    } else {
        format!("{count} columns")
    }
}

/// Type both sides coerce to, treating untyped NULL as a wildcard
fn common_supertype(a: &SqlType, b: &SqlType) -> Option<SqlType> {
    match (a, b) {
        (SqlType::Unknown, other) | (other, SqlType::Unknown) => Some(other.clone()),
        _ if a.coerces_to(b) => Some(b.clone()),
        _ if b.coerces_to(a) => Some(a.clone()),
        _ => None,
    }
}

/// A column visible in a scope, under the name it is visible as
#[derive(Debug, Clone)]
struct ScopeColumn {
    name: String,
    column: Column,
}

/// A FROM-clause item: table, WITH reference or subquery
#[derive(Debug, Clone)]
struct RangeVariable {
    name: Option<String>,
    columns: Vec<ScopeColumn>,
}

impl RangeVariable {
    fn find_column(&self, name: &str) -> Option<&ScopeColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default)]
struct NameScope {
    vars: Vec<RangeVariable>,
}

impl NameScope {
    fn single(name: Option<String>, columns: Vec<ScopeColumn>) -> Self {
        Self {
            vars: vec![RangeVariable { name, columns }],
        }
    }

    fn find_var(&self, name: &str) -> Option<&RangeVariable> {
        self.vars
            .iter()
            .find(|v| v.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    fn find_columns(&self, name: &str) -> Vec<&ScopeColumn> {
        self.vars.iter().filter_map(|v| v.find_column(name)).collect()
    }
}

#[derive(Debug, Clone)]
struct CteDef {
    name: String,
    columns: Vec<OutputColumn>,
}

struct SelectResult {
    scan: Scan,
    outputs: Vec<OutputColumn>,
    scope: NameScope,
}

/// Resolved `PARTITION BY` / `ORDER BY` of a window
#[derive(Debug, Clone, Default)]
struct WindowDef {
    partition_by: Vec<Expr>,
    order_by: Vec<OrderByItem>,
}

/// Statement analyzer
pub struct Analyzer<'c> {
    catalog: &'c dyn Catalog,
    next_column_id: ColumnId,
    ctes: Vec<CteDef>,
    /// Scopes of enclosing queries, innermost last, for correlated subqueries
    outer_scopes: Vec<NameScope>,
    /// Analytic calls of the current SELECT; `None` where they are not allowed
    analytic: Option<Vec<ComputedColumn>>,
    /// `WINDOW` clause of the current SELECT
    windows: Vec<(String, WindowDef)>,
}

impl<'c> Analyzer<'c> {
    pub fn new(catalog: &'c dyn Catalog) -> Self {
        Self {
            catalog,
            next_column_id: 1,
            ctes: Vec::new(),
            outer_scopes: Vec::new(),
            analytic: None,
            windows: Vec::new(),
        }
    }

    /// Analyze every statement of a tree, in order
    pub fn analyze(&mut self, tree: &SyntaxTree) -> Vec<AResult<QueryStatement>> {
        tree.statements()
            .map(|statement| self.analyze_statement(statement))
            .collect()
    }

    /// Analyze one `QueryStatement` node
    pub fn analyze_statement(&mut self, statement: AstRef<'_>) -> AResult<QueryStatement> {
        if !matches!(statement.kind(), AstKind::QueryStatement) {
            return Err(AnalysisError::new(
                format!("Unsupported statement kind {}", statement.kind().name()),
                statement.range(),
            ));
        }
        self.ctes.clear();
        self.outer_scopes.clear();

        let query = child(statement, 0)?;
        let (scan, output_columns) = self.analyze_query(query)?;
        Ok(QueryStatement {
            output_columns,
            query: scan,
            range: statement.range(),
        })
    }

    fn new_column(&mut self, table_name: &str, name: &str, column_type: SqlType) -> Column {
        let id = self.next_column_id;
        self.next_column_id += 1;
        Column {
            id,
            table_name: table_name.to_string(),
            name: name.to_string(),
            column_type,
        }
    }

    fn find_cte(&self, name: &str) -> Option<&CteDef> {
        self.ctes.iter().rev().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    // Queries

    fn analyze_query(&mut self, node: AstRef<'_>) -> AResult<(Scan, Vec<OutputColumn>)> {
        let cte_mark = self.ctes.len();
        let result = self.analyze_query_body(node);
        self.ctes.truncate(cte_mark);
        result
    }

    fn analyze_query_body(&mut self, node: AstRef<'_>) -> AResult<(Scan, Vec<OutputColumn>)> {
        let mut with_entries = Vec::new();
        let mut body = None;
        let mut order_by = None;
        let mut limit = None;

        for part in node.children() {
            match part.kind() {
                AstKind::WithClause => {
                    for entry in part.children() {
                        let name = entry.name().ok_or_else(|| malformed(entry))?.to_string();
                        let (scan, columns) = self.analyze_query(child(entry, 0)?)?;
                        self.ctes.push(CteDef {
                            name: name.clone(),
                            columns,
                        });
                        with_entries.push(WithEntry { name, query: scan });
                    }
                }
                AstKind::Select { .. } | AstKind::Query | AstKind::SetOperation { .. } => body = Some(part),
                AstKind::OrderBy => order_by = Some(part),
                AstKind::Limit => limit = Some(part),
                _ => return Err(malformed(node)),
            }
        }

        let body = body.ok_or_else(|| malformed(node))?;
        let (mut scan, outputs, scope) = self.analyze_query_expr(body)?;

        if let Some(order_by) = order_by {
            let mut items = Vec::new();
            for item in order_by.children() {
                let descending = matches!(item.kind(), AstKind::OrderingItem { descending: true });
                let expr = self.resolve_order_expr(child(item, 0)?, &outputs, &scope)?;
                items.push(OrderByItem { expr, descending });
            }
            scan = Scan::OrderBy(OrderByScan {
                column_list: scan.column_list().to_vec(),
                input: Box::new(scan),
                order_by_items: items,
                range: node.range(),
            });
        }

        if let Some(limit) = limit {
            let empty = NameScope::default();
            let count = self.resolve_expr(child(limit, 0)?, &empty)?;
            let offset = match limit.child(1) {
                Some(offset) => Some(self.resolve_expr(offset, &empty)?),
                None => None,
            };
            scan = Scan::LimitOffset(LimitOffsetScan {
                column_list: scan.column_list().to_vec(),
                input: Box::new(scan),
                limit: count,
                offset,
                range: node.range(),
            });
        }

        if !with_entries.is_empty() {
            scan = Scan::With(WithScan {
                column_list: scan.column_list().to_vec(),
                with_entries,
                query: Box::new(scan),
                range: node.range(),
            });
        }

        Ok((scan, outputs))
    }

    /// A SELECT, a set operation or a parenthesized query
    fn analyze_query_expr(&mut self, node: AstRef<'_>) -> AResult<(Scan, Vec<OutputColumn>, NameScope)> {
        match node.kind() {
            AstKind::Select { .. } => {
                let select = self.analyze_select(node)?;
                Ok((select.scan, select.outputs, select.scope))
            }
            AstKind::SetOperation { .. } => {
                let (scan, outputs) = self.analyze_set_operation(node)?;
                Ok((scan, outputs, NameScope::default()))
            }
            AstKind::Query => {
                let (scan, outputs) = self.analyze_query(node)?;
                Ok((scan, outputs, NameScope::default()))
            }
            _ => Err(malformed(node)),
        }
    }

    fn analyze_set_operation(&mut self, node: AstRef<'_>) -> AResult<(Scan, Vec<OutputColumn>)> {
        let AstKind::SetOperation { op, distinct } = node.kind() else {
            return Err(malformed(node));
        };
        let op_type = match (op, distinct) {
            (SetOp::Union, false) => SetOperationType::UnionAll,
            (SetOp::Union, true) => SetOperationType::UnionDistinct,
            (SetOp::Intersect, false) => SetOperationType::IntersectAll,
            (SetOp::Intersect, true) => SetOperationType::IntersectDistinct,
            (SetOp::Except, false) => SetOperationType::ExceptAll,
            (SetOp::Except, true) => SetOperationType::ExceptDistinct,
        };

        let (left, left_outputs, _) = self.analyze_query_expr(child(node, 0)?)?;
        let (right, right_outputs, _) = self.analyze_query_expr(child(node, 1)?)?;

        if left_outputs.len() != right_outputs.len() {
            return Err(AnalysisError::new(
                format!(
                    "Queries in {} have mismatched column count; query 1 has {}, query 2 has {}",
                    op_type.sql(),
                    column_count(left_outputs.len()),
                    column_count(right_outputs.len())
                ),
                node.range(),
            ));
        }

        let table_name = op_type.table_name();
        let mut outputs = Vec::new();
        for (index, (l, r)) in left_outputs.iter().zip(&right_outputs).enumerate() {
            let (left_type, right_type) = (&l.column.column_type, &r.column.column_type);
            let column_type = common_supertype(left_type, right_type).ok_or_else(|| {
                AnalysisError::new(
                    format!(
                        "Column {} in {} has incompatible types: {}, {}",
                        index + 1,
                        op_type.sql(),
                        left_type,
                        right_type
                    ),
                    node.range(),
                )
            })?;
            outputs.push(OutputColumn {
                name: l.name.clone(),
                column: self.new_column(&table_name, &l.name, column_type),
            });
        }

        let scan = Scan::SetOperation(SetOperationScan {
            column_list: outputs.iter().map(|o| o.column.clone()).collect(),
            op_type,
            inputs: vec![left, right],
            range: node.range(),
        });
        Ok((scan, outputs))
    }

    fn resolve_order_expr(
        &mut self,
        node: AstRef<'_>,
        outputs: &[OutputColumn],
        scope: &NameScope,
    ) -> AResult<Expr> {
        // Select-list aliases take precedence in ORDER BY
        if let Some(path) = PathExpression::cast(node) {
            let names = path.names();
            if let [name] = names.as_slice() {
                if let Some(output) = outputs.iter().find(|o| o.name.eq_ignore_ascii_case(name)) {
                    return Ok(Expr::ColumnRef(ColumnRef {
                        column: output.column.clone(),
                        range: node.range(),
                    }));
                }
            }
        }
        self.resolve_expr(node, scope)
    }

    // SELECT

    /// Analytic calls and named windows belong to one SELECT, not to the
    /// subqueries nested in it
    fn analyze_select(&mut self, node: AstRef<'_>) -> AResult<SelectResult> {
        let analytic = self.analytic.take();
        let windows = std::mem::take(&mut self.windows);
        let result = self.analyze_select_clauses(node);
        self.analytic = analytic;
        self.windows = windows;
        result
    }

    fn analyze_select_clauses(&mut self, node: AstRef<'_>) -> AResult<SelectResult> {
        let mut select_list = None;
        let mut from = None;
        let mut where_clause = None;
        let mut group_by = None;
        let mut having = None;
        let mut qualify = None;
        let mut window_clause = None;

        for part in node.children() {
            match part.kind() {
                AstKind::SelectList => select_list = Some(part),
                AstKind::FromClause => from = Some(part),
                AstKind::WhereClause => where_clause = Some(part),
                AstKind::GroupBy => group_by = Some(part),
                AstKind::Having => having = Some(part),
                AstKind::Qualify => qualify = Some(part),
                AstKind::WindowClause => window_clause = Some(part),
                _ => return Err(malformed(node)),
            }
        }

        let (mut scan, scope) = match from {
            Some(from) => self.analyze_from_item(child(from, 0)?)?,
            None => (
                Scan::SingleRow(SingleRowScan { range: None }),
                NameScope::default(),
            ),
        };

        if let Some(clause) = where_clause {
            let filter_expr = self.resolve_condition(child(clause, 0)?, &scope, "WHERE clause")?;
            scan = Scan::Filter(FilterScan {
                column_list: scan.column_list().to_vec(),
                input: Box::new(scan),
                filter_expr,
                range: node.range(),
            });
        }

        if let Some(clause) = window_clause {
            for window in clause.children() {
                let name = window.name().ok_or_else(|| malformed(window))?.to_string();
                if self.windows.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                    return Err(AnalysisError::new(
                        format!("Duplicate window alias {name}"),
                        window.range(),
                    ));
                }
                let def = self.resolve_window(child(window, 0)?, &scope)?;
                self.windows.push((name, def));
            }
        }

        let select_list = select_list.ok_or_else(|| malformed(node))?;
        let mut outputs = Vec::new();
        let mut expr_list = Vec::new();
        let mut has_aggregate = false;
        self.analytic = Some(Vec::new());

        for (index, item) in select_list.children().enumerate() {
            let first = child(item, 0)?;
            match first.kind() {
                AstKind::Star => {
                    if scope.vars.is_empty() {
                        return Err(AnalysisError::new(
                            "SELECT * must have a FROM clause",
                            first.range(),
                        ));
                    }
                    let columns = scope.vars.iter().flat_map(|v| &v.columns);
                    outputs.extend(expand_star(first, columns)?);
                }
                AstKind::DotStar => {
                    let path = PathExpression::cast(child(first, 0)?).ok_or_else(|| malformed(first))?;
                    let name = path.dotted();
                    let var = scope.find_var(&name).ok_or_else(|| {
                        AnalysisError::new(format!("Unrecognized name: {name}"), path.node().range())
                    })?;
                    outputs.extend(expand_star(child(first, 1)?, var.columns.iter())?);
                }
                _ => {
                    let expr = self.resolve_expr(first, &scope)?;
                    has_aggregate |= expr.contains_aggregate();
                    let alias = item.alias();

                    match expr {
                        Expr::ColumnRef(column_ref) => {
                            let name = match alias {
                                Some(alias) => alias.to_string(),
                                None if column_ref.column.table_name == ANALYTIC_TABLE_NAME => {
                                    format!("$col{}", index + 1)
                                }
                                None => column_ref.column.name.clone(),
                            };
                            outputs.push(OutputColumn {
                                name,
                                column: column_ref.column,
                            })
                        }
                        expr => {
                            let name = alias
                                .map(str::to_string)
                                .or_else(|| implicit_alias(first))
                                .unwrap_or_else(|| format!("$col{}", index + 1));
                            let column = self.new_column(QUERY_TABLE_NAME, &name, expr.expr_type());
                            outputs.push(OutputColumn {
                                name,
                                column: column.clone(),
                            });
                            expr_list.push(ComputedColumn { column, expr });
                        }
                    }
                }
            }
        }

        let mut analytic_list = self.analytic.take().unwrap_or_default();

        let mut group_by_list = Vec::new();
        if let Some(group_by) = group_by {
            for item in group_by.children() {
                let expr = match self.resolve_expr(item, &scope) {
                    Ok(expr) => expr,
                    // GROUP BY may name a select-list alias
                    Err(err) => match single_name(item)
                        .and_then(|name| outputs.iter().find(|o| o.name.eq_ignore_ascii_case(name)))
                    {
                        Some(output) => Expr::ColumnRef(ColumnRef {
                            column: output.column.clone(),
                            range: item.range(),
                        }),
                        None => return Err(err),
                    },
                };
                let column = match &expr {
                    Expr::ColumnRef(c) => c.column.clone(),
                    other => {
                        let name = format!("$groupbycol{}", group_by_list.len() + 1);
                        self.new_column("$groupby", &name, other.expr_type())
                    }
                };
                group_by_list.push(ComputedColumn { column, expr });
            }
        }

        if group_by.is_some() || having.is_some() || has_aggregate {
            let mut column_list: Vec<Column> = group_by_list.iter().map(|c| c.column.clone()).collect();
            column_list.extend(scan.column_list().iter().cloned());
            scan = Scan::Aggregate(AggregateScan {
                column_list,
                input: Box::new(scan),
                group_by_list,
                range: node.range(),
            });
        }

        if let Some(clause) = having {
            let filter_expr = self.resolve_condition(child(clause, 0)?, &scope, "HAVING clause")?;
            scan = Scan::Filter(FilterScan {
                column_list: scan.column_list().to_vec(),
                input: Box::new(scan),
                filter_expr,
                range: node.range(),
            });
        }

        // QUALIFY sees the FROM scope plus select-list aliases
        let qualify_expr = match qualify {
            Some(clause) => {
                let mut qualify_scope = scope.clone();
                qualify_scope.vars.push(RangeVariable {
                    name: None,
                    columns: outputs
                        .iter()
                        .filter(|o| scope.find_columns(&o.name).is_empty())
                        .map(|o| ScopeColumn {
                            name: o.name.clone(),
                            column: o.column.clone(),
                        })
                        .collect(),
                });
                self.analytic = Some(analytic_list);
                let result = self.resolve_condition(child(clause, 0)?, &qualify_scope, "QUALIFY clause");
                analytic_list = self.analytic.take().unwrap_or_default();
                Some(result?)
            }
            None => None,
        };

        if !analytic_list.is_empty() {
            let mut column_list = scan.column_list().to_vec();
            column_list.extend(analytic_list.iter().map(|c| c.column.clone()));
            scan = Scan::Analytic(AnalyticScan {
                column_list,
                input: Box::new(scan),
                function_list: analytic_list,
                range: node.range(),
            });
        }

        if let Some(filter_expr) = qualify_expr {
            scan = Scan::Filter(FilterScan {
                column_list: scan.column_list().to_vec(),
                input: Box::new(scan),
                filter_expr,
                range: node.range(),
            });
        }

        let scan = Scan::Project(ProjectScan {
            column_list: outputs.iter().map(|o| o.column.clone()).collect(),
            expr_list,
            input: Box::new(scan),
            range: node.range(),
        });

        Ok(SelectResult {
            scan,
            outputs,
            scope,
        })
    }

    // FROM

    fn analyze_from_item(&mut self, node: AstRef<'_>) -> AResult<(Scan, NameScope)> {
        match node.kind() {
            AstKind::TablePathExpression => self.analyze_table_path(node),
            AstKind::TableSubquery => {
                let (scan, outputs) = self.analyze_query(child(node, 0)?)?;
                let columns = outputs
                    .into_iter()
                    .map(|o| ScopeColumn {
                        name: o.name,
                        column: o.column,
                    })
                    .collect();
                Ok((scan, NameScope::single(node.alias().map(str::to_string), columns)))
            }
            AstKind::Unnest => self.analyze_array_scan(node, None, NameScope::default(), None),
            AstKind::Join { kind } => {
                let (left, mut scope) = self.analyze_from_item(child(node, 0)?)?;
                let right = child(node, 1)?;
                if matches!(right.kind(), AstKind::Unnest) || correlated_path(right, &scope) {
                    return self.analyze_array_scan(right, Some(left), scope, Some((node, *kind)));
                }
                let (right, right_scope) = self.analyze_from_item(right)?;
                scope.vars.extend(right_scope.vars);

                let join_expr = match node.find_child(|k| matches!(k, AstKind::OnClause)) {
                    Some(on) => Some(self.resolve_condition(child(on, 0)?, &scope, "JOIN ON clause")?),
                    None => None,
                };

                let join_type = match kind {
                    JoinKind::Inner => JoinType::Inner,
                    JoinKind::Left => JoinType::Left,
                    JoinKind::Right => JoinType::Right,
                    JoinKind::Full => JoinType::Full,
                    JoinKind::Cross | JoinKind::Comma => JoinType::Cross,
                };
                if join_type != JoinType::Cross && join_expr.is_none() {
                    return Err(AnalysisError::new(
                        "JOIN must have an immediately following ON clause",
                        node.range(),
                    ));
                }

                let mut column_list = left.column_list().to_vec();
                column_list.extend(right.column_list().iter().cloned());
                let scan = Scan::Join(JoinScan {
                    column_list,
                    join_type,
                    left: Box::new(left),
                    right: Box::new(right),
                    join_expr,
                    range: node.range(),
                });
                Ok((scan, scope))
            }
            _ => Err(malformed(node)),
        }
    }

    /// `UNNEST(array)` or a correlated `t.array_column` path
    ///
    /// With `input`, the array is joined to the scan on its left and may
    /// reference the left side's columns.
    fn analyze_array_scan(
        &mut self,
        node: AstRef<'_>,
        input: Option<Scan>,
        mut scope: NameScope,
        join: Option<(AstRef<'_>, JoinKind)>,
    ) -> AResult<(Scan, NameScope)> {
        let (array_expr, element_name, offset) = match TablePathExpression::cast(node) {
            Some(table) => {
                let path = table.path().ok_or_else(|| malformed(node))?;
                let element_name = table.alias().or_else(|| path.names().last().copied()).map(str::to_string);
                (self.resolve_path(path, &scope)?, element_name, None)
            }
            None => {
                let array = child(node, 0)?;
                let element_name = node.alias().map(str::to_string).or_else(|| implicit_alias(array));
                let offset = node.find_child(|k| matches!(k, AstKind::WithOffset));
                (self.resolve_expr(array, &scope)?, element_name, offset)
            }
        };

        let element_type = match array_expr.expr_type() {
            SqlType::Array { element_type } => *element_type,
            SqlType::Unknown => SqlType::Unknown,
            other => {
                return Err(AnalysisError::new(
                    format!("Values referenced in UNNEST must be arrays. UNNEST contains expression of type {other}"),
                    array_expr.range().or(node.range()),
                ))
            }
        };

        let element_name = element_name.unwrap_or_else(|| "$unnest".to_string());
        let element_column = self.new_column(ARRAY_TABLE_NAME, &element_name, element_type);
        let offset_column = offset.map(|offset| {
            let name = offset.alias().unwrap_or("offset");
            self.new_column(ARRAY_TABLE_NAME, name, SqlType::Int64)
        });

        let mut array_columns = vec![ScopeColumn {
            name: element_name,
            column: element_column.clone(),
        }];
        array_columns.extend(offset_column.iter().map(|c| ScopeColumn {
            name: c.name.clone(),
            column: c.clone(),
        }));
        scope.vars.push(RangeVariable {
            name: None,
            columns: array_columns,
        });

        let (is_outer, join_expr, range) = match join {
            Some((join, kind)) => {
                let is_outer = match kind {
                    JoinKind::Inner | JoinKind::Cross | JoinKind::Comma => false,
                    JoinKind::Left => true,
                    JoinKind::Right | JoinKind::Full => {
                        return Err(AnalysisError::new(
                            "Arrays can only be joined with INNER, CROSS or LEFT JOIN",
                            join.range(),
                        ))
                    }
                };
                let join_expr = match join.find_child(|k| matches!(k, AstKind::OnClause)) {
                    Some(on) => Some(self.resolve_condition(child(on, 0)?, &scope, "JOIN ON clause")?),
                    None => None,
                };
                (is_outer, join_expr, join.range())
            }
            None => (false, None, node.range()),
        };

        let mut column_list = input.as_ref().map(|s| s.column_list().to_vec()).unwrap_or_default();
        column_list.push(element_column.clone());
        column_list.extend(offset_column.iter().cloned());

        let scan = Scan::Array(ArrayScan {
            column_list,
            input: input.map(Box::new),
            array_expr,
            element_column,
            offset_column,
            join_expr,
            is_outer,
            range,
        });
        Ok((scan, scope))
    }

    fn analyze_table_path(&mut self, node: AstRef<'_>) -> AResult<(Scan, NameScope)> {
        let table = TablePathExpression::cast(node).ok_or_else(|| malformed(node))?;
        let path = table.path().ok_or_else(|| malformed(node))?;
        let names = path.names();

        if let [name] = names.as_slice() {
            if let Some(cte) = self.find_cte(name) {
                let cte_name = cte.name.clone();
                let outputs = cte.columns.clone();
                let alias = table.alias().unwrap_or(*name).to_string();

                let columns: Vec<ScopeColumn> = outputs
                    .iter()
                    .map(|o| ScopeColumn {
                        name: o.name.clone(),
                        column: self.new_column(&cte_name, &o.name, o.column.column_type.clone()),
                    })
                    .collect();
                let scan = Scan::WithRef(WithRefScan {
                    column_list: columns.iter().map(|c| c.column.clone()).collect(),
                    with_query_name: cte_name,
                    alias: alias.clone(),
                    range: node.range(),
                });
                return Ok((scan, NameScope::single(Some(alias), columns)));
            }
        }

        let table_name = path.dotted();
        let catalog = self.catalog;
        let metadata = catalog
            .find_table(&table_name)
            .ok_or_else(|| AnalysisError::table_not_found(&table_name, path.node().range()))?;

        let alias = table
            .alias()
            .or_else(|| names.last().copied())
            .map(str::to_string);
        let columns: Vec<ScopeColumn> = metadata
            .schema
            .iter()
            .map(|field| ScopeColumn {
                name: field.name.clone(),
                column: self.new_column(&table_name, &field.name, field.sql_type()),
            })
            .collect();

        let scan = Scan::Table(TableScan {
            table_name,
            alias: alias.clone(),
            column_list: columns.iter().map(|c| c.column.clone()).collect(),
            range: node.range(),
        });
        Ok((scan, NameScope::single(alias, columns)))
    }

    // Expressions

    fn resolve_condition(&mut self, node: AstRef<'_>, scope: &NameScope, clause: &str) -> AResult<Expr> {
        let expr = self.resolve_expr(node, scope)?;
        match expr.expr_type() {
            SqlType::Bool | SqlType::Unknown => Ok(expr),
            other => Err(AnalysisError::new(
                format!("{clause} should return type BOOL, but returns {other}"),
                node.range(),
            )),
        }
    }

    fn resolve_expr(&mut self, node: AstRef<'_>, scope: &NameScope) -> AResult<Expr> {
        match node.kind() {
            AstKind::PathExpression => {
                let path = PathExpression::cast(node).ok_or_else(|| malformed(node))?;
                self.resolve_path(path, scope)
            }
            AstKind::Literal(value) => Ok(Expr::Literal(literal(value, node.range()))),
            AstKind::BinaryExpression { op } => {
                let lhs = self.resolve_expr(child(node, 0)?, scope)?;
                let rhs = self.resolve_expr(child(node, 1)?, scope)?;
                self.call_operator(operator_name(*op), op.symbol(), vec![lhs, rhs], node.range())
            }
            AstKind::UnaryExpression { op } => {
                let operand = self.resolve_expr(child(node, 0)?, scope)?;
                let (name, symbol) = match op {
                    UnaryOp::Not => ("$not", "NOT"),
                    UnaryOp::Minus => ("$unary_minus", "-"),
                };
                self.call_operator(name, symbol, vec![operand], node.range())
            }
            AstKind::IsNull { negated } => {
                let operand = self.resolve_expr(child(node, 0)?, scope)?;
                let call = self.call_operator("$is_null", "IS NULL", vec![operand], node.range())?;
                self.negate_if(*negated, call, node.range())
            }
            AstKind::InList { negated } => {
                let args = self.resolve_children(node, scope)?;
                let call = self.call_operator("$in", "IN", args, node.range())?;
                self.negate_if(*negated, call, node.range())
            }
            AstKind::Between { negated } => {
                let args = self.resolve_children(node, scope)?;
                let call = self.call_operator("$between", "BETWEEN", args, node.range())?;
                self.negate_if(*negated, call, node.range())
            }
            AstKind::FunctionCall { .. } => self.resolve_function_call(node, scope),
            AstKind::DotIdentifier => {
                let base = self.resolve_expr(child(node, 0)?, scope)?;
                let field = child(node, 1)?;
                let name = field.name().ok_or_else(|| malformed(node))?;
                struct_field(base, name, node.range(), field.range())
            }
            AstKind::Cast { safe } => {
                let expr = self.resolve_expr(child(node, 0)?, scope)?;
                let type_node = child(node, 1)?;
                let AstKind::TypeName { name } = type_node.kind() else {
                    return Err(malformed(node));
                };
                let target_type = SqlType::from_bigquery(name);
                if target_type == SqlType::Unknown {
                    return Err(AnalysisError::new(
                        format!("Type not found: {name}"),
                        type_node.range(),
                    ));
                }
                Ok(Expr::Cast(Cast {
                    expr: Box::new(expr),
                    target_type,
                    safe: *safe,
                    range: node.range(),
                }))
            }
            AstKind::Case { .. } => self.resolve_case(node, scope),
            AstKind::Subquery { kind } => self.resolve_subquery(node, *kind, scope),
            AstKind::ArrayLiteral => {
                let elements = self.resolve_children(node, scope)?;
                let mut element_type = SqlType::Unknown;
                for element in &elements {
                    let ty = element.expr_type();
                    element_type = common_supertype(&element_type, &ty).ok_or_else(|| {
                        AnalysisError::new(
                            format!("Array elements of types {{{element_type}, {ty}}} do not have a common supertype"),
                            node.range(),
                        )
                    })?;
                }
                let function = functions::operator("$make_array").ok_or_else(|| malformed(node))?;
                Ok(Expr::FunctionCall(FunctionCall {
                    function,
                    arguments: elements,
                    return_type: SqlType::array_of(element_type),
                    range: None,
                }))
            }
            AstKind::ArrayElement { position } => {
                let args = self.resolve_children(node, scope)?;
                let (name, symbol) = match position {
                    ArrayPosition::Offset => ("$array_at_offset", "[OFFSET]"),
                    ArrayPosition::SafeOffset => ("$safe_array_at_offset", "[SAFE_OFFSET]"),
                    ArrayPosition::Ordinal => ("$array_at_ordinal", "[ORDINAL]"),
                    ArrayPosition::SafeOrdinal => ("$safe_array_at_ordinal", "[SAFE_ORDINAL]"),
                };
                self.call_operator(name, symbol, args, node.range())
            }
            AstKind::InUnnest { negated } => {
                let args = self.resolve_children(node, scope)?;
                let call = self.call_operator("$in_array", "IN UNNEST", args, node.range())?;
                self.negate_if(*negated, call, node.range())
            }
            AstKind::Interval { unit } => {
                if let Some(unit) = unit.as_deref().filter(|u| !is_date_part(u)) {
                    return Err(AnalysisError::new(
                        format!("Unsupported INTERVAL date part {unit}"),
                        node.range(),
                    ));
                }
                let value = self.resolve_expr(child(node, 0)?, scope)?;
                self.call_operator("$interval", "INTERVAL", vec![value], node.range())
            }
            AstKind::Star => Err(AnalysisError::new(
                "Star expansion is not allowed here",
                node.range(),
            )),
            other => Err(AnalysisError::new(
                format!("Unsupported expression: {}", other.name()),
                node.range(),
            )),
        }
    }

    fn resolve_children(&mut self, node: AstRef<'_>, scope: &NameScope) -> AResult<Vec<Expr>> {
        node.children()
            .map(|c| self.resolve_expr(c, scope))
            .collect()
    }

    fn resolve_path(&mut self, path: PathExpression<'_>, scope: &NameScope) -> AResult<Expr> {
        let identifiers = path.identifiers();
        let names = path.names();
        let (Some(first), Some(first_ident)) = (names.first().copied(), identifiers.first()) else {
            return Err(malformed(path.node()));
        };
        let path_start = path.node().range().map(|r| r.start).unwrap_or(0);

        // Names not visible locally may come from an enclosing query
        let scope = std::iter::once(scope)
            .chain(self.outer_scopes.iter().rev())
            .find(|s| s.find_var(first).is_some() || !s.find_columns(first).is_empty())
            .unwrap_or(scope);

        let (mut expr, consumed) = if let Some(var) = scope.find_var(first) {
            let Some((column_name, column_ident)) = names.get(1).zip(identifiers.get(1)) else {
                return Err(AnalysisError::new(
                    format!("Range variable {first} cannot be used as a value"),
                    first_ident.range(),
                ));
            };
            let column = var.find_column(column_name).ok_or_else(|| {
                AnalysisError::new(
                    format!("Name {column_name} not found inside {first}"),
                    column_ident.range(),
                )
            })?;
            let range = column_ident
                .range()
                .map(|r| TextRange::new(path_start, r.end));
            (
                Expr::ColumnRef(ColumnRef {
                    column: column.column.clone(),
                    range,
                }),
                2,
            )
        } else {
            let matches = scope.find_columns(first);
            match matches.as_slice() {
                [] => {
                    return Err(AnalysisError::new(
                        format!("Unrecognized name: {first}"),
                        first_ident.range(),
                    ))
                }
                [column] => (
                    Expr::ColumnRef(ColumnRef {
                        column: column.column.clone(),
                        range: first_ident.range(),
                    }),
                    1,
                ),
                _ => {
                    return Err(AnalysisError::new(
                        format!("Column name {first} is ambiguous"),
                        first_ident.range(),
                    ))
                }
            }
        };

        for (name, ident) in names.iter().zip(&identifiers).skip(consumed) {
            let range = ident.range().map(|r| TextRange::new(path_start, r.end));
            expr = struct_field(expr, name, range, ident.range())?;
        }
        Ok(expr)
    }

    fn resolve_function_call(&mut self, node: AstRef<'_>, scope: &NameScope) -> AResult<Expr> {
        let path = PathExpression::cast(child(node, 0)?).ok_or_else(|| malformed(node))?;
        let name = path.dotted();
        let function = functions::lookup(&name).ok_or_else(|| {
            AnalysisError::new(format!("Function not found: {name}"), path.node().range())
        })?;

        let window = node
            .children()
            .last()
            .filter(|c| matches!(c.kind(), AstKind::WindowSpec { .. }));
        match window {
            None if function.analytic => {
                return Err(AnalysisError::new(
                    format!("Analytic function {} cannot be called without an OVER clause", function.name),
                    node.range(),
                ))
            }
            Some(window) if !function.supports_over() => {
                return Err(AnalysisError::new(
                    format!("Function {} does not support an OVER clause", function.name),
                    window.range(),
                ))
            }
            Some(_) if self.analytic.is_none() => {
                return Err(AnalysisError::new(
                    format!(
                        "Analytic function {} is only allowed in the SELECT list and QUALIFY clause",
                        function.name
                    ),
                    node.range(),
                ))
            }
            _ => {}
        }
        let args: Vec<AstRef<'_>> = node
            .children()
            .skip(1)
            .filter(|c| !matches!(c.kind(), AstKind::WindowSpec { .. }))
            .collect();

        let mut arguments = Vec::new();
        for arg in args.iter().copied() {
            if matches!(arg.kind(), AstKind::Star) {
                if function.name == "COUNT" && args.len() == 1 {
                    continue;
                }
                return Err(AnalysisError::new(
                    "Star is only allowed in COUNT(*)",
                    arg.range(),
                ));
            }

            let resolved = match (self.resolve_expr(arg, scope), single_name(arg)) {
                (Ok(expr), _) => expr,
                // Date part keywords (DAY, MONTH, ...) are bare identifiers
                (Err(_), Some(part)) if is_date_part(part) => Expr::Literal(Literal {
                    text: part.to_uppercase(),
                    literal_type: SqlType::Unknown,
                    range: arg.range(),
                }),
                (Err(err), _) => return Err(err),
            };
            arguments.push(resolved);
        }

        let types: Vec<SqlType> = arguments.iter().map(Expr::expr_type).collect();
        let Some((_, return_type)) = function.resolve(&types) else {
            let supported: Vec<String> = function
                .signatures
                .iter()
                .map(|s| s.debug_string(&function.name))
                .collect();
            return Err(AnalysisError::new(
                format!(
                    "No matching signature for function {} for argument types: {}. Supported signatures: {}",
                    function.name,
                    type_list(&types),
                    supported.join("; ")
                ),
                node.range(),
            ));
        };

        let Some(window) = window else {
            return Ok(Expr::FunctionCall(FunctionCall {
                function,
                arguments,
                return_type,
                range: node.range(),
            }));
        };

        let WindowDef {
            partition_by,
            order_by,
        } = self.resolve_window(window, scope)?;
        let index = self.analytic.as_ref().map(Vec::len).unwrap_or_default();
        let column = self.new_column(ANALYTIC_TABLE_NAME, &format!("$analytic{}", index + 1), return_type.clone());
        let call = Expr::AnalyticFunctionCall(AnalyticFunctionCall {
            function,
            arguments,
            partition_by,
            order_by,
            return_type,
            range: node.range(),
        });

        // The call is computed by an AnalyticScan; the enclosing
        // expression reads its output column
        if let Some(list) = self.analytic.as_mut() {
            list.push(ComputedColumn {
                column: column.clone(),
                expr: call,
            });
        }
        Ok(Expr::ColumnRef(ColumnRef { column, range: None }))
    }

    /// `OVER (...)`, `OVER name` or a `WINDOW` clause definition
    fn resolve_window(&mut self, spec: AstRef<'_>, scope: &NameScope) -> AResult<WindowDef> {
        let AstKind::WindowSpec { base } = spec.kind() else {
            return Err(malformed(spec));
        };
        let mut def = match base {
            Some(name) => self
                .windows
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, def)| def.clone())
                .ok_or_else(|| AnalysisError::new(format!("Unrecognized window alias {name}"), spec.range()))?,
            None => WindowDef::default(),
        };

        for part in spec.children() {
            match part.kind() {
                AstKind::PartitionBy => def.partition_by = self.resolve_children(part, scope)?,
                AstKind::OrderBy => {
                    let mut items = Vec::new();
                    for item in part.children() {
                        items.push(OrderByItem {
                            expr: self.resolve_expr(child(item, 0)?, scope)?,
                            descending: matches!(item.kind(), AstKind::OrderingItem { descending: true }),
                        });
                    }
                    def.order_by = items;
                }
                _ => return Err(malformed(spec)),
            }
        }
        Ok(def)
    }

    fn resolve_subquery(&mut self, node: AstRef<'_>, kind: SubqueryKind, scope: &NameScope) -> AResult<Expr> {
        let (in_expr, query) = match kind {
            SubqueryKind::In { .. } => (Some(self.resolve_expr(child(node, 0)?, scope)?), child(node, 1)?),
            _ => (None, child(node, 0)?),
        };

        self.outer_scopes.push(scope.clone());
        let result = self.analyze_query(query);
        self.outer_scopes.pop();
        let (subquery, outputs) = result?;

        let column_type = || -> AResult<SqlType> {
            match outputs.as_slice() {
                [output] => Ok(output.column.column_type.clone()),
                _ => {
                    let message = match kind {
                        SubqueryKind::Array => {
                            "ARRAY subquery cannot have more than one column unless using SELECT AS STRUCT to build ARRAY<STRUCT> values"
                        }
                        SubqueryKind::In { .. } => "Subquery of type IN must have only one output column",
                        _ => {
                            "Scalar subquery cannot have more than one column unless using SELECT AS STRUCT to build STRUCT values"
                        }
                    };
                    Err(AnalysisError::new(message, node.range()))
                }
            }
        };

        let (subquery_type, result_type) = match kind {
            SubqueryKind::Scalar => (SubqueryType::Scalar, column_type()?),
            SubqueryKind::Array => (SubqueryType::Array, SqlType::array_of(column_type()?)),
            SubqueryKind::Exists { .. } => (SubqueryType::Exists, SqlType::Bool),
            SubqueryKind::In { .. } => {
                let column = column_type()?;
                let lhs = in_expr.as_ref().map(Expr::expr_type).unwrap_or(SqlType::Unknown);
                if common_supertype(&lhs, &column).is_none() {
                    return Err(AnalysisError::new(
                        format!("Cannot execute IN subquery with uncomparable types {lhs} and {column}"),
                        node.range(),
                    ));
                }
                (SubqueryType::In, SqlType::Bool)
            }
        };

        let expr = Expr::Subquery(SubqueryExpr {
            subquery_type,
            subquery: Box::new(subquery),
            in_expr: in_expr.map(Box::new),
            result_type,
            range: node.range(),
        });
        match kind {
            SubqueryKind::Exists { negated } | SubqueryKind::In { negated } => self.negate_if(negated, expr, node.range()),
            _ => Ok(expr),
        }
    }

    fn resolve_case(&mut self, node: AstRef<'_>, scope: &NameScope) -> AResult<Expr> {
        let mut arguments = Vec::new();
        let mut results = Vec::new();

        for part in node.children() {
            match part.kind() {
                AstKind::WhenClause => {
                    arguments.push(self.resolve_expr(child(part, 0)?, scope)?);
                    let result = self.resolve_expr(child(part, 1)?, scope)?;
                    results.push(result.expr_type());
                    arguments.push(result);
                }
                AstKind::ElseClause => {
                    let result = self.resolve_expr(child(part, 0)?, scope)?;
                    results.push(result.expr_type());
                    arguments.push(result);
                }
                _ => arguments.push(self.resolve_expr(part, scope)?),
            }
        }

        let function = functions::operator("$case").ok_or_else(|| malformed(node))?;
        let return_type = results
            .into_iter()
            .find(|t| *t != SqlType::Unknown)
            .unwrap_or(SqlType::Unknown);

        Ok(Expr::FunctionCall(FunctionCall {
            function,
            arguments,
            return_type,
            range: None,
        }))
    }

    fn call_operator(
        &mut self,
        name: &str,
        symbol: &str,
        arguments: Vec<Expr>,
        span: Option<TextRange>,
    ) -> AResult<Expr> {
        let function = functions::operator(name)
            .ok_or_else(|| AnalysisError::new(format!("Operator not found: {symbol}"), span))?;

        let types: Vec<SqlType> = arguments.iter().map(Expr::expr_type).collect();
        let Some((_, return_type)) = function.resolve(&types) else {
            return Err(AnalysisError::new(
                format!(
                    "No matching signature for operator {symbol} for argument types: {}",
                    type_list(&types)
                ),
                span,
            ));
        };

        Ok(Expr::FunctionCall(FunctionCall {
            function,
            arguments,
            return_type,
            range: None,
        }))
    }

    fn negate_if(&mut self, negated: bool, expr: Expr, span: Option<TextRange>) -> AResult<Expr> {
        if negated {
            self.call_operator("$not", "NOT", vec![expr], span)
        } else {
            Ok(expr)
        }
    }
}

fn operator_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "$or",
        BinaryOp::And => "$and",
        BinaryOp::Eq => "$equal",
        BinaryOp::Neq => "$not_equal",
        BinaryOp::Lt => "$less",
        BinaryOp::Gt => "$greater",
        BinaryOp::LtEq => "$less_or_equal",
        BinaryOp::GtEq => "$greater_or_equal",
        BinaryOp::Like => "$like",
        BinaryOp::NotLike => "$not_like",
        BinaryOp::Add => "$add",
        BinaryOp::Sub => "$subtract",
        BinaryOp::Mul => "$multiply",
        BinaryOp::Div => "$divide",
        BinaryOp::Concat => "$concat_op",
    }
}

fn literal(value: &LiteralValue, range: Option<TextRange>) -> Literal {
    let (text, literal_type) = match value {
        LiteralValue::Int(n) => (n.clone(), SqlType::Int64),
        LiteralValue::Float(n) => (n.clone(), SqlType::Float64),
        LiteralValue::String(s) => (format!("'{s}'"), SqlType::String),
        LiteralValue::Bytes(s) => (format!("b'{s}'"), SqlType::Bytes),
        LiteralValue::Bool(b) => (b.to_string().to_uppercase(), SqlType::Bool),
        LiteralValue::Null => ("NULL".to_string(), SqlType::Unknown),
        LiteralValue::Parameter(name) => (name.clone(), SqlType::Unknown),
    };
    Literal {
        text,
        literal_type,
        range,
    }
}

/// Field access on a STRUCT-typed expression
fn struct_field(
    base: Expr,
    name: &str,
    range: Option<TextRange>,
    name_range: Option<TextRange>,
) -> AResult<Expr> {
    let base_type = base.expr_type();
    let field_type = match &base_type {
        SqlType::Unknown => SqlType::Unknown,
        SqlType::Struct { .. } => match base_type.field(name) {
            Some(field) => field.field_type.clone(),
            None => {
                return Err(AnalysisError::new(
                    format!("Field name {name} does not exist in {base_type}"),
                    name_range,
                ))
            }
        },
        other => {
            return Err(AnalysisError::new(
                format!("Cannot access field {name} on a value with type {other}"),
                name_range,
            ))
        }
    };

    Ok(Expr::GetStructField(GetStructField {
        expr: Box::new(base),
        field_name: name.to_string(),
        field_type,
        range,
    }))
}

/// Columns of `*`, minus those named in `* EXCEPT (...)`
fn expand_star<'s>(
    star: AstRef<'_>,
    columns: impl Iterator<Item = &'s ScopeColumn>,
) -> AResult<Vec<OutputColumn>> {
    let columns: Vec<&ScopeColumn> = columns.collect();
    let mut excluded = Vec::new();
    for ident in star.children() {
        let name = ident.name().ok_or_else(|| malformed(star))?;
        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(AnalysisError::new(
                format!("Column {name} in SELECT * EXCEPT list does not exist"),
                ident.range(),
            ));
        }
        excluded.push(name);
    }

    Ok(columns
        .into_iter()
        .filter(|c| !excluded.iter().any(|name| c.name.eq_ignore_ascii_case(name)))
        .map(|c| OutputColumn {
            name: c.name.clone(),
            column: c.column.clone(),
        })
        .collect())
}

/// A FROM-clause path starting at a range variable, like `t.tags`
fn correlated_path(node: AstRef<'_>, scope: &NameScope) -> bool {
    let Some(path) = TablePathExpression::cast(node).and_then(|t| t.path()) else {
        return false;
    };
    match path.names().as_slice() {
        [first, _, ..] => scope.find_var(first).is_some(),
        _ => false,
    }
}

/// The only name of a one-part path expression
fn single_name<'a>(node: AstRef<'a>) -> Option<&'a str> {
    let path = PathExpression::cast(node)?;
    match path.names().as_slice() {
        [name] => Some(*name),
        _ => None,
    }
}

/// Output name BigQuery gives an unaliased select item
fn implicit_alias(node: AstRef<'_>) -> Option<String> {
    match node.kind() {
        AstKind::PathExpression => PathExpression::cast(node)?
            .names()
            .last()
            .map(|n| n.to_string()),
        AstKind::DotIdentifier => node.child(1)?.name().map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;
    use bqls_core::{FieldMode, SchemaField};
    use pretty_assertions::assert_eq;

    fn catalog() -> SimpleCatalog {
        let mut catalog = SimpleCatalog::new();
        catalog.add_table(
            "ds.users",
            TableMetadata::new(
                "proj:ds.users",
                Default::default(),
                vec![
                    SchemaField::new("id", "INTEGER"),
                    SchemaField::new("name", "STRING"),
                    SchemaField::new("address", "RECORD")
                        .with_fields(vec![SchemaField::new("city", "STRING")]),
                ],
            ),
        );
        catalog.add_table(
            "ds.orders",
            TableMetadata::new(
                "proj:ds.orders",
                Default::default(),
                vec![
                    SchemaField::new("id", "INTEGER"),
                    SchemaField::new("user_id", "INTEGER"),
                    SchemaField::new("amount", "NUMERIC"),
                ],
            ),
        );
        catalog.add_table(
            "ds.posts",
            TableMetadata::new(
                "proj:ds.posts",
                Default::default(),
                vec![
                    SchemaField::new("id", "INTEGER"),
                    SchemaField::new("tags", "STRING").with_mode(FieldMode::Repeated),
                ],
            ),
        );
        catalog
    }

    fn project_input(statement: &QueryStatement) -> &Scan {
        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan, got {}", statement.query.kind_name());
        };
        &project.input
    }

    fn analyze(sql: &str) -> AResult<QueryStatement> {
        let tree = SqlParser::new().parse(sql).unwrap();
        let catalog = catalog();
        let mut analyzer = Analyzer::new(&catalog);
        let statement = tree.statements().next().unwrap();
        analyzer.analyze_statement(statement)
    }

    fn output(statement: &QueryStatement) -> Vec<(String, String)> {
        statement
            .output_columns
            .iter()
            .map(|c| (c.name.clone(), c.column.column_type.to_string()))
            .collect()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn select_columns_pass_through() {
        let statement = analyze("SELECT id, name AS n FROM ds.users").unwrap();
        assert_eq!(output(&statement), pairs(&[("id", "INT64"), ("n", "STRING")]));

        // Pass-through columns keep their source table
        assert_eq!(statement.output_columns[0].column.table_name, "ds.users");

        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan, got {}", statement.query.kind_name());
        };
        assert!(project.expr_list.is_empty());
        assert!(matches!(*project.input, Scan::Table(_)));
    }

    #[test]
    fn select_star_expands_all_columns() {
        let statement = analyze("SELECT * FROM ds.users u").unwrap();
        let names: Vec<&str> = statement.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "address"]);
    }

    #[test]
    fn computed_columns() {
        let statement = analyze("SELECT UPPER(name), id + 1 AS next, address.city FROM ds.users").unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("$col1", "STRING"), ("next", "INT64"), ("city", "STRING")])
        );
        assert_eq!(statement.output_columns[0].column.table_name, QUERY_TABLE_NAME);
    }

    #[test]
    fn qualified_names_and_joins() {
        let statement = analyze(
            "SELECT u.name, o.amount FROM ds.users AS u JOIN ds.orders o ON u.id = o.user_id",
        )
        .unwrap();
        assert_eq!(output(&statement), pairs(&[("name", "STRING"), ("amount", "NUMERIC")]));

        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        let Scan::Join(join) = project.input.as_ref() else {
            panic!("expected JoinScan");
        };
        assert_eq!(join.join_type, JoinType::Inner);
        assert!(join.join_expr.is_some());
    }

    #[test]
    fn ambiguous_column() {
        let err = analyze("SELECT id FROM ds.users u JOIN ds.orders o ON u.id = o.user_id").unwrap_err();
        assert_eq!(err.message, "Column name id is ambiguous");
    }

    #[test]
    fn unknown_names() {
        let sql = "SELECT missing FROM ds.users";
        let err = analyze(sql).unwrap_err();
        assert_eq!(err.message, "Unrecognized name: missing");
        assert_eq!(err.span.unwrap().slice(sql), Some("missing"));
        assert_eq!(err.code, DiagnosticCode::SqlAnalysisError);

        let err = analyze("SELECT u.missing FROM ds.users u").unwrap_err();
        assert_eq!(err.message, "Name missing not found inside u");
    }

    #[test]
    fn table_not_found() {
        let sql = "SELECT * FROM ds.nope";
        let err = analyze(sql).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::TableNotFound);
        assert_eq!(err.message, "Table not found: ds.nope");
        assert_eq!(err.span.unwrap().slice(sql), Some("ds.nope"));
    }

    #[test]
    fn function_signature_mismatch() {
        let err = analyze("SELECT UPPER(id) FROM ds.users").unwrap_err();
        assert!(err
            .message
            .starts_with("No matching signature for function UPPER for argument types: INT64"));
    }

    #[test]
    fn where_must_be_bool() {
        let err = analyze("SELECT id FROM ds.users WHERE id").unwrap_err();
        assert_eq!(err.message, "WHERE clause should return type BOOL, but returns INT64");

        let statement = analyze("SELECT id FROM ds.users WHERE id > 1 AND name IS NOT NULL").unwrap();
        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        assert!(matches!(*project.input, Scan::Filter(_)));
    }

    #[test]
    fn struct_field_access() {
        let err = analyze("SELECT address.zip FROM ds.users").unwrap_err();
        assert_eq!(err.message, "Field name zip does not exist in STRUCT<city STRING>");

        let err = analyze("SELECT name.first FROM ds.users").unwrap_err();
        assert_eq!(err.message, "Cannot access field first on a value with type STRING");
    }

    #[test]
    fn aggregation() {
        let statement =
            analyze("SELECT user_id, SUM(amount) AS total FROM ds.orders GROUP BY user_id HAVING COUNT(*) > 1")
                .unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("user_id", "INT64"), ("total", "NUMERIC")])
        );

        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        let Scan::Filter(having) = project.input.as_ref() else {
            panic!("expected FilterScan for HAVING");
        };
        assert!(matches!(*having.input, Scan::Aggregate(_)));
    }

    #[test]
    fn group_by_select_alias() {
        let statement = analyze("SELECT UPPER(name) AS n, COUNT(*) FROM ds.users GROUP BY n").unwrap();
        assert_eq!(statement.output_columns.len(), 2);
    }

    #[test]
    fn with_clause_and_order_by() {
        let statement = analyze(
            "WITH big AS (SELECT user_id, amount FROM ds.orders WHERE amount > 100) \
             SELECT b.user_id AS uid FROM big AS b ORDER BY uid LIMIT 10",
        )
        .unwrap();
        assert_eq!(output(&statement), pairs(&[("uid", "INT64")]));

        let Scan::With(with) = &statement.query else {
            panic!("expected WithScan, got {}", statement.query.kind_name());
        };
        assert_eq!(with.with_entries[0].name, "big");
        let Scan::LimitOffset(limit) = with.query.as_ref() else {
            panic!("expected LimitOffsetScan");
        };
        assert!(matches!(*limit.input, Scan::OrderBy(_)));

        // Columns read through the WITH reference carry the entry name
        assert_eq!(statement.output_columns[0].column.table_name, "big");
    }

    #[test]
    fn with_entries_are_scoped_to_their_query() {
        let err = analyze("SELECT * FROM (WITH c AS (SELECT 1 AS x) SELECT x FROM c) JOIN c ON TRUE")
            .unwrap_err();
        assert_eq!(err.code, DiagnosticCode::TableNotFound);
    }

    #[test]
    fn subquery_in_from() {
        let statement = analyze("SELECT s.total FROM (SELECT SUM(amount) AS total FROM ds.orders) s").unwrap();
        assert_eq!(output(&statement), pairs(&[("total", "NUMERIC")]));
    }

    #[test]
    fn select_without_from() {
        let statement = analyze("SELECT 1 AS one, 'a' || 'b' AS ab, CAST('1' AS INT64) AS n").unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("one", "INT64"), ("ab", "STRING"), ("n", "INT64")])
        );
        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        assert!(matches!(*project.input, Scan::SingleRow(_)));
    }

    #[test]
    fn date_part_arguments() {
        let mut catalog = SimpleCatalog::new();
        catalog.add_table(
            "events",
            TableMetadata::new("p:d.events", Default::default(), vec![SchemaField::new("day", "DATE")]),
        );
        let tree = SqlParser::new()
            .parse("SELECT DATE_TRUNC(day, MONTH) AS m FROM events")
            .unwrap();
        let statement = Analyzer::new(&catalog)
            .analyze_statement(tree.statements().next().unwrap())
            .unwrap();
        assert_eq!(statement.output_columns[0].column.column_type, SqlType::Date);
    }

    #[test]
    fn operators_have_no_range() {
        let statement = analyze("SELECT id + 1 AS x FROM ds.users").unwrap();
        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        let Expr::FunctionCall(call) = &project.expr_list[0].expr else {
            panic!("expected FunctionCall");
        };
        assert_eq!(call.function.name, "$add");
        assert_eq!(call.range, None);
    }

    #[test]
    fn union_all_lines_up_columns() {
        let statement =
            analyze("SELECT id, name FROM ds.users UNION ALL SELECT user_id, NULL FROM ds.orders").unwrap();
        assert_eq!(output(&statement), pairs(&[("id", "INT64"), ("name", "STRING")]));
        assert_eq!(statement.output_columns[0].column.table_name, "$union_all");

        let Scan::SetOperation(union) = &statement.query else {
            panic!("expected SetOperationScan, got {}", statement.query.kind_name());
        };
        assert_eq!(union.op_type, SetOperationType::UnionAll);
        assert_eq!(union.inputs.len(), 2);
    }

    #[test]
    fn set_operation_with_order_by_and_limit() {
        let statement = analyze(
            "SELECT id FROM ds.users UNION DISTINCT SELECT user_id FROM ds.orders ORDER BY id LIMIT 5",
        )
        .unwrap();
        let Scan::LimitOffset(limit) = &statement.query else {
            panic!("expected LimitOffsetScan");
        };
        let Scan::OrderBy(order_by) = limit.input.as_ref() else {
            panic!("expected OrderByScan");
        };
        assert!(matches!(
            order_by.input.as_ref(),
            Scan::SetOperation(s) if s.op_type == SetOperationType::UnionDistinct
        ));
    }

    #[test]
    fn set_operation_inputs_must_agree() {
        let err = analyze("SELECT id FROM ds.users UNION ALL SELECT id, name FROM ds.users").unwrap_err();
        assert_eq!(
            err.message,
            "Queries in UNION ALL have mismatched column count; query 1 has 1 column, query 2 has 2 columns"
        );

        let err = analyze("SELECT id FROM ds.users EXCEPT DISTINCT SELECT name FROM ds.users").unwrap_err();
        assert_eq!(
            err.message,
            "Column 1 in EXCEPT DISTINCT has incompatible types: INT64, STRING"
        );
    }

    #[test]
    fn analytic_functions() {
        let statement = analyze(
            "SELECT id, ROW_NUMBER() OVER (PARTITION BY name ORDER BY id DESC) AS rn, COUNT(*) OVER () \
             FROM ds.users",
        )
        .unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("id", "INT64"), ("rn", "INT64"), ("$col3", "INT64")])
        );

        let Scan::Analytic(analytic) = project_input(&statement) else {
            panic!("expected AnalyticScan");
        };
        assert!(matches!(*analytic.input, Scan::Table(_)));
        assert_eq!(analytic.function_list.len(), 2);
        let Expr::AnalyticFunctionCall(call) = &analytic.function_list[0].expr else {
            panic!("expected AnalyticFunctionCall");
        };
        assert_eq!(call.function.name, "ROW_NUMBER");
        assert_eq!(call.partition_by.len(), 1);
        assert!(call.order_by[0].descending);
    }

    #[test]
    fn analytic_function_placement() {
        let err = analyze("SELECT ROW_NUMBER() AS rn FROM ds.users").unwrap_err();
        assert_eq!(
            err.message,
            "Analytic function ROW_NUMBER cannot be called without an OVER clause"
        );

        let err = analyze("SELECT UPPER(name) OVER () FROM ds.users").unwrap_err();
        assert_eq!(err.message, "Function UPPER does not support an OVER clause");

        let err = analyze("SELECT id FROM ds.users WHERE RANK() OVER (ORDER BY id) = 1").unwrap_err();
        assert_eq!(
            err.message,
            "Analytic function RANK is only allowed in the SELECT list and QUALIFY clause"
        );
    }

    #[test]
    fn qualify_and_named_windows() {
        let statement = analyze(
            "SELECT id, RANK() OVER w AS r FROM ds.users QUALIFY r = 1 \
             WINDOW w AS (PARTITION BY name ORDER BY id)",
        )
        .unwrap();
        assert_eq!(output(&statement), pairs(&[("id", "INT64"), ("r", "INT64")]));

        let Scan::Filter(qualify) = project_input(&statement) else {
            panic!("expected FilterScan for QUALIFY");
        };
        let Scan::Analytic(analytic) = qualify.input.as_ref() else {
            panic!("expected AnalyticScan");
        };
        let Expr::AnalyticFunctionCall(call) = &analytic.function_list[0].expr else {
            panic!("expected AnalyticFunctionCall");
        };
        assert_eq!(call.partition_by.len(), 1);

        let err = analyze("SELECT RANK() OVER missing FROM ds.users").unwrap_err();
        assert_eq!(err.message, "Unrecognized window alias missing");
    }

    #[test]
    fn unnest_joined_to_a_table() {
        let statement =
            analyze("SELECT id, n, pos FROM ds.users, UNNEST([1, 2]) AS n WITH OFFSET AS pos").unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("id", "INT64"), ("n", "INT64"), ("pos", "INT64")])
        );
        assert_eq!(statement.output_columns[1].column.table_name, ARRAY_TABLE_NAME);

        let Scan::Array(array) = project_input(&statement) else {
            panic!("expected ArrayScan");
        };
        assert!(matches!(array.input.as_deref(), Some(Scan::Table(_))));
        assert!(array.offset_column.is_some());
        assert!(!array.is_outer);
    }

    #[test]
    fn unnest_of_correlated_array_columns() {
        let statement = analyze("SELECT p.id, tag FROM ds.posts p LEFT JOIN UNNEST(p.tags) AS tag").unwrap();
        assert_eq!(output(&statement), pairs(&[("id", "INT64"), ("tag", "STRING")]));
        let Scan::Array(array) = project_input(&statement) else {
            panic!("expected ArrayScan");
        };
        assert!(array.is_outer);

        let statement = analyze("SELECT t FROM ds.posts, posts.tags AS t").unwrap();
        assert_eq!(output(&statement), pairs(&[("t", "STRING")]));
    }

    #[test]
    fn unnest_needs_an_array() {
        let err = analyze("SELECT x FROM ds.users u, UNNEST(u.name) AS x").unwrap_err();
        assert_eq!(
            err.message,
            "Values referenced in UNNEST must be arrays. UNNEST contains expression of type STRING"
        );

        let err = analyze("SELECT * FROM ds.users RIGHT JOIN UNNEST([1]) AS x ON TRUE").unwrap_err();
        assert_eq!(err.message, "Arrays can only be joined with INNER, CROSS or LEFT JOIN");
    }

    #[test]
    fn expression_subqueries() {
        let statement = analyze(
            "SELECT id, (SELECT MAX(amount) FROM ds.orders o WHERE o.user_id = u.id) AS top, \
             ARRAY(SELECT id FROM ds.orders) AS ids FROM ds.users u \
             WHERE EXISTS (SELECT 1 FROM ds.orders) AND id IN (SELECT user_id FROM ds.orders)",
        )
        .unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("id", "INT64"), ("top", "NUMERIC"), ("ids", "ARRAY<INT64>")])
        );

        let Scan::Project(project) = &statement.query else {
            panic!("expected ProjectScan");
        };
        let Expr::Subquery(scalar) = &project.expr_list[0].expr else {
            panic!("expected SubqueryExpr");
        };
        assert_eq!(scalar.subquery_type, SubqueryType::Scalar);
    }

    #[test]
    fn expression_subqueries_need_one_column() {
        let err = analyze("SELECT (SELECT id, name FROM ds.users) AS x").unwrap_err();
        assert_eq!(
            err.message,
            "Scalar subquery cannot have more than one column unless using SELECT AS STRUCT to build STRUCT values"
        );

        let err = analyze("SELECT id FROM ds.users WHERE id IN (SELECT name FROM ds.users)").unwrap_err();
        assert_eq!(
            err.message,
            "Cannot execute IN subquery with uncomparable types INT64 and STRING"
        );
    }

    #[test]
    fn arrays_intervals_and_bytes() {
        let statement = analyze("SELECT tags[SAFE_OFFSET(0)] AS first_tag FROM ds.posts").unwrap();
        assert_eq!(output(&statement), pairs(&[("first_tag", "STRING")]));

        let statement = analyze(
            "SELECT 3 IN UNNEST([1, 2]) AS found, DATE_ADD(CURRENT_DATE(), INTERVAL 1 DAY) AS tomorrow, \
             EXTRACT(YEAR FROM CURRENT_DATE()) AS y, b'ab' AS bin",
        )
        .unwrap();
        assert_eq!(
            output(&statement),
            pairs(&[("found", "BOOL"), ("tomorrow", "DATE"), ("y", "INT64"), ("bin", "BYTES")])
        );

        let err = analyze("SELECT name[OFFSET(0)] FROM ds.users").unwrap_err();
        assert_eq!(
            err.message,
            "No matching signature for operator [OFFSET] for argument types: STRING, INT64"
        );
    }

    #[test]
    fn star_except() {
        let statement = analyze("SELECT * EXCEPT (address) FROM ds.users").unwrap();
        let names: Vec<&str> = statement.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);

        let statement = analyze("SELECT u.* EXCEPT (id) FROM ds.users u").unwrap();
        let names: Vec<&str> = statement.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "address"]);

        let sql = "SELECT * EXCEPT (zip) FROM ds.users";
        let err = analyze(sql).unwrap_err();
        assert_eq!(err.message, "Column zip in SELECT * EXCEPT list does not exist");
        assert_eq!(err.span.unwrap().slice(sql), Some("zip"));
    }
}
