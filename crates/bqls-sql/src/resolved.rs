//! Resolved (semantically analyzed) query tree
//!
//! Scans form the relational spine of a query; expressions hang off them.
//! Every node carries the byte range of the syntax it was resolved from,
//! or `None` for nodes with no source of their own (operators, the
//! implicit single-row scan of a FROM-less SELECT).

use crate::functions::Function;
use bqls_core::{SqlType, TextRange};
use std::sync::Arc;

/// Unique id of a column within one analyzed statement
pub type ColumnId = u32;

/// Table name used for columns computed by a query
pub const QUERY_TABLE_NAME: &str = "$query";

/// Table name of columns computed by analytic function calls
pub const ANALYTIC_TABLE_NAME: &str = "$analytic";

/// Table name of UNNEST element and offset columns
pub const ARRAY_TABLE_NAME: &str = "$array";

/// A column flowing through the scan tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,

    /// Table the column originates from: the table path as written, the
    /// WITH entry name, or [`QUERY_TABLE_NAME`] for computed columns
    pub table_name: String,

    pub name: String,

    pub column_type: SqlType,
}

/// A column defined by an expression
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedColumn {
    pub column: Column,
    pub expr: Expr,
}

/// A named output column of a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    pub name: String,
    pub column: Column,
}

/// A resolved query statement
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatement {
    pub output_columns: Vec<OutputColumn>,
    pub query: Scan,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// Relational operators
#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    Table(TableScan),
    Project(ProjectScan),
    Filter(FilterScan),
    Join(JoinScan),
    Aggregate(AggregateScan),
    OrderBy(OrderByScan),
    LimitOffset(LimitOffsetScan),
    With(WithScan),
    WithRef(WithRefScan),
    SingleRow(SingleRowScan),
    SetOperation(SetOperationScan),
    Array(ArrayScan),
    Analytic(AnalyticScan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    /// Table path as written
    pub table_name: String,
    /// Range variable name: the explicit alias, else the last path part
    pub alias: Option<String>,
    pub column_list: Vec<Column>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectScan {
    pub column_list: Vec<Column>,
    pub expr_list: Vec<ComputedColumn>,
    pub input: Box<Scan>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterScan {
    pub column_list: Vec<Column>,
    pub input: Box<Scan>,
    pub filter_expr: Expr,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinScan {
    pub column_list: Vec<Column>,
    pub join_type: JoinType,
    pub left: Box<Scan>,
    pub right: Box<Scan>,
    pub join_expr: Option<Expr>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateScan {
    pub column_list: Vec<Column>,
    pub input: Box<Scan>,
    pub group_by_list: Vec<ComputedColumn>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByScan {
    pub column_list: Vec<Column>,
    pub input: Box<Scan>,
    pub order_by_items: Vec<OrderByItem>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitOffsetScan {
    pub column_list: Vec<Column>,
    pub input: Box<Scan>,
    pub limit: Expr,
    pub offset: Option<Expr>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithEntry {
    pub name: String,
    pub query: Scan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithScan {
    pub column_list: Vec<Column>,
    pub with_entries: Vec<WithEntry>,
    pub query: Box<Scan>,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithRefScan {
    pub column_list: Vec<Column>,
    pub with_query_name: String,
    /// Range variable name: the explicit alias, else the entry name
    pub alias: String,
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleRowScan {
    pub range: Option<TextRange>,
}

/// `UNION` / `INTERSECT` / `EXCEPT` with their `ALL` / `DISTINCT` flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperationType {
    UnionAll,
    UnionDistinct,
    IntersectAll,
    IntersectDistinct,
    ExceptAll,
    ExceptDistinct,
}

impl SetOperationType {
    /// Operator as written in SQL
    pub fn sql(&self) -> &'static str {
        match self {
            Self::UnionAll => "UNION ALL",
            Self::UnionDistinct => "UNION DISTINCT",
            Self::IntersectAll => "INTERSECT ALL",
            Self::IntersectDistinct => "INTERSECT DISTINCT",
            Self::ExceptAll => "EXCEPT ALL",
            Self::ExceptDistinct => "EXCEPT DISTINCT",
        }
    }

    /// Table name given to the output columns (`$union_all`, ...)
    pub fn table_name(&self) -> String {
        format!("${}", self.sql().to_lowercase().replace(' ', "_"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperationScan {
    /// Fresh columns named after the first input's outputs
    pub column_list: Vec<Column>,
    pub op_type: SetOperationType,
    pub inputs: Vec<Scan>,
    pub range: Option<TextRange>,
}

/// `UNNEST(array)`, optionally joined to the scan on its left
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayScan {
    pub column_list: Vec<Column>,
    /// Left-hand side of a join, `None` for a standalone UNNEST
    pub input: Option<Box<Scan>>,
    pub array_expr: Expr,
    pub element_column: Column,
    /// `WITH OFFSET` column
    pub offset_column: Option<Column>,
    pub join_expr: Option<Expr>,
    /// LEFT JOIN keeps input rows whose array is empty
    pub is_outer: bool,
    pub range: Option<TextRange>,
}

/// Computes analytic function calls over its input
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticScan {
    pub column_list: Vec<Column>,
    pub input: Box<Scan>,
    /// Each entry holds an [`Expr::AnalyticFunctionCall`]
    pub function_list: Vec<ComputedColumn>,
    pub range: Option<TextRange>,
}

impl Scan {
    pub fn column_list(&self) -> &[Column] {
        match self {
            Scan::Table(s) => &s.column_list,
            Scan::Project(s) => &s.column_list,
            Scan::Filter(s) => &s.column_list,
            Scan::Join(s) => &s.column_list,
            Scan::Aggregate(s) => &s.column_list,
            Scan::OrderBy(s) => &s.column_list,
            Scan::LimitOffset(s) => &s.column_list,
            Scan::With(s) => &s.column_list,
            Scan::WithRef(s) => &s.column_list,
            Scan::SingleRow(_) => &[],
            Scan::SetOperation(s) => &s.column_list,
            Scan::Array(s) => &s.column_list,
            Scan::Analytic(s) => &s.column_list,
        }
    }

    pub fn range(&self) -> Option<TextRange> {
        match self {
            Scan::Table(s) => s.range,
            Scan::Project(s) => s.range,
            Scan::Filter(s) => s.range,
            Scan::Join(s) => s.range,
            Scan::Aggregate(s) => s.range,
            Scan::OrderBy(s) => s.range,
            Scan::LimitOffset(s) => s.range,
            Scan::With(s) => s.range,
            Scan::WithRef(s) => s.range,
            Scan::SingleRow(s) => s.range,
            Scan::SetOperation(s) => s.range,
            Scan::Array(s) => s.range,
            Scan::Analytic(s) => s.range,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Scan::Table(_) => "TableScan",
            Scan::Project(_) => "ProjectScan",
            Scan::Filter(_) => "FilterScan",
            Scan::Join(_) => "JoinScan",
            Scan::Aggregate(_) => "AggregateScan",
            Scan::OrderBy(_) => "OrderByScan",
            Scan::LimitOffset(_) => "LimitOffsetScan",
            Scan::With(_) => "WithScan",
            Scan::WithRef(_) => "WithRefScan",
            Scan::SingleRow(_) => "SingleRowScan",
            Scan::SetOperation(_) => "SetOperationScan",
            Scan::Array(_) => "ArrayScan",
            Scan::Analytic(_) => "AnalyticScan",
        }
    }
}

/// Literal expression
#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    /// Literal as written (`'abc'`, `42`, `DAY`)
    pub text: String,
    pub literal_type: SqlType,
    pub range: Option<TextRange>,
}

/// Reference to a column in scope
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub column: Column,
    pub range: Option<TextRange>,
}

/// Function or operator call
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub function: Arc<Function>,
    pub arguments: Vec<Expr>,
    pub return_type: SqlType,
    /// `None` for operators, which have no name token to hover
    pub range: Option<TextRange>,
}

/// `expr.field` on a STRUCT value
#[derive(Debug, Clone, PartialEq)]
pub struct GetStructField {
    pub expr: Box<Expr>,
    pub field_name: String,
    pub field_type: SqlType,
    pub range: Option<TextRange>,
}

/// `CAST(expr AS type)` / `SAFE_CAST(...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Cast {
    pub expr: Box<Expr>,
    pub target_type: SqlType,
    pub safe: bool,
    pub range: Option<TextRange>,
}

/// Function call with an `OVER` clause
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticFunctionCall {
    pub function: Arc<Function>,
    pub arguments: Vec<Expr>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub return_type: SqlType,
    /// From the function name through the end of the window
    pub range: Option<TextRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryType {
    Scalar,
    Array,
    Exists,
    In,
}

/// Subquery used as a value
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub subquery_type: SubqueryType,
    pub subquery: Box<Scan>,
    /// Left-hand side of `expr IN (SELECT ...)`
    pub in_expr: Option<Box<Expr>>,
    pub result_type: SqlType,
    pub range: Option<TextRange>,
}

/// Resolved expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    ColumnRef(ColumnRef),
    FunctionCall(FunctionCall),
    AnalyticFunctionCall(AnalyticFunctionCall),
    GetStructField(GetStructField),
    Cast(Cast),
    Subquery(SubqueryExpr),
}

impl Expr {
    /// Type of the value this expression produces
    pub fn expr_type(&self) -> SqlType {
        match self {
            Expr::Literal(e) => e.literal_type.clone(),
            Expr::ColumnRef(e) => e.column.column_type.clone(),
            Expr::FunctionCall(e) => e.return_type.clone(),
            Expr::AnalyticFunctionCall(e) => e.return_type.clone(),
            Expr::GetStructField(e) => e.field_type.clone(),
            Expr::Cast(e) => e.target_type.clone(),
            Expr::Subquery(e) => e.result_type.clone(),
        }
    }

    pub fn range(&self) -> Option<TextRange> {
        match self {
            Expr::Literal(e) => e.range,
            Expr::ColumnRef(e) => e.range,
            Expr::FunctionCall(e) => e.range,
            Expr::AnalyticFunctionCall(e) => e.range,
            Expr::GetStructField(e) => e.range,
            Expr::Cast(e) => e.range,
            Expr::Subquery(e) => e.range,
        }
    }

    /// Direct sub-expressions; a subquery's own scan is not included
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::ColumnRef(_) => Vec::new(),
            Expr::FunctionCall(e) => e.arguments.iter().collect(),
            Expr::AnalyticFunctionCall(e) => e
                .arguments
                .iter()
                .chain(&e.partition_by)
                .chain(e.order_by.iter().map(|i| &i.expr))
                .collect(),
            Expr::GetStructField(e) => vec![e.expr.as_ref()],
            Expr::Cast(e) => vec![e.expr.as_ref()],
            Expr::Subquery(e) => e.in_expr.iter().map(Box::as_ref).collect(),
        }
    }

    /// Whether an aggregate function is called in this expression
    ///
    /// Calls inside subqueries and windowed aggregates do not count.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::FunctionCall(call) if call.function.aggregate => true,
            Expr::AnalyticFunctionCall(_) => false,
            _ => self.children().into_iter().any(Expr::contains_aggregate),
        }
    }
}

/// Borrowed handle to any node of a resolved statement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedNode<'a> {
    Statement(&'a QueryStatement),
    Scan(&'a Scan),
    Expr(&'a Expr),
}

impl<'a> ResolvedNode<'a> {
    pub fn range(&self) -> Option<TextRange> {
        match self {
            ResolvedNode::Statement(s) => s.range,
            ResolvedNode::Scan(s) => s.range(),
            ResolvedNode::Expr(e) => e.range(),
        }
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<ResolvedNode<'a>> {
        match *self {
            ResolvedNode::Statement(s) => vec![ResolvedNode::Scan(&s.query)],
            ResolvedNode::Expr(Expr::Subquery(e)) => {
                let mut out: Vec<ResolvedNode<'a>> = e.in_expr.as_deref().map(ResolvedNode::Expr).into_iter().collect();
                out.push(ResolvedNode::Scan(&e.subquery));
                out
            }
            ResolvedNode::Expr(e) => e.children().into_iter().map(ResolvedNode::Expr).collect(),
            ResolvedNode::Scan(scan) => {
                let mut out = Vec::new();
                let computed = |list: &'a [ComputedColumn]| {
                    list.iter().map(|c| ResolvedNode::Expr(&c.expr))
                };
                match scan {
                    Scan::Table(_) | Scan::WithRef(_) | Scan::SingleRow(_) => {}
                    Scan::Project(s) => {
                        out.extend(computed(s.expr_list.as_slice()));
                        out.push(ResolvedNode::Scan(&s.input));
                    }
                    Scan::Filter(s) => {
                        out.push(ResolvedNode::Scan(&s.input));
                        out.push(ResolvedNode::Expr(&s.filter_expr));
                    }
                    Scan::Join(s) => {
                        out.push(ResolvedNode::Scan(&s.left));
                        out.push(ResolvedNode::Scan(&s.right));
                        out.extend(s.join_expr.iter().map(ResolvedNode::Expr));
                    }
                    Scan::Aggregate(s) => {
                        out.push(ResolvedNode::Scan(&s.input));
                        out.extend(computed(s.group_by_list.as_slice()));
                    }
                    Scan::OrderBy(s) => {
                        out.push(ResolvedNode::Scan(&s.input));
                        out.extend(s.order_by_items.iter().map(|i| ResolvedNode::Expr(&i.expr)));
                    }
                    Scan::LimitOffset(s) => {
                        out.push(ResolvedNode::Scan(&s.input));
                        out.push(ResolvedNode::Expr(&s.limit));
                        out.extend(s.offset.iter().map(ResolvedNode::Expr));
                    }
                    Scan::With(s) => {
                        out.extend(s.with_entries.iter().map(|e| ResolvedNode::Scan(&e.query)));
                        out.push(ResolvedNode::Scan(&s.query));
                    }
                    Scan::SetOperation(s) => out.extend(s.inputs.iter().map(ResolvedNode::Scan)),
                    Scan::Array(s) => {
                        out.extend(s.input.as_deref().map(ResolvedNode::Scan));
                        out.push(ResolvedNode::Expr(&s.array_expr));
                        out.extend(s.join_expr.iter().map(ResolvedNode::Expr));
                    }
                    Scan::Analytic(s) => {
                        out.push(ResolvedNode::Scan(&s.input));
                        out.extend(computed(s.function_list.as_slice()));
                    }
                }
                out
            }
        }
    }
}
