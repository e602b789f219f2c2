//! Locating nodes by byte offset
//!
//! Both trees (surface and resolved) are walked through the same small set
//! of traits, so the search rules live in one place:
//!
//! - [`search_node`] walks pre-order and keeps the *last* node of the
//!   requested kind whose range contains the offset. Children are visited
//!   after their parents, so this yields the innermost match.
//! - [`lookup_node`] walks strictly upward and returns the nearest ancestor
//!   of the requested kind.

use crate::ast::{AstRef, PathExpression, SelectColumn, TablePathExpression};
use crate::resolved::{AnalyticFunctionCall, ColumnRef, Expr, FunctionCall, GetStructField, ResolvedNode, Scan};
use bqls_core::TextRange;

/// Anything with an optional source range
pub trait Located {
    fn location(&self) -> Option<TextRange>;
}

impl<T: Located> Located for &T {
    fn location(&self) -> Option<TextRange> {
        (**self).location()
    }
}

/// A node that can be walked downward
pub trait TreeNode: Copy + Located {
    fn child_nodes(&self) -> Vec<Self>;
}

/// A node that knows its parent
pub trait ParentLink: Copy {
    fn parent_node(&self) -> Option<Self>;
}

/// A typed view over a generic node `N`
pub trait NodeKind<N>: Sized + Located {
    fn cast(node: N) -> Option<Self>;
}

/// Visit `root` and everything below it, pre-order
pub fn walk<N: TreeNode>(root: N, mut visit: impl FnMut(N)) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visit(node);
        let mut children = node.child_nodes();
        children.reverse();
        stack.extend(children);
    }
}

/// Innermost node of kind `K` whose range contains `offset`
pub fn search_node<N: TreeNode, K: NodeKind<N>>(root: N, offset: usize) -> Option<K> {
    let mut found = None;
    walk(root, |node| {
        if let Some(candidate) = K::cast(node) {
            if candidate.location().is_some_and(|r| r.contains(offset)) {
                found = Some(candidate);
            }
        }
    });
    found
}

/// Every node of kind `K` whose range contains `offset`, outermost first
pub fn search_nodes<N: TreeNode, K: NodeKind<N>>(root: N, offset: usize) -> Vec<K> {
    let mut found = Vec::new();
    walk(root, |node| {
        if let Some(candidate) = K::cast(node) {
            if candidate.location().is_some_and(|r| r.contains(offset)) {
                found.push(candidate);
            }
        }
    });
    found
}

/// Nearest strict ancestor of kind `K`
pub fn lookup_node<N: ParentLink, K: NodeKind<N>>(node: N) -> Option<K> {
    let mut current = node.parent_node();
    while let Some(n) = current {
        if let Some(found) = K::cast(n) {
            return Some(found);
        }
        current = n.parent_node();
    }
    None
}

// Surface tree

impl Located for AstRef<'_> {
    fn location(&self) -> Option<TextRange> {
        self.range()
    }
}

impl TreeNode for AstRef<'_> {
    fn child_nodes(&self) -> Vec<Self> {
        self.children().collect()
    }
}

impl ParentLink for AstRef<'_> {
    fn parent_node(&self) -> Option<Self> {
        self.parent()
    }
}

impl<'a> NodeKind<AstRef<'a>> for AstRef<'a> {
    fn cast(node: AstRef<'a>) -> Option<Self> {
        Some(node)
    }
}

macro_rules! surface_kind {
    ($ty:ident) => {
        impl Located for $ty<'_> {
            fn location(&self) -> Option<TextRange> {
                self.node().range()
            }
        }

        impl<'a> NodeKind<AstRef<'a>> for $ty<'a> {
            fn cast(node: AstRef<'a>) -> Option<Self> {
                $ty::cast(node)
            }
        }
    };
}

surface_kind!(PathExpression);
surface_kind!(TablePathExpression);
surface_kind!(SelectColumn);

// Resolved tree

impl Located for ResolvedNode<'_> {
    fn location(&self) -> Option<TextRange> {
        self.range()
    }
}

impl TreeNode for ResolvedNode<'_> {
    fn child_nodes(&self) -> Vec<Self> {
        self.children()
    }
}

impl Located for Scan {
    fn location(&self) -> Option<TextRange> {
        self.range()
    }
}

impl Located for Expr {
    fn location(&self) -> Option<TextRange> {
        self.range()
    }
}

impl Located for FunctionCall {
    fn location(&self) -> Option<TextRange> {
        self.range
    }
}

impl Located for AnalyticFunctionCall {
    fn location(&self) -> Option<TextRange> {
        self.range
    }
}

impl Located for ColumnRef {
    fn location(&self) -> Option<TextRange> {
        self.range
    }
}

impl Located for GetStructField {
    fn location(&self) -> Option<TextRange> {
        self.range
    }
}

impl<'a> NodeKind<ResolvedNode<'a>> for &'a Scan {
    fn cast(node: ResolvedNode<'a>) -> Option<Self> {
        match node {
            ResolvedNode::Scan(scan) => Some(scan),
            _ => None,
        }
    }
}

impl<'a> NodeKind<ResolvedNode<'a>> for &'a Expr {
    fn cast(node: ResolvedNode<'a>) -> Option<Self> {
        match node {
            ResolvedNode::Expr(expr) => Some(expr),
            _ => None,
        }
    }
}

macro_rules! resolved_expr_kind {
    ($ty:ident) => {
        impl<'a> NodeKind<ResolvedNode<'a>> for &'a $ty {
            fn cast(node: ResolvedNode<'a>) -> Option<Self> {
                match node {
                    ResolvedNode::Expr(Expr::$ty(inner)) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

resolved_expr_kind!(FunctionCall);
resolved_expr_kind!(AnalyticFunctionCall);
resolved_expr_kind!(ColumnRef);
resolved_expr_kind!(GetStructField);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Analyzer, SimpleCatalog};
    use crate::parser::SqlParser;
    use bqls_core::{SchemaField, TableMetadata};

    fn users() -> TableMetadata {
        TableMetadata::new(
            "proj:ds.users",
            Default::default(),
            vec![
                SchemaField::new("id", "INTEGER"),
                SchemaField::new("name", "STRING"),
            ],
        )
    }

    fn offset_of(sql: &str, needle: &str) -> usize {
        sql.find(needle).unwrap()
    }

    #[test]
    fn search_path_expression_innermost() {
        let sql = "SELECT UPPER(name) FROM users";
        let tree = SqlParser::new().parse(sql).unwrap();

        let path: PathExpression = search_node(tree.root(), offset_of(sql, "name") + 1).unwrap();
        assert_eq!(path.names(), vec!["name"]);

        let fn_name: PathExpression = search_node(tree.root(), offset_of(sql, "UPPER")).unwrap();
        assert_eq!(fn_name.names(), vec!["UPPER"]);
    }

    #[test]
    fn search_outside_any_path_finds_nothing() {
        let sql = "SELECT 1 + 2";
        let tree = SqlParser::new().parse(sql).unwrap();
        assert!(search_node::<_, PathExpression>(tree.root(), 8).is_none());
    }

    #[test]
    fn boundaries_are_inclusive() {
        let sql = "SELECT id FROM users";
        let tree = SqlParser::new().parse(sql).unwrap();
        let end_of_id = offset_of(sql, "id") + 2;
        let path: PathExpression = search_node(tree.root(), end_of_id).unwrap();
        assert_eq!(path.names(), vec!["id"]);
    }

    #[test]
    fn lookup_finds_enclosing_table_path() {
        let sql = "SELECT id FROM ds.users AS u";
        let tree = SqlParser::new().parse(sql).unwrap();

        let path: PathExpression = search_node(tree.root(), offset_of(sql, "users")).unwrap();
        let table: TablePathExpression = lookup_node(path.node()).unwrap();
        assert_eq!(table.alias(), Some("u"));

        let column_path: PathExpression = search_node(tree.root(), offset_of(sql, "id")).unwrap();
        assert!(lookup_node::<_, TablePathExpression>(column_path.node()).is_none());
        let column: SelectColumn = lookup_node(column_path.node()).unwrap();
        assert_eq!(column.alias(), None);
    }

    #[test]
    fn lookup_is_strict() {
        let sql = "SELECT id FROM users";
        let tree = SqlParser::new().parse(sql).unwrap();
        let column: SelectColumn = search_node(tree.root(), offset_of(sql, "id")).unwrap();
        // The node itself is never returned
        assert!(lookup_node::<_, SelectColumn>(column.node()).is_none());
    }

    #[test]
    fn search_resolved_tree() {
        let sql = "SELECT UPPER(LOWER(name)) FROM users WHERE id = 1";
        let tree = SqlParser::new().parse(sql).unwrap();
        let mut catalog = SimpleCatalog::new();
        catalog.add_table("users", users());

        let statement = Analyzer::new(&catalog)
            .analyze_statement(tree.statements().next().unwrap())
            .unwrap();
        let root = ResolvedNode::Statement(&statement);

        let call: &FunctionCall = search_node(root, offset_of(sql, "name")).unwrap();
        assert_eq!(call.function.name, "LOWER");

        let column: &ColumnRef = search_node(root, offset_of(sql, "id =")).unwrap();
        assert_eq!(column.column.name, "id");

        let scans: Vec<&Scan> = search_nodes(root, offset_of(sql, "users"));
        let kinds: Vec<&str> = scans.iter().map(|s| s.kind_name()).collect();
        assert_eq!(kinds, vec!["ProjectScan", "FilterScan", "TableScan"]);
    }

    #[test]
    fn search_reaches_analytic_calls_and_subqueries() {
        let sql = "SELECT LAG(name) OVER (ORDER BY id) FROM users WHERE id IN (SELECT id FROM users)";
        let tree = SqlParser::new().parse(sql).unwrap();
        let mut catalog = SimpleCatalog::new();
        catalog.add_table("users", users());

        let statement = Analyzer::new(&catalog)
            .analyze_statement(tree.statements().next().unwrap())
            .unwrap();
        let root = ResolvedNode::Statement(&statement);

        let call: &AnalyticFunctionCall = search_node(root, offset_of(sql, "ORDER")).unwrap();
        assert_eq!(call.function.name, "LAG");

        let column: &ColumnRef = search_node(root, offset_of(sql, "id)")).unwrap();
        assert_eq!(column.column.name, "id");
        assert_eq!(column.column.table_name, "users");

        let scans: Vec<&Scan> = search_nodes(root, sql.rfind("users").unwrap());
        let kinds: Vec<&str> = scans.iter().map(|s| s.kind_name()).collect();
        assert_eq!(
            kinds,
            vec!["ProjectScan", "AnalyticScan", "FilterScan", "ProjectScan", "TableScan"]
        );
    }
}
