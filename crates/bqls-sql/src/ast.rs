//! Surface syntax tree
//!
//! Nodes live in a flat arena owned by [`SyntaxTree`] and refer to each
//! other by [`NodeId`]. Every node knows its parent and its children in
//! source order, so both downward walks and upward ancestor lookups are
//! plain index hops.

use bqls_core::TextRange;

/// Index of a node inside its [`SyntaxTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Join flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    /// `FROM a, b`
    Comma,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    NotLike,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl BinaryOp {
    /// Operator as written in SQL
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "OR",
            Self::And => "AND",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Concat => "||",
        }
    }
}

/// Set operators joining two query bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

impl SetOp {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// Expression subqueries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubqueryKind {
    /// `(SELECT ...)` used as a value
    Scalar,
    /// `ARRAY(SELECT ...)`
    Array,
    Exists { negated: bool },
    /// `expr [NOT] IN (SELECT ...)`
    In { negated: bool },
}

/// Array subscript flavors: `a[OFFSET(i)]`, `a[SAFE_ORDINAL(i)]`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayPosition {
    Offset,
    SafeOffset,
    Ordinal,
    SafeOrdinal,
}

impl ArrayPosition {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "OFFSET" => Some(Self::Offset),
            "SAFE_OFFSET" => Some(Self::SafeOffset),
            "ORDINAL" => Some(Self::Ordinal),
            "SAFE_ORDINAL" => Some(Self::SafeOrdinal),
            _ => None,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Minus,
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralValue {
    Int(String),
    Float(String),
    String(String),
    Bytes(String),
    Bool(bool),
    Null,
    /// `@name` or `?` query parameter
    Parameter(String),
}

/// Kind of a surface node
///
/// Children layout per kind:
/// - `Script`: statements
/// - `QueryStatement`: `[Query]`
/// - `Query`: `[WithClause?, Select | Query | SetOperation, OrderBy?, Limit?]`
/// - `SetOperation`: `[Select | Query | SetOperation, Select | Query | SetOperation]`
/// - `WithEntry`: `[Query]`
/// - `Select`: `[SelectList, FromClause?, WhereClause?, GroupBy?, Having?, WindowClause?, Qualify?]`
/// - `SelectColumn`: `[expr | Star | DotStar, Alias?]`
/// - `Star`: `[Identifier...]` naming `* EXCEPT (...)` columns
/// - `DotStar`: `[PathExpression, Star]`
/// - `FromClause`: `[TablePathExpression | TableSubquery | Unnest | Join]`
/// - `TablePathExpression`: `[PathExpression, Alias?]`
/// - `TableSubquery`: `[Query, Alias?]`
/// - `Unnest`: `[expr, Alias?, WithOffset?]`, where `WithOffset` is `[Alias?]`
/// - `Join`: `[left, right, OnClause?]`
/// - `WindowClause`: `[NamedWindow...]`, each `[WindowSpec]`
/// - `WindowSpec`: `[PartitionBy?, OrderBy?]`
/// - `PathExpression`: `[Identifier...]`
/// - `FunctionCall`: `[PathExpression, args..., WindowSpec?]`
/// - `DotIdentifier`: `[expr, Identifier]`
/// - `ArrayElement`: `[array, index]`
/// - `Subquery`: `[lhs?, Query]`; only `IN` has the left-hand side
/// - `InUnnest`: `[expr, array]`
/// - `Cast`: `[expr, TypeName]`
/// - `Case`: `[operand?, WhenClause..., ElseClause?]`
/// - `Limit`: `[count, offset?]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstKind {
    Script,
    QueryStatement,
    Query,
    WithClause,
    WithEntry { name: String },
    SetOperation { op: SetOp, distinct: bool },
    Select { distinct: bool },
    SelectList,
    SelectColumn,
    Star,
    DotStar,
    Alias { name: String },
    FromClause,
    TablePathExpression,
    TableSubquery,
    Unnest,
    WithOffset,
    Join { kind: JoinKind },
    OnClause,
    WhereClause,
    GroupBy,
    Having,
    WindowClause,
    NamedWindow { name: String },
    /// `OVER (...)`, or `OVER name` when `base` is set and there are no children
    WindowSpec { base: Option<String> },
    PartitionBy,
    Qualify,
    OrderBy,
    OrderingItem { descending: bool },
    Limit,
    PathExpression,
    Identifier { name: String },
    Literal(LiteralValue),
    FunctionCall { distinct: bool },
    BinaryExpression { op: BinaryOp },
    UnaryExpression { op: UnaryOp },
    IsNull { negated: bool },
    InList { negated: bool },
    Between { negated: bool },
    DotIdentifier,
    ArrayElement { position: ArrayPosition },
    ArrayLiteral,
    Subquery { kind: SubqueryKind },
    InUnnest { negated: bool },
    Interval { unit: Option<String> },
    Cast { safe: bool },
    TypeName { name: String },
    Case { has_operand: bool },
    WhenClause,
    ElseClause,
}

impl AstKind {
    /// Short node name for logs and debug dumps
    pub fn name(&self) -> &'static str {
        match self {
            Self::Script => "Script",
            Self::QueryStatement => "QueryStatement",
            Self::Query => "Query",
            Self::WithClause => "WithClause",
            Self::WithEntry { .. } => "WithEntry",
            Self::SetOperation { .. } => "SetOperation",
            Self::Select { .. } => "Select",
            Self::SelectList => "SelectList",
            Self::SelectColumn => "SelectColumn",
            Self::Star => "Star",
            Self::DotStar => "DotStar",
            Self::Alias { .. } => "Alias",
            Self::FromClause => "FromClause",
            Self::TablePathExpression => "TablePathExpression",
            Self::TableSubquery => "TableSubquery",
            Self::Unnest => "Unnest",
            Self::WithOffset => "WithOffset",
            Self::Join { .. } => "Join",
            Self::OnClause => "OnClause",
            Self::WhereClause => "WhereClause",
            Self::GroupBy => "GroupBy",
            Self::Having => "Having",
            Self::WindowClause => "WindowClause",
            Self::NamedWindow { .. } => "NamedWindow",
            Self::WindowSpec { .. } => "WindowSpec",
            Self::PartitionBy => "PartitionBy",
            Self::Qualify => "Qualify",
            Self::OrderBy => "OrderBy",
            Self::OrderingItem { .. } => "OrderingItem",
            Self::Limit => "Limit",
            Self::PathExpression => "PathExpression",
            Self::Identifier { .. } => "Identifier",
            Self::Literal(_) => "Literal",
            Self::FunctionCall { .. } => "FunctionCall",
            Self::BinaryExpression { .. } => "BinaryExpression",
            Self::UnaryExpression { .. } => "UnaryExpression",
            Self::IsNull { .. } => "IsNull",
            Self::InList { .. } => "InList",
            Self::Between { .. } => "Between",
            Self::DotIdentifier => "DotIdentifier",
            Self::ArrayElement { .. } => "ArrayElement",
            Self::ArrayLiteral => "ArrayLiteral",
            Self::Subquery { .. } => "Subquery",
            Self::InUnnest { .. } => "InUnnest",
            Self::Interval { .. } => "Interval",
            Self::Cast { .. } => "Cast",
            Self::TypeName { .. } => "TypeName",
            Self::Case { .. } => "Case",
            Self::WhenClause => "WhenClause",
            Self::ElseClause => "ElseClause",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AstNode {
    kind: AstKind,
    range: Option<TextRange>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An immutable syntax tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxTree {
    nodes: Vec<AstNode>,
    root: NodeId,
}

impl SyntaxTree {
    /// Root `Script` node
    pub fn root(&self) -> AstRef<'_> {
        AstRef {
            tree: self,
            id: self.root,
        }
    }

    /// Borrow a node by id
    pub fn get(&self, id: NodeId) -> Option<AstRef<'_>> {
        (id.index() < self.nodes.len()).then_some(AstRef { tree: self, id })
    }

    /// Top-level statements in source order
    pub fn statements(&self) -> impl Iterator<Item = AstRef<'_>> {
        self.root().children()
    }

    /// Number of nodes in the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True when the script holds no statements
    pub fn is_empty(&self) -> bool {
        self.root().children().next().is_none()
    }

    /// Names introduced by WITH entries anywhere in the tree
    pub fn with_entry_names(&self) -> Vec<&str> {
        self.root()
            .descendants()
            .filter_map(|node| match node.kind() {
                AstKind::WithEntry { name } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Table paths referenced in FROM clauses, minus WITH entry names
    ///
    /// Each path is returned once, in order of first appearance.
    pub fn table_paths(&self) -> Vec<(String, TextRange)> {
        let with_names = self.with_entry_names();
        let mut seen = std::collections::HashSet::new();
        let mut paths = Vec::new();

        for node in self.root().descendants() {
            let Some(table) = TablePathExpression::cast(node) else {
                continue;
            };
            let Some(path) = table.path() else {
                continue;
            };
            let names = path.names();
            if names.len() == 1 && with_names.iter().any(|w| w.eq_ignore_ascii_case(names[0])) {
                continue;
            }
            let dotted = path.dotted();
            if seen.insert(dotted.clone()) {
                if let Some(range) = path.node().range() {
                    paths.push((dotted, range));
                }
            }
        }

        paths
    }
}

/// Borrowed handle to one node of a [`SyntaxTree`]
#[derive(Clone, Copy)]
pub struct AstRef<'a> {
    tree: &'a SyntaxTree,
    id: NodeId,
}

impl<'a> AstRef<'a> {
    fn node(&self) -> &'a AstNode {
        &self.tree.nodes[self.id.index()]
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &'a AstKind {
        &self.node().kind
    }

    pub fn range(&self) -> Option<TextRange> {
        self.node().range
    }

    pub fn parent(&self) -> Option<AstRef<'a>> {
        self.node().parent.map(|id| AstRef {
            tree: self.tree,
            id,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = AstRef<'a>> + 'a {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| AstRef { tree, id })
    }

    pub fn child(&self, index: usize) -> Option<AstRef<'a>> {
        self.children().nth(index)
    }

    /// First child whose kind satisfies `pred`
    pub fn find_child(&self, pred: impl Fn(&AstKind) -> bool) -> Option<AstRef<'a>> {
        self.children().find(|c| pred(c.kind()))
    }

    /// All nodes below this one, pre-order
    pub fn descendants(&self) -> impl Iterator<Item = AstRef<'a>> + 'a {
        let mut stack: Vec<AstRef<'a>> = self.children().collect();
        stack.reverse();
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            let start = stack.len();
            stack.extend(node.children());
            stack[start..].reverse();
            Some(node)
        })
    }

    /// Name of an `Identifier`, `Alias`, `WithEntry` or `NamedWindow` node
    pub fn name(&self) -> Option<&'a str> {
        match self.kind() {
            AstKind::Identifier { name }
            | AstKind::Alias { name }
            | AstKind::WithEntry { name }
            | AstKind::NamedWindow { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Name of the `Alias` child, if any
    pub fn alias(&self) -> Option<&'a str> {
        self.find_child(|k| matches!(k, AstKind::Alias { .. }))
            .and_then(|a| a.name())
    }

    /// Multi-line indented dump, handy when debugging the parser
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write;
        let range = self.range().map(|r| r.to_string()).unwrap_or_default();
        let detail = match self.kind() {
            AstKind::Identifier { name } | AstKind::Alias { name } | AstKind::WithEntry { name } => {
                format!(" {name}")
            }
            AstKind::Literal(value) => format!(" {value:?}"),
            AstKind::BinaryExpression { op } => format!(" {}", op.symbol()),
            AstKind::SetOperation { op, distinct } => {
                format!(" {} {}", op.keyword(), if *distinct { "DISTINCT" } else { "ALL" })
            }
            _ => String::new(),
        };
        let _ = writeln!(out, "{:indent$}{}{} [{}]", "", self.kind().name(), detail, range, indent = depth * 2);
        for child in self.children() {
            child.dump_into(out, depth + 1);
        }
    }
}

impl std::fmt::Debug for AstRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstRef")
            .field("id", &self.id)
            .field("kind", self.kind())
            .field("range", &self.range())
            .finish()
    }
}

impl PartialEq for AstRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for AstRef<'_> {}

/// A dotted name such as `dataset.users` or `u.address.city`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathExpression<'a>(AstRef<'a>);

impl<'a> PathExpression<'a> {
    pub fn cast(node: AstRef<'a>) -> Option<Self> {
        matches!(node.kind(), AstKind::PathExpression).then_some(Self(node))
    }

    pub fn node(&self) -> AstRef<'a> {
        self.0
    }

    /// Name parts in order
    pub fn names(&self) -> Vec<&'a str> {
        self.0.children().filter_map(|c| c.name()).collect()
    }

    /// Identifier nodes in order
    pub fn identifiers(&self) -> Vec<AstRef<'a>> {
        self.0
            .children()
            .filter(|c| matches!(c.kind(), AstKind::Identifier { .. }))
            .collect()
    }

    /// Name parts joined with `.`
    pub fn dotted(&self) -> String {
        self.names().join(".")
    }
}

/// A table reference in a FROM clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablePathExpression<'a>(AstRef<'a>);

impl<'a> TablePathExpression<'a> {
    pub fn cast(node: AstRef<'a>) -> Option<Self> {
        matches!(node.kind(), AstKind::TablePathExpression).then_some(Self(node))
    }

    pub fn node(&self) -> AstRef<'a> {
        self.0
    }

    pub fn path(&self) -> Option<PathExpression<'a>> {
        self.0.children().find_map(PathExpression::cast)
    }

    pub fn alias(&self) -> Option<&'a str> {
        self.0.alias()
    }
}

/// One item of a select list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectColumn<'a>(AstRef<'a>);

impl<'a> SelectColumn<'a> {
    pub fn cast(node: AstRef<'a>) -> Option<Self> {
        matches!(node.kind(), AstKind::SelectColumn).then_some(Self(node))
    }

    pub fn node(&self) -> AstRef<'a> {
        self.0
    }

    /// The selected expression (or `Star`/`DotStar`)
    pub fn expression(&self) -> Option<AstRef<'a>> {
        self.0.child(0)
    }

    pub fn alias(&self) -> Option<&'a str> {
        self.0.alias()
    }
}

/// Arena builder used while lowering parsed statements
///
/// Children are created before their parent; `push` wires the parent links.
#[derive(Debug, Default)]
pub(crate) struct TreeBuilder {
    nodes: Vec<AstNode>,
}

impl TreeBuilder {
    pub(crate) fn push(&mut self, kind: AstKind, range: Option<TextRange>, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for child in &children {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(AstNode {
            kind,
            range,
            parent: None,
            children,
        });
        id
    }

    pub(crate) fn leaf(&mut self, kind: AstKind, range: Option<TextRange>) -> NodeId {
        self.push(kind, range, Vec::new())
    }

    pub(crate) fn range(&self, id: NodeId) -> Option<TextRange> {
        self.nodes[id.index()].range
    }

    /// Current arena length, for rolling back a failed statement
    pub(crate) fn mark(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn rollback(&mut self, mark: usize) {
        self.nodes.truncate(mark);
    }

    pub(crate) fn finish(self, root: NodeId) -> SyntaxTree {
        SyntaxTree {
            nodes: self.nodes,
            root,
        }
    }
}
