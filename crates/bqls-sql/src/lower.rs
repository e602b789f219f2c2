//! Lowering of sqlparser statements into the arena tree
//!
//! sqlparser does the parsing; this module re-shapes its AST into
//! [`SyntaxTree`](crate::ast::SyntaxTree) nodes and attaches byte ranges.
//! sqlparser only keeps spans on identifiers and a handful of keyword
//! tokens, so every other range is rebuilt from the statement's token list
//! with a cursor that moves forward in source order: each node claims the
//! tokens it is made of, and anchors (keywords, literals, parentheses) are
//! searched from the cursor onwards.

use crate::ast::{
    ArrayPosition, AstKind, BinaryOp, JoinKind, LiteralValue, NodeId, SetOp, SubqueryKind, TreeBuilder,
    UnaryOp,
};
use crate::lexer::{LineIndex, Tok, TokenKind};
use bqls_core::TextRange;
use sqlparser::ast::{
    self as sql, CastKind, CeilFloorKind, DateTimeField, Distinct, DuplicateTreatment, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint, JoinOperator, MapAccessSyntax,
    NamedWindowExpr, SelectItem, SetExpr, SetOperator, SetQuantifier, TableFactor, Value, WindowType,
};
use sqlparser::ast::helpers::attached_token::AttachedToken;
use sqlparser::tokenizer::Location;

/// A construct the tree has no node for
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unsupported {
    /// Noun phrase naming the construct
    pub what: String,
    pub span: Option<TextRange>,
}

type LResult<T> = Result<T, Unsupported>;

fn cover(ranges: impl IntoIterator<Item = Option<TextRange>>) -> Option<TextRange> {
    ranges.into_iter().flatten().reduce(TextRange::cover)
}

/// First few dozen characters of a construct, for messages
fn excerpt(node: &impl std::fmt::Display) -> String {
    let text = node.to_string();
    match text.char_indices().nth(40) {
        Some((cut, _)) => format!("`{}...`", &text[..cut]),
        None => format!("`{text}`"),
    }
}

/// Whether `kind` is the token a literal was written as
fn is_literal_token(kind: &TokenKind, value: &Value) -> bool {
    match (value, kind) {
        (Value::Number(n, _), TokenKind::Number(m)) => n == m,
        (Value::SingleQuotedString(s) | Value::DoubleQuotedString(s), TokenKind::String(t)) => s == t,
        (Value::Boolean(b), k) => k.is_keyword(if *b { "TRUE" } else { "FALSE" }),
        (Value::Null, k) => k.is_keyword("NULL"),
        (v, TokenKind::Other(text)) => *text == v.to_string(),
        _ => false,
    }
}

fn binary_op(op: &sql::BinaryOperator) -> Option<BinaryOp> {
    use sql::BinaryOperator as B;
    Some(match op {
        B::Or => BinaryOp::Or,
        B::And => BinaryOp::And,
        B::Eq => BinaryOp::Eq,
        B::NotEq => BinaryOp::Neq,
        B::Lt => BinaryOp::Lt,
        B::Gt => BinaryOp::Gt,
        B::LtEq => BinaryOp::LtEq,
        B::GtEq => BinaryOp::GtEq,
        B::Plus => BinaryOp::Add,
        B::Minus => BinaryOp::Sub,
        B::Multiply => BinaryOp::Mul,
        B::Divide => BinaryOp::Div,
        B::StringConcat => BinaryOp::Concat,
        _ => return None,
    })
}

/// `arr[OFFSET(i)]` and friends; a bare `arr[i]` is an offset
fn array_position(key: &sql::Expr) -> (ArrayPosition, &sql::Expr) {
    if let sql::Expr::Function(function) = key {
        if let ([name], FunctionArguments::List(list)) = (function.name.0.as_slice(), &function.args) {
            if let (Some(position), [FunctionArg::Unnamed(FunctionArgExpr::Expr(index))]) =
                (ArrayPosition::from_name(&name.value), list.args.as_slice())
            {
                return (position, index);
            }
        }
    }
    (ArrayPosition::Offset, key)
}

pub(crate) struct Lowerer<'t, 'b> {
    index: &'t LineIndex<'t>,
    /// Statement tokens without trivia, in source order
    tokens: &'t [Tok],
    /// Index of the matching `)` / `]` for every opening token
    closers: Vec<Option<usize>>,
    cursor: usize,
    builder: &'b mut TreeBuilder,
}

impl<'t, 'b> Lowerer<'t, 'b> {
    pub(crate) fn new(tokens: &'t [Tok], index: &'t LineIndex<'t>, builder: &'b mut TreeBuilder) -> Self {
        let mut closers = vec![None; tokens.len()];
        let mut open: Vec<usize> = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket => open.push(i),
                TokenKind::RParen | TokenKind::RBracket => {
                    if let Some(start) = open.pop() {
                        closers[start] = Some(i);
                    }
                }
                _ => {}
            }
        }

        Self {
            index,
            tokens,
            closers,
            cursor: 0,
            builder,
        }
    }

    /// Lower a query statement spanning `range`
    pub(crate) fn statement(mut self, query: &sql::Query, range: TextRange) -> LResult<NodeId> {
        let query = self.query(query)?;
        Ok(self.builder.push(AstKind::QueryStatement, Some(range), vec![query]))
    }

    // Token bookkeeping

    fn unsupported(&self, what: impl Into<String>) -> Unsupported {
        Unsupported {
            what: what.into(),
            span: self.tokens.get(self.cursor).map(|t| t.range),
        }
    }

    fn range_of(&self, i: usize) -> TextRange {
        self.tokens[i].range
    }

    fn offset(&self, location: Location) -> Option<usize> {
        (location.line > 0).then(|| self.index.location(location))
    }

    fn token_at(&self, offset: usize) -> Option<usize> {
        self.tokens.binary_search_by_key(&offset, |t| t.range.start).ok()
    }

    /// Range of a token sqlparser kept, moving the cursor past it
    fn attached(&mut self, token: &AttachedToken) -> Option<TextRange> {
        let i = self.offset(token.0.span.start).and_then(|o| self.token_at(o))?;
        self.cursor = self.cursor.max(i + 1);
        Some(self.range_of(i))
    }

    fn advance_to(&mut self, end: usize) {
        while self.tokens.get(self.cursor).is_some_and(|t| t.range.start < end) {
            self.cursor += 1;
        }
    }

    /// Next token from the cursor satisfying `pred`; the cursor moves past it
    fn take(&mut self, pred: impl Fn(&TokenKind) -> bool) -> Option<usize> {
        let i = (self.cursor..self.tokens.len()).find(|&i| pred(&self.tokens[i].kind))?;
        self.cursor = i + 1;
        Some(i)
    }

    fn take_keyword(&mut self, keyword: &str) -> Option<TextRange> {
        self.take(|k| k.is_keyword(keyword)).map(|i| self.range_of(i))
    }

    /// The token at the cursor, if it is `kind`
    fn eat(&mut self, kind: &TokenKind) -> Option<usize> {
        let i = self.cursor;
        (self.tokens.get(i)?.kind == *kind).then(|| {
            self.cursor += 1;
            i
        })
    }

    /// Nearest token before `offset`, no further back than `floor`
    fn find_before(&self, floor: usize, offset: usize, pred: impl Fn(&TokenKind) -> bool) -> Option<TextRange> {
        let end = self.tokens.partition_point(|t| t.range.start < offset);
        (floor..end).rev().find(|&i| pred(&self.tokens[i].kind)).map(|i| self.range_of(i))
    }

    /// Opening token right after `i` and its closer
    fn parens_after(&self, i: usize) -> Option<(usize, usize)> {
        let open = i + 1;
        matches!(self.tokens.get(open)?.kind, TokenKind::LParen).then_some(())?;
        Some((open, self.closers[open]?))
    }

    /// Parentheses wrapped directly around `range`; the cursor moves past them
    fn enclosing_parens(&mut self, range: Option<TextRange>) -> Option<TextRange> {
        let range = range?;
        let first = self.token_at(range.start)?.checked_sub(1)?;
        if self.tokens[first].kind != TokenKind::LParen {
            return None;
        }
        let close = self.closers[first]?;
        self.cursor = self.cursor.max(close + 1);
        Some(self.range_of(first).cover(self.range_of(close)))
    }

    /// Move past a closer and return its range
    fn close(&mut self, close: Option<usize>) -> Option<TextRange> {
        let close = close?;
        self.cursor = self.cursor.max(close + 1);
        Some(self.range_of(close))
    }

    fn push(&mut self, kind: AstKind, children: Vec<NodeId>, extra: &[Option<TextRange>]) -> NodeId {
        let range = cover(
            children
                .iter()
                .map(|&c| self.builder.range(c))
                .chain(extra.iter().copied()),
        );
        self.builder.push(kind, range, children)
    }

    // Names

    fn ident_range(&mut self, ident: &sql::Ident) -> Option<TextRange> {
        let range = match self.offset(ident.span.start).and_then(|o| self.token_at(o)) {
            Some(i) => {
                let token = self.range_of(i);
                match &self.tokens[i].kind {
                    TokenKind::Word { quote: Some(_), .. } if token.width() >= 2 => {
                        TextRange::new(token.start + 1, token.end - 1)
                    }
                    // Dashed names (`my-project`) span several tokens
                    _ => TextRange::new(token.start, token.start + ident.value.len()),
                }
            }
            None => {
                let i = (self.cursor..self.tokens.len()).find(|&i| {
                    matches!(&self.tokens[i].kind, TokenKind::Word { value, .. } if *value == ident.value)
                })?;
                self.range_of(i)
            }
        };
        self.advance_to(range.end);
        Some(range)
    }

    fn identifier(&mut self, ident: &sql::Ident) -> NodeId {
        let range = self.ident_range(ident);
        self.builder.leaf(
            AstKind::Identifier {
                name: ident.value.clone(),
            },
            range,
        )
    }

    /// Path expression; `proj.ds.tbl` inside one pair of backticks names three parts
    fn path(&mut self, idents: &[sql::Ident]) -> NodeId {
        let mut children = Vec::new();
        let mut rest = idents;

        while let Some(first) = rest.first() {
            let shared = if first.span.start.line > 0 {
                rest.iter().take_while(|i| i.span == first.span).count()
            } else {
                1
            };
            let quoted = self
                .offset(first.span.start)
                .and_then(|o| self.token_at(o))
                .filter(|_| shared > 1);

            match quoted {
                Some(token) => {
                    let outer = self.range_of(token);
                    let mut offset = outer.start + 1;
                    for part in &rest[..shared] {
                        let end = (offset + part.value.len()).min(outer.end.saturating_sub(1)).max(offset);
                        children.push(self.builder.leaf(
                            AstKind::Identifier {
                                name: part.value.clone(),
                            },
                            Some(TextRange::new(offset, end)),
                        ));
                        offset = end + 1;
                    }
                    self.advance_to(outer.end);
                }
                None => {
                    for part in &rest[..shared] {
                        children.push(self.identifier(part));
                    }
                }
            }
            rest = &rest[shared..];
        }

        self.push(AstKind::PathExpression, children, &[])
    }

    fn alias(&mut self, name: &sql::Ident) -> NodeId {
        let range = self.ident_range(name);
        self.builder.leaf(
            AstKind::Alias {
                name: name.value.clone(),
            },
            range,
        )
    }

    fn table_alias(&mut self, alias: &sql::TableAlias) -> LResult<NodeId> {
        if !alias.columns.is_empty() {
            return Err(self.unsupported(format!("Column aliases in {}", excerpt(alias))));
        }
        Ok(self.alias(&alias.name))
    }

    // Queries

    fn query(&mut self, query: &sql::Query) -> LResult<NodeId> {
        if !query.limit_by.is_empty()
            || query.fetch.is_some()
            || !query.locks.is_empty()
            || query.for_clause.is_some()
            || query.settings.is_some()
            || query.format_clause.is_some()
        {
            return Err(self.unsupported(format!("Query clause in {}", excerpt(query))));
        }

        let mut children = Vec::new();
        if let Some(with) = &query.with {
            children.push(self.with_clause(with)?);
        }
        children.push(self.set_expr(&query.body)?);
        if let Some(order_by) = &query.order_by {
            if order_by.interpolate.is_some() {
                return Err(self.unsupported("ORDER BY ... INTERPOLATE"));
            }
            children.push(self.order_by(&order_by.exprs)?);
        }
        match (&query.limit, &query.offset) {
            (Some(limit), offset) => {
                let keyword = self.take_keyword("LIMIT");
                let mut parts = vec![self.expr(limit)?];
                if let Some(offset) = offset {
                    self.take_keyword("OFFSET");
                    parts.push(self.expr(&offset.value)?);
                }
                children.push(self.push(AstKind::Limit, parts, &[keyword]));
            }
            (None, Some(_)) => return Err(self.unsupported("OFFSET without LIMIT")),
            (None, None) => {}
        }

        Ok(self.push(AstKind::Query, children, &[]))
    }

    fn with_clause(&mut self, with: &sql::With) -> LResult<NodeId> {
        if with.recursive {
            return Err(self.unsupported("WITH RECURSIVE"));
        }
        let keyword = self.attached(&with.with_token);

        let mut entries = Vec::new();
        for cte in &with.cte_tables {
            if !cte.alias.columns.is_empty() || cte.from.is_some() || cte.materialized.is_some() {
                return Err(self.unsupported(format!("WITH entry {}", excerpt(&cte.alias))));
            }
            let name = self.ident_range(&cte.alias.name);
            let query = self.query(&cte.query)?;
            let close = self.attached(&cte.closing_paren_token);
            entries.push(self.push(
                AstKind::WithEntry {
                    name: cte.alias.name.value.clone(),
                },
                vec![query],
                &[name, close],
            ));
        }

        Ok(self.push(AstKind::WithClause, entries, &[keyword]))
    }

    fn set_expr(&mut self, body: &SetExpr) -> LResult<NodeId> {
        match body {
            SetExpr::Select(select) => self.select(select),
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let op = match op {
                    SetOperator::Union => SetOp::Union,
                    SetOperator::Intersect => SetOp::Intersect,
                    SetOperator::Except => SetOp::Except,
                };
                let distinct = match set_quantifier {
                    SetQuantifier::All => false,
                    SetQuantifier::Distinct => true,
                    SetQuantifier::None => {
                        return Err(self.unsupported(format!("{} without ALL or DISTINCT", op.keyword())))
                    }
                    other => return Err(self.unsupported(format!("{} {other}", op.keyword()))),
                };
                let left = self.set_expr(left)?;
                let right = self.set_expr(right)?;
                Ok(self.push(AstKind::SetOperation { op, distinct }, vec![left, right], &[]))
            }
            other => Err(self.unsupported(format!("Query body {}", excerpt(other)))),
        }
    }

    fn select(&mut self, select: &sql::Select) -> LResult<NodeId> {
        if select.top.is_some()
            || select.into.is_some()
            || !select.lateral_views.is_empty()
            || select.prewhere.is_some()
            || !select.cluster_by.is_empty()
            || !select.distribute_by.is_empty()
            || !select.sort_by.is_empty()
            || select.connect_by.is_some()
        {
            return Err(self.unsupported(format!("SELECT clause in {}", excerpt(select))));
        }
        if select.value_table_mode.is_some() {
            return Err(self.unsupported("SELECT AS STRUCT / SELECT AS VALUE"));
        }

        let keyword = self.attached(&select.select_token);
        let distinct = match &select.distinct {
            None => false,
            Some(Distinct::Distinct) => {
                self.take_keyword("DISTINCT");
                true
            }
            Some(Distinct::On(_)) => return Err(self.unsupported("SELECT DISTINCT ON")),
        };

        let mut children = vec![self.select_list(&select.projection)?];
        if !select.from.is_empty() {
            children.push(self.from_clause(&select.from)?);
        }
        if let Some(selection) = &select.selection {
            children.push(self.clause("WHERE", AstKind::WhereClause, selection)?);
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => {
                if !exprs.is_empty() {
                    let keyword = self.take_keyword("GROUP");
                    let items = exprs.iter().map(|e| self.expr(e)).collect::<LResult<Vec<_>>>()?;
                    children.push(self.push(AstKind::GroupBy, items, &[keyword]));
                }
            }
            _ => return Err(self.unsupported("GROUP BY modifier")),
        }
        if let Some(having) = &select.having {
            children.push(self.clause("HAVING", AstKind::Having, having)?);
        }
        if select.window_before_qualify {
            self.window_clause(&select.named_window, &mut children)?;
            self.qualify(select.qualify.as_ref(), &mut children)?;
        } else {
            self.qualify(select.qualify.as_ref(), &mut children)?;
            self.window_clause(&select.named_window, &mut children)?;
        }

        Ok(self.push(AstKind::Select { distinct }, children, &[keyword]))
    }

    /// `KEYWORD expr` clause node
    fn clause(&mut self, keyword: &str, kind: AstKind, expr: &sql::Expr) -> LResult<NodeId> {
        let keyword = self.take_keyword(keyword);
        let expr = self.expr(expr)?;
        Ok(self.push(kind, vec![expr], &[keyword]))
    }

    fn qualify(&mut self, qualify: Option<&sql::Expr>, children: &mut Vec<NodeId>) -> LResult<()> {
        if let Some(qualify) = qualify {
            children.push(self.clause("QUALIFY", AstKind::Qualify, qualify)?);
        }
        Ok(())
    }

    fn window_clause(&mut self, windows: &[sql::NamedWindowDefinition], children: &mut Vec<NodeId>) -> LResult<()> {
        if windows.is_empty() {
            return Ok(());
        }
        let keyword = self.take_keyword("WINDOW");

        let mut definitions = Vec::new();
        for sql::NamedWindowDefinition(name, definition) in windows {
            let name_range = self.ident_range(name);
            self.take_keyword("AS");
            let spec = match definition {
                NamedWindowExpr::NamedWindow(base) => {
                    let range = self.ident_range(base);
                    self.builder.leaf(
                        AstKind::WindowSpec {
                            base: Some(base.value.clone()),
                        },
                        range,
                    )
                }
                NamedWindowExpr::WindowSpec(spec) => self.parenthesized_window(spec, None)?,
            };
            definitions.push(self.push(
                AstKind::NamedWindow {
                    name: name.value.clone(),
                },
                vec![spec],
                &[name_range],
            ));
        }

        children.push(self.push(AstKind::WindowClause, definitions, &[keyword]));
        Ok(())
    }

    fn select_list(&mut self, projection: &[SelectItem]) -> LResult<NodeId> {
        let mut columns = Vec::new();
        for item in projection {
            let column = match item {
                SelectItem::UnnamedExpr(expr) => vec![self.expr(expr)?],
                SelectItem::ExprWithAlias { expr, alias } => {
                    let expr = self.expr(expr)?;
                    vec![expr, self.alias(alias)]
                }
                SelectItem::Wildcard(options) => vec![self.star(options)?],
                SelectItem::QualifiedWildcard(name, options) => {
                    let path = self.path(&name.0);
                    let star = self.star(options)?;
                    vec![self.push(AstKind::DotStar, vec![path, star], &[])]
                }
            };
            columns.push(self.push(AstKind::SelectColumn, column, &[]));
        }
        Ok(self.push(AstKind::SelectList, columns, &[]))
    }

    fn star(&mut self, options: &sql::WildcardAdditionalOptions) -> LResult<NodeId> {
        if options.opt_ilike.is_some()
            || options.opt_exclude.is_some()
            || options.opt_replace.is_some()
            || options.opt_rename.is_some()
        {
            return Err(self.unsupported("SELECT * modifier"));
        }
        let star = self.attached(&options.wildcard_token);
        let mut excluded = Vec::new();
        if let Some(except) = &options.opt_except {
            excluded.push(self.identifier(&except.first_element));
            for ident in &except.additional_elements {
                excluded.push(self.identifier(ident));
            }
        }
        let close = if excluded.is_empty() {
            None
        } else {
            self.take(|k| *k == TokenKind::RParen).map(|i| self.range_of(i))
        };
        Ok(self.push(AstKind::Star, excluded, &[star, close]))
    }

    // FROM

    fn from_clause(&mut self, items: &[sql::TableWithJoins]) -> LResult<NodeId> {
        let keyword = self.take_keyword("FROM");
        let mut item: Option<NodeId> = None;
        for table in items {
            let next = self.table_with_joins(table)?;
            item = Some(match item {
                None => next,
                Some(left) => self.push(AstKind::Join { kind: JoinKind::Comma }, vec![left, next], &[]),
            });
        }
        let item = item.ok_or_else(|| self.unsupported("Empty FROM clause"))?;
        Ok(self.push(AstKind::FromClause, vec![item], &[keyword]))
    }

    fn table_with_joins(&mut self, table: &sql::TableWithJoins) -> LResult<NodeId> {
        let mut left = self.table_factor(&table.relation)?;
        for join in &table.joins {
            let (kind, constraint) = match &join.join_operator {
                JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
                JoinOperator::CrossJoin => (JoinKind::Cross, None),
                _ => return Err(self.unsupported(format!("Join {}", excerpt(join)))),
            };
            let right = self.table_factor(&join.relation)?;
            let mut children = vec![left, right];
            match constraint {
                Some(JoinConstraint::On(expr)) => children.push(self.clause("ON", AstKind::OnClause, expr)?),
                Some(JoinConstraint::None) | None => {}
                Some(_) => return Err(self.unsupported("JOIN ... USING / NATURAL JOIN")),
            }
            left = self.push(AstKind::Join { kind }, children, &[]);
        }
        Ok(left)
    }

    fn table_factor(&mut self, factor: &TableFactor) -> LResult<NodeId> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args,
                with_hints,
                ..
            } => {
                if args.is_some() || !with_hints.is_empty() {
                    return Err(self.unsupported(format!("Table function {}", excerpt(name))));
                }
                let mut children = vec![self.path(&name.0)];
                if let Some(alias) = alias {
                    children.push(self.table_alias(alias)?);
                }
                Ok(self.push(AstKind::TablePathExpression, children, &[]))
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                if *lateral {
                    return Err(self.unsupported("LATERAL subquery"));
                }
                let query = self.query(subquery)?;
                let parens = self.enclosing_parens(self.builder.range(query));
                let mut children = vec![query];
                if let Some(alias) = alias {
                    children.push(self.table_alias(alias)?);
                }
                Ok(self.push(AstKind::TableSubquery, children, &[parens]))
            }
            TableFactor::UNNEST {
                alias,
                array_exprs,
                with_offset,
                with_offset_alias,
                with_ordinality,
            } => {
                let [array] = array_exprs.as_slice() else {
                    return Err(self.unsupported("UNNEST of several arrays"));
                };
                if *with_ordinality {
                    return Err(self.unsupported("UNNEST ... WITH ORDINALITY"));
                }
                let keyword = self.take(|k| k.is_keyword("UNNEST"));
                let parens = keyword.and_then(|i| self.parens_after(i));
                let mut children = vec![self.expr(array)?];
                let close = self.close(parens.map(|(_, close)| close));

                if let Some(alias) = alias {
                    children.push(self.table_alias(alias)?);
                }
                if *with_offset {
                    let with = self.take_keyword("WITH");
                    let offset = self.take_keyword("OFFSET");
                    let offset_alias: Vec<NodeId> = with_offset_alias.iter().map(|a| self.alias(a)).collect();
                    children.push(self.push(AstKind::WithOffset, offset_alias, &[with, offset]));
                }
                let keyword = keyword.map(|i| self.range_of(i));
                Ok(self.push(AstKind::Unnest, children, &[keyword, close]))
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
            } => self.table_with_joins(table_with_joins),
            other => Err(self.unsupported(format!("FROM item {}", excerpt(other)))),
        }
    }

    // ORDER BY and windows

    fn order_by(&mut self, items: &[sql::OrderByExpr]) -> LResult<NodeId> {
        let keyword = self.take_keyword("ORDER");
        let mut children = Vec::new();
        for item in items {
            if item.with_fill.is_some() {
                return Err(self.unsupported("ORDER BY ... WITH FILL"));
            }
            let expr = self.expr(&item.expr)?;
            let direction = match item.asc {
                Some(true) => self.take_keyword("ASC"),
                Some(false) => self.take_keyword("DESC"),
                None => None,
            };
            let nulls = match item.nulls_first {
                Some(first) => {
                    self.take_keyword("NULLS");
                    self.take_keyword(if first { "FIRST" } else { "LAST" })
                }
                None => None,
            };
            children.push(self.push(
                AstKind::OrderingItem {
                    descending: item.asc == Some(false),
                },
                vec![expr],
                &[direction, nulls],
            ));
        }
        Ok(self.push(AstKind::OrderBy, children, &[keyword]))
    }

    /// `OVER (...)` or `OVER name` of an analytic call
    fn over(&mut self, over: &WindowType) -> LResult<NodeId> {
        let keyword = self.take_keyword("OVER");
        match over {
            WindowType::NamedWindow(name) => {
                let range = self.ident_range(name);
                Ok(self.builder.leaf(
                    AstKind::WindowSpec {
                        base: Some(name.value.clone()),
                    },
                    cover([keyword, range]),
                ))
            }
            WindowType::WindowSpec(spec) => self.parenthesized_window(spec, keyword),
        }
    }

    /// `( [base] [PARTITION BY ...] [ORDER BY ...] [frame] )`
    fn parenthesized_window(&mut self, spec: &sql::WindowSpec, keyword: Option<TextRange>) -> LResult<NodeId> {
        let open = self.take(|k| *k == TokenKind::LParen);
        let close = open.and_then(|i| self.closers[i]);

        let base = spec.window_name.as_ref().map(|name| {
            self.ident_range(name);
            name.value.clone()
        });
        let mut children = Vec::new();
        if !spec.partition_by.is_empty() {
            let keyword = self.take_keyword("PARTITION");
            let exprs = spec
                .partition_by
                .iter()
                .map(|e| self.expr(e))
                .collect::<LResult<Vec<_>>>()?;
            children.push(self.push(AstKind::PartitionBy, exprs, &[keyword]));
        }
        if !spec.order_by.is_empty() {
            children.push(self.order_by(&spec.order_by)?);
        }

        // Frame bounds only shape which rows are aggregated
        let open = open.map(|i| self.range_of(i));
        let close = self.close(close);
        Ok(self.push(AstKind::WindowSpec { base }, children, &[keyword, open, close]))
    }

    // Expressions

    fn expr(&mut self, expr: &sql::Expr) -> LResult<NodeId> {
        use sql::Expr as E;
        match expr {
            E::Identifier(ident) => Ok(self.path(std::slice::from_ref(ident))),
            E::CompoundIdentifier(idents) => Ok(self.path(idents)),
            E::Value(value) => self.literal(value),
            E::Nested(inner) => self.expr(inner),
            E::TypedString { data_type, value } => {
                let literal = self.take(|k| matches!(k, TokenKind::String(s) if s == value));
                let type_range = literal.and_then(|i| i.checked_sub(1)).map(|i| self.range_of(i));
                let literal_range = literal.map(|i| self.range_of(i));
                let literal = self
                    .builder
                    .leaf(AstKind::Literal(LiteralValue::String(value.clone())), literal_range);
                let type_name = self.builder.leaf(
                    AstKind::TypeName {
                        name: data_type.to_string(),
                    },
                    type_range,
                );
                Ok(self.push(AstKind::Cast { safe: false }, vec![literal, type_name], &[]))
            }
            E::UnaryOp { op, expr: operand } => {
                let op = match op {
                    sql::UnaryOperator::Not => UnaryOp::Not,
                    sql::UnaryOperator::Minus => UnaryOp::Minus,
                    sql::UnaryOperator::Plus => return self.expr(operand),
                    other => return Err(self.unsupported(format!("Operator {other}"))),
                };
                let floor = self.cursor;
                let operand = self.expr(operand)?;
                let symbol = self.builder.range(operand).and_then(|r| {
                    self.find_before(floor, r.start, |k| match op {
                        UnaryOp::Not => k.is_keyword("NOT"),
                        UnaryOp::Minus => *k == TokenKind::Minus,
                    })
                });
                Ok(self.push(AstKind::UnaryExpression { op }, vec![operand], &[symbol]))
            }
            E::BinaryOp { left, op, right } => {
                let Some(op) = binary_op(op) else {
                    return Err(self.unsupported(format!("Operator {op}")));
                };
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                Ok(self.push(AstKind::BinaryExpression { op }, vec![left, right], &[]))
            }
            E::Like {
                negated,
                any: false,
                expr: lhs,
                pattern,
                escape_char: None,
            } => {
                let op = if *negated { BinaryOp::NotLike } else { BinaryOp::Like };
                let lhs = self.expr(lhs)?;
                let pattern = self.expr(pattern)?;
                Ok(self.push(AstKind::BinaryExpression { op }, vec![lhs, pattern], &[]))
            }
            E::IsNull(operand) | E::IsNotNull(operand) => {
                let negated = matches!(expr, E::IsNotNull(_));
                let operand = self.expr(operand)?;
                let null = self.take_keyword("NULL");
                Ok(self.push(AstKind::IsNull { negated }, vec![operand], &[null]))
            }
            E::InList {
                expr: lhs,
                list,
                negated,
            } => {
                let mut children = vec![self.expr(lhs)?];
                for item in list {
                    children.push(self.expr(item)?);
                }
                let close = self.take(|k| *k == TokenKind::RParen).map(|i| self.range_of(i));
                Ok(self.push(AstKind::InList { negated: *negated }, children, &[close]))
            }
            E::InSubquery {
                expr: lhs,
                subquery,
                negated,
            } => {
                let lhs = self.expr(lhs)?;
                let query = self.query(subquery)?;
                let parens = self.enclosing_parens(self.builder.range(query));
                Ok(self.push(
                    AstKind::Subquery {
                        kind: SubqueryKind::In { negated: *negated },
                    },
                    vec![lhs, query],
                    &[parens],
                ))
            }
            E::InUnnest {
                expr: lhs,
                array_expr,
                negated,
            } => {
                let lhs = self.expr(lhs)?;
                let array = self.expr(array_expr)?;
                let parens = self.enclosing_parens(self.builder.range(array));
                Ok(self.push(AstKind::InUnnest { negated: *negated }, vec![lhs, array], &[parens]))
            }
            E::Between {
                expr: operand,
                negated,
                low,
                high,
            } => {
                let operand = self.expr(operand)?;
                let low = self.expr(low)?;
                let high = self.expr(high)?;
                Ok(self.push(AstKind::Between { negated: *negated }, vec![operand, low, high], &[]))
            }
            E::Cast {
                kind,
                expr: operand,
                data_type,
                format: None,
            } => {
                let safe = match kind {
                    CastKind::Cast => false,
                    CastKind::SafeCast => true,
                    _ => return Err(self.unsupported(format!("Cast {}", excerpt(expr)))),
                };
                let keyword = self.take(|k| k.is_keyword("CAST") || k.is_keyword("SAFE_CAST"));
                let parens = keyword.and_then(|i| self.parens_after(i));
                if let Some((open, _)) = parens {
                    self.cursor = open + 1;
                }
                let operand = self.expr(operand)?;
                let as_keyword = self.take(|k| k.is_keyword("AS"));
                let type_range = match (as_keyword, parens) {
                    (Some(a), Some((_, close))) if a + 1 < close => {
                        Some(self.range_of(a + 1).cover(self.range_of(close - 1)))
                    }
                    _ => None,
                };
                let type_name = self.builder.leaf(
                    AstKind::TypeName {
                        name: data_type.to_string(),
                    },
                    type_range,
                );
                let keyword = keyword.map(|i| self.range_of(i));
                let close = self.close(parens.map(|(_, close)| close));
                Ok(self.push(AstKind::Cast { safe }, vec![operand, type_name], &[keyword, close]))
            }
            E::Extract { field, expr: operand, .. } => self.keyword_call("EXTRACT", |this| {
                let part = field.to_string();
                let range = this
                    .take(|k| matches!(k, TokenKind::Word { value, .. } if value.eq_ignore_ascii_case(&part)))
                    .map(|i| this.range_of(i));
                let ident = this.builder.leaf(AstKind::Identifier { name: part }, range);
                let part = this.builder.push(AstKind::PathExpression, range, vec![ident]);
                this.take_keyword("FROM");
                Ok(vec![part, this.expr(operand)?])
            }),
            E::Ceil { expr: operand, field } | E::Floor { expr: operand, field } => {
                let keyword = if matches!(expr, E::Ceil { .. }) { "CEIL" } else { "FLOOR" };
                match field {
                    CeilFloorKind::DateTimeField(DateTimeField::NoDateTime) => {
                        self.keyword_call(keyword, |this| Ok(vec![this.expr(operand)?]))
                    }
                    CeilFloorKind::Scale(scale) => {
                        self.keyword_call(keyword, |this| Ok(vec![this.expr(operand)?, this.literal(scale)?]))
                    }
                    _ => Err(self.unsupported(format!("{keyword} ... TO"))),
                }
            }
            E::Substring {
                expr: operand,
                substring_from,
                substring_for,
                ..
            } => self.keyword_call("SUBSTRING", |this| {
                let mut args = vec![this.expr(operand)?];
                for arg in [substring_from, substring_for].into_iter().flatten() {
                    args.push(this.expr(arg)?);
                }
                Ok(args)
            }),
            E::Trim {
                expr: operand,
                trim_where: None,
                trim_what: None,
                trim_characters,
            } => self.keyword_call("TRIM", |this| {
                let mut args = vec![this.expr(operand)?];
                for arg in trim_characters.iter().flatten() {
                    args.push(this.expr(arg)?);
                }
                Ok(args)
            }),
            E::Function(function) => self.function(function),
            E::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let keyword = self.take_keyword("CASE");
                let mut children = Vec::new();
                if let Some(operand) = operand {
                    children.push(self.expr(operand)?);
                }
                for (condition, result) in conditions.iter().zip(results) {
                    let when = self.take_keyword("WHEN");
                    let condition = self.expr(condition)?;
                    self.take_keyword("THEN");
                    let result = self.expr(result)?;
                    children.push(self.push(AstKind::WhenClause, vec![condition, result], &[when]));
                }
                if let Some(else_result) = else_result {
                    children.push(self.clause("ELSE", AstKind::ElseClause, else_result)?);
                }
                let end = self.take_keyword("END");
                Ok(self.push(
                    AstKind::Case {
                        has_operand: operand.is_some(),
                    },
                    children,
                    &[keyword, end],
                ))
            }
            E::Exists { subquery, negated } => {
                let floor = self.cursor;
                let keyword = self.take_keyword("EXISTS");
                let not = match (negated, keyword) {
                    (true, Some(k)) => self.find_before(floor, k.start, |t| t.is_keyword("NOT")),
                    _ => None,
                };
                let query = self.query(subquery)?;
                let parens = self.enclosing_parens(self.builder.range(query));
                Ok(self.push(
                    AstKind::Subquery {
                        kind: SubqueryKind::Exists { negated: *negated },
                    },
                    vec![query],
                    &[not, keyword, parens],
                ))
            }
            E::Subquery(query) => {
                let query = self.query(query)?;
                let parens = self.enclosing_parens(self.builder.range(query));
                Ok(self.push(
                    AstKind::Subquery {
                        kind: SubqueryKind::Scalar,
                    },
                    vec![query],
                    &[parens],
                ))
            }
            E::Array(array) => {
                let open = self.take(|k| *k == TokenKind::LBracket);
                let keyword = match (array.named, open) {
                    (true, Some(i)) if i > 0 => Some(self.range_of(i - 1)),
                    _ => None,
                };
                let mut elements = Vec::new();
                for element in &array.elem {
                    elements.push(self.expr(element)?);
                }
                let open_range = open.map(|i| self.range_of(i));
                let close = self.close(open.and_then(|i| self.closers[i]));
                Ok(self.push(AstKind::ArrayLiteral, elements, &[keyword, open_range, close]))
            }
            E::MapAccess { column, keys } => {
                let mut base = self.expr(column)?;
                for key in keys {
                    base = match key.syntax {
                        MapAccessSyntax::Bracket => {
                            let (position, index) = array_position(&key.key);
                            let index = self.expr(index)?;
                            let close = self.take(|k| *k == TokenKind::RBracket).map(|i| self.range_of(i));
                            self.push(AstKind::ArrayElement { position }, vec![base, index], &[close])
                        }
                        MapAccessSyntax::Period => match &key.key {
                            E::Identifier(field) => {
                                let field = self.identifier(field);
                                self.push(AstKind::DotIdentifier, vec![base, field], &[])
                            }
                            other => return Err(self.unsupported(format!("Field access {}", excerpt(other)))),
                        },
                    };
                }
                Ok(base)
            }
            E::CompositeAccess { expr: base, key } => {
                let base = self.expr(base)?;
                let field = self.identifier(key);
                Ok(self.push(AstKind::DotIdentifier, vec![base, field], &[]))
            }
            E::Interval(interval) => {
                let keyword = self.take_keyword("INTERVAL");
                let value = self.expr(&interval.value)?;
                let unit = interval.leading_field.as_ref().map(|f| f.to_string());
                let unit_range = unit.as_ref().and_then(|unit| {
                    self.take(|k| matches!(k, TokenKind::Word { value, .. } if value.eq_ignore_ascii_case(unit)))
                        .map(|i| self.range_of(i))
                });
                let last = interval.last_field.as_ref().and_then(|field| {
                    let field = field.to_string();
                    self.take(|k| matches!(k, TokenKind::Word { value, .. } if value.eq_ignore_ascii_case(&field)))
                        .map(|i| self.range_of(i))
                });
                Ok(self.push(AstKind::Interval { unit }, vec![value], &[keyword, unit_range, last]))
            }
            other => Err(self.unsupported(format!("Expression {}", excerpt(other)))),
        }
    }

    fn literal(&mut self, value: &Value) -> LResult<NodeId> {
        let literal = match value {
            Value::Number(n, _) if n.contains(['.', 'e', 'E']) => LiteralValue::Float(n.clone()),
            Value::Number(n, _) => LiteralValue::Int(n.clone()),
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::TripleSingleQuotedString(s)
            | Value::TripleDoubleQuotedString(s)
            | Value::SingleQuotedRawStringLiteral(s)
            | Value::DoubleQuotedRawStringLiteral(s)
            | Value::TripleSingleQuotedRawStringLiteral(s)
            | Value::TripleDoubleQuotedRawStringLiteral(s) => LiteralValue::String(s.clone()),
            Value::SingleQuotedByteStringLiteral(s)
            | Value::DoubleQuotedByteStringLiteral(s)
            | Value::TripleSingleQuotedByteStringLiteral(s)
            | Value::TripleDoubleQuotedByteStringLiteral(s) => LiteralValue::Bytes(s.clone()),
            Value::Boolean(b) => LiteralValue::Bool(*b),
            Value::Null => LiteralValue::Null,
            Value::Placeholder(p) => LiteralValue::Parameter(p.clone()),
            other => return Err(self.unsupported(format!("Literal {other}"))),
        };
        let range = self
            .take(|k| is_literal_token(k, value))
            .map(|i| self.range_of(i));
        Ok(self.builder.leaf(AstKind::Literal(literal), range))
    }

    /// Function call spelled with a keyword (`EXTRACT`, `CEIL`, ...)
    fn keyword_call(
        &mut self,
        keyword: &str,
        arguments: impl FnOnce(&mut Self) -> LResult<Vec<NodeId>>,
    ) -> LResult<NodeId> {
        let at = self.take(|k| k.is_keyword(keyword));
        let keyword_range = at.map(|i| self.range_of(i));
        let ident = self.builder.leaf(
            AstKind::Identifier {
                name: keyword.to_string(),
            },
            keyword_range,
        );
        let name = self.builder.push(AstKind::PathExpression, keyword_range, vec![ident]);

        let parens = at.and_then(|i| self.parens_after(i));
        if let Some((open, _)) = parens {
            self.cursor = open + 1;
        }
        let mut children = vec![name];
        children.extend(arguments(self)?);
        let close = self.close(parens.map(|(_, close)| close));
        Ok(self.push(AstKind::FunctionCall { distinct: false }, children, &[close]))
    }

    fn function(&mut self, function: &sql::Function) -> LResult<NodeId> {
        if function.filter.is_some()
            || !function.within_group.is_empty()
            || !matches!(function.parameters, FunctionArguments::None)
        {
            return Err(self.unsupported(format!("Function call {}", excerpt(function))));
        }

        if let FunctionArguments::Subquery(query) = &function.args {
            // ARRAY(SELECT ...)
            let keyword = match function.name.0.as_slice() {
                [name] if name.value.eq_ignore_ascii_case("ARRAY") => self.ident_range(name),
                _ => return Err(self.unsupported(format!("Function call {}", excerpt(function)))),
            };
            let query = self.query(query)?;
            let parens = self.enclosing_parens(self.builder.range(query));
            return Ok(self.push(
                AstKind::Subquery {
                    kind: SubqueryKind::Array,
                },
                vec![query],
                &[keyword, parens],
            ));
        }

        let mut children = vec![self.path(&function.name.0)];
        let mut distinct = false;
        let mut close = None;

        if let FunctionArguments::List(list) = &function.args {
            let open = self.eat(&TokenKind::LParen);
            distinct = matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
            for arg in &list.args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => children.push(self.expr(expr)?),
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                        let star = self.take(|k| *k == TokenKind::Star).map(|i| self.range_of(i));
                        children.push(self.builder.leaf(AstKind::Star, star));
                    }
                    other => return Err(self.unsupported(format!("Function argument {}", excerpt(other)))),
                }
            }
            // ORDER BY / LIMIT / IGNORE NULLS inside the call do not change its type
            close = self.close(open.and_then(|i| self.closers[i]));
        }

        if let Some(over) = &function.over {
            children.push(self.over(over)?);
        }
        Ok(self.push(AstKind::FunctionCall { distinct }, children, &[close]))
    }
}
