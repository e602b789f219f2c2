//! Tokenization on top of the sqlparser BigQuery tokenizer
//!
//! sqlparser reports token spans as 1-based line/column pairs counted in
//! characters. Everything downstream works with byte ranges, so spans are
//! converted through a [`LineIndex`] right after tokenizing.

use bqls_core::TextRange;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

/// Token kinds the tree builder looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or identifier; `quote` is the quote character for quoted identifiers
    Word { value: String, quote: Option<char> },
    Number(String),
    String(String),
    Comma,
    Period,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Star,
    Plus,
    Minus,
    Slash,
    Concat,
    Eq,
    Neq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Semicolon,
    /// Anything the parser has no rule for
    Other(String),
}

impl TokenKind {
    /// Check for an unquoted word matching `keyword` (case-insensitive)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, TokenKind::Word { value, quote: None } if value.eq_ignore_ascii_case(keyword))
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Word { value, quote: Some(q) } => write!(f, "{q}{value}{q}"),
            TokenKind::Word { value, quote: None } => write!(f, "{value}"),
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::String(s) => write!(f, "\"{s}\""),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Period => write!(f, "."),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Concat => write!(f, "||"),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Neq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::LtEq => write!(f, "<="),
            TokenKind::GtEq => write!(f, ">="),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A token with its byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tok {
    pub kind: TokenKind,
    pub range: TextRange,
}

/// Tokenizer failure (unterminated string, stray character, ...)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

/// Byte offsets of line starts, for converting sqlparser locations
#[derive(Debug, Clone)]
pub struct LineIndex<'t> {
    text: &'t str,
    line_starts: Vec<usize>,
}

impl<'t> LineIndex<'t> {
    pub fn new(text: &'t str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    /// Byte offset of a 1-based line and 1-based character column
    ///
    /// Out-of-range locations clamp to the end of the line or text.
    pub fn offset(&self, line: usize, column: usize) -> usize {
        let Some(&line_start) = line.checked_sub(1).and_then(|i| self.line_starts.get(i)) else {
            return self.text.len();
        };
        let line_end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        let content = &self.text[line_start..line_end];

        let chars = column.saturating_sub(1);
        content
            .char_indices()
            .nth(chars)
            .map(|(i, _)| line_start + i)
            .unwrap_or(line_end)
    }

    /// Byte offset of a sqlparser location
    pub fn location(&self, location: Location) -> usize {
        self.offset(location.line as usize, location.column as usize)
    }
}

/// A sqlparser token together with its byte range
#[derive(Debug, Clone, PartialEq)]
pub struct RawToken {
    pub token: TokenWithSpan,
    pub range: TextRange,
}

impl RawToken {
    /// Whitespace and comments
    pub fn is_trivia(&self) -> bool {
        matches!(self.token.token, Token::Whitespace(_) | Token::EOF)
    }

    /// The simplified token, or `None` for trivia
    pub fn to_tok(&self) -> Option<Tok> {
        let kind = match &self.token.token {
            Token::EOF | Token::Whitespace(_) => return None,
            Token::Word(word) => TokenKind::Word {
                value: word.value.clone(),
                quote: word.quote_style,
            },
            Token::Number(n, _) => TokenKind::Number(n.clone()),
            Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) => TokenKind::String(s.clone()),
            Token::Comma => TokenKind::Comma,
            Token::Period => TokenKind::Period,
            Token::LParen => TokenKind::LParen,
            Token::RParen => TokenKind::RParen,
            Token::LBracket => TokenKind::LBracket,
            Token::RBracket => TokenKind::RBracket,
            Token::Mul => TokenKind::Star,
            Token::Plus => TokenKind::Plus,
            Token::Minus => TokenKind::Minus,
            Token::Div => TokenKind::Slash,
            Token::StringConcat => TokenKind::Concat,
            Token::Eq | Token::DoubleEq => TokenKind::Eq,
            Token::Neq => TokenKind::Neq,
            Token::Lt => TokenKind::Lt,
            Token::Gt => TokenKind::Gt,
            Token::LtEq => TokenKind::LtEq,
            Token::GtEq => TokenKind::GtEq,
            Token::SemiColon => TokenKind::Semicolon,
            other => TokenKind::Other(other.to_string()),
        };
        Some(Tok {
            kind,
            range: self.range,
        })
    }
}

/// Tokenize BigQuery SQL, keeping whitespace and comments
///
/// The parser needs the trivia: BigQuery's dashed project names are only
/// recognized when no whitespace separates the parts.
pub fn scan(sql: &str) -> Result<Vec<RawToken>, LexError> {
    let dialect = BigQueryDialect {};
    let index = LineIndex::new(sql);

    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| LexError {
            message: e.message.clone(),
            offset: index.location(e.location),
        })?;

    Ok(tokens
        .into_iter()
        .map(|token| {
            let start = index.location(token.span.start);
            let end = index.location(token.span.end);
            RawToken {
                range: TextRange::new(start, end.max(start)),
                token,
            }
        })
        .collect())
}

/// Tokenize BigQuery SQL, dropping whitespace and comments
pub fn tokenize(sql: &str) -> Result<Vec<Tok>, LexError> {
    Ok(scan(sql)?.iter().filter_map(RawToken::to_tok).collect())
}
