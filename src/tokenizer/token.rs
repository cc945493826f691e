use std::fmt;

/// Source position of a token, kept so parser errors can point back at the
/// offending text (§4.1 invariant: spans reproduce the input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    String,
    Identifier,
    Operator,
    UnaryOperator,
    Keyword,
    /// Start of an f-string: literal segment text (may be empty).
    FStringLiteral,
    /// `{` that opens an embedded expression inside an f-string.
    FStringExprStart,
    /// `}` that closes an embedded expression inside an f-string.
    FStringExprEnd,
    Whitespace,
    Comment,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, position: Position) -> Self {
        Token {
            kind,
            value: value.into(),
            position,
        }
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value.eq_ignore_ascii_case(kw)
    }

    pub fn is_operator(&self, op: &str) -> bool {
        matches!(self.kind, TokenKind::Operator | TokenKind::UnaryOperator)
            && self.value.eq_ignore_ascii_case(op)
    }

    pub fn is_fstring_literal(&self) -> bool {
        self.kind == TokenKind::FStringLiteral
    }

    pub fn is_fstring_expr_start(&self) -> bool {
        self.kind == TokenKind::FStringExprStart
    }

    pub fn is_fstring_expr_end(&self) -> bool {
        self.kind == TokenKind::FStringExprEnd
    }
}
