//! §4.1 Tokenizer: converts source text into an ordered token stream,
//! preserving positions. Hand-rolled rather than combinator-based, since the
//! parser (unlike the teacher's `nom`-driven one) consumes a flat `Vec<Token>`
//! and needs look-ahead across already-classified tokens (multi-word
//! operators, number-vs-subtract disambiguation).

pub mod cursor;
pub mod token;

pub use cursor::Cursor;

use crate::errors::EngineError;
use token::{Position, Token, TokenKind};

const KEYWORDS: &[&str] = &[
    "MATCH", "OPTIONAL", "WHERE", "WITH", "RETURN", "UNWIND", "LOAD", "JSON", "CSV", "TEXT",
    "FROM", "AS", "POST", "HEADERS", "CALL", "YIELD", "CREATE", "VIRTUAL", "LIMIT", "ORDER", "BY",
    "ASC", "DESC", "CASE", "WHEN", "THEN", "ELSE", "END", "NULL", "TRUE", "FALSE", "DISTINCT",
    "UNION", "ALL", "AND", "OR", "NOT", "IS", "IN", "CONTAINS", "STARTS", "ENDS",
];

/// Multi-word operators that must be matched with look-ahead over the
/// keyword stream, longest-first so e.g. "NOT STARTS WITH" wins over "NOT".
const MULTI_WORD_OPERATORS: &[&[&str]] = &[
    &["IS", "NOT", "NULL"],
    &["NOT", "STARTS", "WITH"],
    &["NOT", "ENDS", "WITH"],
    &["NOT", "CONTAINS"],
    &["NOT", "IN"],
    &["STARTS", "WITH"],
    &["ENDS", "WITH"],
    &["IS", "NULL"],
];

pub struct Tokenizer<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer {
            source,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Tokenizes the whole input, including a trailing `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.position();
            if c.is_whitespace() {
                let mut s = String::new();
                while let Some(c) = self.peek() {
                    if !c.is_whitespace() {
                        break;
                    }
                    s.push(c);
                    self.advance();
                }
                tokens.push(Token::new(TokenKind::Whitespace, s, start));
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                let mut s = String::new();
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    s.push(c);
                    self.advance();
                }
                tokens.push(Token::new(TokenKind::Comment, s, start));
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                let mut s = String::new();
                self.advance();
                self.advance();
                s.push_str("/*");
                loop {
                    match self.peek() {
                        None => {
                            return Err(EngineError::lexical(
                                "unterminated block comment",
                                start,
                            ))
                        }
                        Some('*') if self.peek_at(1) == Some('/') => {
                            self.advance();
                            self.advance();
                            s.push_str("*/");
                            break;
                        }
                        Some(c) => {
                            s.push(c);
                            self.advance();
                        }
                    }
                }
                tokens.push(Token::new(TokenKind::Comment, s, start));
                continue;
            }
            if c == 'f' && matches!(self.peek_at(1), Some('"') | Some('\'')) {
                tokens.extend(self.scan_fstring()?);
                continue;
            }
            if c == '"' || c == '\'' {
                let s = self.scan_string(c)?;
                tokens.push(Token::new(TokenKind::String, s, start));
                continue;
            }
            if c == '`' {
                let s = self.scan_backtick_identifier()?;
                tokens.push(Token::new(TokenKind::Identifier, s, start));
                continue;
            }
            if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                let s = self.scan_number();
                tokens.push(Token::new(TokenKind::Number, s, start));
                continue;
            }
            if c == '-' && self.previous_allows_unary_minus(&tokens) {
                if self
                    .peek_at(1)
                    .is_some_and(|d| d.is_ascii_digit() || d == '.')
                {
                    self.advance();
                    let mut s = self.scan_number();
                    s.insert(0, '-');
                    tokens.push(Token::new(TokenKind::Number, s, start));
                    continue;
                }
                self.advance();
                tokens.push(Token::new(TokenKind::UnaryOperator, "-", start));
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                let ident = self.scan_identifier();
                if let Some(op) = self.try_match_multi_word_operator(&ident, &mut tokens, start)? {
                    tokens.push(op);
                    continue;
                }
                if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(&ident)) {
                    tokens.push(Token::new(TokenKind::Keyword, ident, start));
                } else {
                    tokens.push(Token::new(TokenKind::Identifier, ident, start));
                }
                continue;
            }
            if c == '$' {
                self.advance();
                let ident = self.scan_identifier();
                tokens.push(Token::new(TokenKind::Identifier, format!("${}", ident), start));
                continue;
            }
            if let Some(op) = self.scan_operator() {
                tokens.push(Token::new(TokenKind::Operator, op, start));
                continue;
            }
            // Single-character punctuation tokens (parens, braces, commas, colons...)
            let ch = self.advance().unwrap();
            tokens.push(Token::new(TokenKind::Operator, ch.to_string(), start));
        }
        tokens.push(Token::new(TokenKind::Eof, "", self.position()));
        Ok(tokens)
    }

    /// A leading `-` is part of a number literal only when the previous
    /// significant (non-whitespace/comment) token is an operator, an open
    /// paren, a comma, or start-of-input (§4.1).
    fn previous_allows_unary_minus(&self, tokens: &[Token]) -> bool {
        let prev = tokens
            .iter()
            .rev()
            .find(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::Comment));
        match prev {
            None => true,
            Some(t) => match t.kind {
                TokenKind::Operator | TokenKind::UnaryOperator => true,
                TokenKind::Keyword => !t.value.eq_ignore_ascii_case("END"),
                _ => false,
            },
        }
    }

    fn scan_identifier(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        s
    }

    fn scan_number(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            s.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    s.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                s.push(self.advance().unwrap());
                if lookahead == 2 {
                    s.push(self.advance().unwrap());
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        s.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        s
    }

    fn scan_string(&mut self, quote: char) -> Result<String, EngineError> {
        let start = self.position();
        self.advance();
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::lexical("unterminated string", start)),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some(c) if c == quote => s.push(c),
                        Some('\\') => s.push('\\'),
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('r') => s.push('\r'),
                        Some(other) => {
                            s.push('\\');
                            s.push(other);
                        }
                        None => return Err(EngineError::lexical("invalid escape", start)),
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(s)
    }

    fn scan_backtick_identifier(&mut self) -> Result<String, EngineError> {
        let start = self.position();
        self.advance();
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::lexical("unterminated backtick identifier", start)),
                Some('`') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
            }
        }
        Ok(s)
    }

    /// Emits an alternating stream of `FString*` tokens for `f"..."`. Doubled
    /// `{{`/`}}` become literal braces inside a literal segment.
    fn scan_fstring(&mut self) -> Result<Vec<Token>, EngineError> {
        let start = self.position();
        self.advance(); // 'f'
        let quote = self.advance().unwrap(); // opening quote
        let mut tokens = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek() {
                None => return Err(EngineError::lexical("unterminated f-string", start)),
                Some(c) if c == quote => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::FStringLiteral, literal, start));
                    break;
                }
                Some('{') if self.peek_at(1) == Some('{') => {
                    literal.push('{');
                    self.advance();
                    self.advance();
                }
                Some('}') if self.peek_at(1) == Some('}') => {
                    literal.push('}');
                    self.advance();
                    self.advance();
                }
                Some('{') => {
                    let lit_start = start;
                    tokens.push(Token::new(TokenKind::FStringLiteral, std::mem::take(&mut literal), lit_start));
                    let brace_pos = self.position();
                    self.advance();
                    tokens.push(Token::new(TokenKind::FStringExprStart, "{", brace_pos));
                    let mut depth = 1usize;
                    let mut expr_src = String::new();
                    loop {
                        match self.peek() {
                            None => return Err(EngineError::lexical("unterminated f-string expression", start)),
                            Some('{') => {
                                depth += 1;
                                expr_src.push('{');
                                self.advance();
                            }
                            Some('}') => {
                                depth -= 1;
                                self.advance();
                                if depth == 0 {
                                    break;
                                }
                                expr_src.push('}');
                            }
                            Some(c) => {
                                expr_src.push(c);
                                self.advance();
                            }
                        }
                    }
                    let mut inner = Tokenizer::new(&expr_src);
                    let mut inner_tokens = inner.tokenize()?;
                    inner_tokens.pop(); // drop inner Eof
                    tokens.extend(inner_tokens);
                    let close_pos = self.position();
                    tokens.push(Token::new(TokenKind::FStringExprEnd, "}", close_pos));
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some(c) if c == quote => literal.push(c),
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some(other) => {
                            literal.push('\\');
                            literal.push(other);
                        }
                        None => return Err(EngineError::lexical("invalid escape", start)),
                    }
                }
                Some(c) => {
                    literal.push(c);
                    self.advance();
                }
            }
        }
        Ok(tokens)
    }

    /// Having scanned one keyword-shaped identifier, greedily tries to
    /// extend it into one of `MULTI_WORD_OPERATORS` by peeking ahead through
    /// upcoming whitespace-separated identifiers.
    fn try_match_multi_word_operator(
        &mut self,
        first: &str,
        tokens: &mut [Token],
        start: Position,
    ) -> Result<Option<Token>, EngineError> {
        let _ = tokens;
        for candidate in MULTI_WORD_OPERATORS {
            if !candidate[0].eq_ignore_ascii_case(first) {
                continue;
            }
            let checkpoint = (self.pos, self.line, self.column);
            let mut words = vec![first.to_string()];
            let mut ok = true;
            for expected in &candidate[1..] {
                self.skip_ws_no_tokens();
                let word = self.scan_identifier();
                if word.is_empty() || !word.eq_ignore_ascii_case(expected) {
                    ok = false;
                    break;
                }
                words.push(word);
            }
            if ok && words.len() == candidate.len() {
                let canonical = match candidate.to_vec().join("_").to_uppercase().as_str() {
                    "IS_NOT_NULL" => "IS_NOT_NULL",
                    "NOT_STARTS_WITH" => "NOT_STARTS_WITH",
                    "NOT_ENDS_WITH" => "NOT_ENDS_WITH",
                    "NOT_CONTAINS" => "NOT_CONTAINS",
                    "NOT_IN" => "NOT_IN",
                    "STARTS_WITH" => "STARTS_WITH",
                    "ENDS_WITH" => "ENDS_WITH",
                    "IS_NULL" => "IS_NULL",
                    _ => "UNKNOWN",
                };
                return Ok(Some(Token::new(TokenKind::Operator, canonical, start)));
            }
            (self.pos, self.line, self.column) = checkpoint;
        }
        Ok(None)
    }

    fn skip_ws_no_tokens(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_operator(&mut self) -> Option<String> {
        let two = match (self.peek(), self.peek_at(1)) {
            (Some('<'), Some('>')) => Some("<>"),
            (Some('<'), Some('=')) => Some("<="),
            (Some('>'), Some('=')) => Some(">="),
            (Some('='), Some('~')) => Some("=~"),
            // Range separator in a variable-length hop spec, e.g. `*1..3`.
            (Some('.'), Some('.')) => Some(".."),
            _ => None,
        };
        if let Some(op) = two {
            self.advance();
            self.advance();
            return Some(op.to_string());
        }
        let one = match self.peek()? {
            c @ ('+' | '-' | '*' | '/' | '%' | '^' | '=' | '<' | '>') => Some(c),
            _ => None,
        };
        one.map(|c| {
            self.advance();
            c.to_string()
        })
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, EngineError> {
    Tokenizer::new(source).tokenize()
}

/// Tokens relevant to the parser: comments and whitespace are dropped.
pub fn tokenize_significant(source: &str) -> Result<Vec<Token>, EngineError> {
    Ok(tokenize(source)?
        .into_iter()
        .filter(|t| !matches!(t.kind, TokenKind::Whitespace | TokenKind::Comment))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize_significant(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_numbers_and_operators() {
        let tokens = tokenize_significant("1 + 2").unwrap();
        assert_eq!(tokens[0].value, "1");
        assert_eq!(tokens[1].value, "+");
        assert_eq!(tokens[2].value, "2");
    }

    #[test]
    fn leading_minus_after_operator_is_numeric() {
        let tokens = tokenize_significant("1 + -2").unwrap();
        assert_eq!(tokens[2].value, "-2");
        assert_eq!(tokens[2].kind, TokenKind::Number);
    }

    #[test]
    fn leading_minus_after_identifier_is_subtract() {
        let tokens = tokenize_significant("x - 2").unwrap();
        assert_eq!(tokens[1].value, "-");
        assert_eq!(tokens[1].kind, TokenKind::Operator);
    }

    #[test]
    fn backtick_identifier_allows_reserved_word() {
        let tokens = tokenize_significant("`match`").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].value, "match");
    }

    #[test]
    fn multi_word_operator_starts_with() {
        let tokens = tokenize_significant("a STARTS WITH b").unwrap();
        assert!(tokens.iter().any(|t| t.value == "STARTS_WITH"));
    }

    #[test]
    fn multi_word_operator_not_starts_with() {
        let tokens = tokenize_significant("a NOT STARTS WITH b").unwrap();
        assert!(tokens.iter().any(|t| t.value == "NOT_STARTS_WITH"));
    }

    #[test]
    fn is_not_null_operator() {
        let tokens = tokenize_significant("a IS NOT NULL").unwrap();
        assert!(tokens.iter().any(|t| t.value == "IS_NOT_NULL"));
    }

    #[test]
    fn quoted_string_unescapes_quote() {
        let tokens = tokenize_significant(r#""he said \"hi\"""#).unwrap();
        assert_eq!(tokens[0].value, "he said \"hi\"");
    }

    #[test]
    fn fstring_alternates_literal_and_expression() {
        let tokens = tokenize("f\"hello {name}!\"").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::FStringLiteral));
        assert!(kinds.contains(&TokenKind::FStringExprStart));
        assert!(kinds.contains(&TokenKind::FStringExprEnd));
    }

    #[test]
    fn fstring_doubled_braces_are_literal() {
        let tokens = tokenize("f\"{{literal}}\"").unwrap();
        let literal = tokens
            .iter()
            .find(|t| t.kind == TokenKind::FStringLiteral)
            .unwrap();
        assert_eq!(literal.value, "{literal}");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let k = kinds("match WHERE Return");
        assert_eq!(k, vec![TokenKind::Keyword, TokenKind::Keyword, TokenKind::Keyword]);
    }

    #[test]
    fn comment_tokens_are_preserved_but_filtered_by_parser_view() {
        let all = tokenize("1 // comment\n+ 2").unwrap();
        assert!(all.iter().any(|t| t.kind == TokenKind::Comment));
        let sig = tokenize_significant("1 // comment\n+ 2").unwrap();
        assert!(!sig.iter().any(|t| t.kind == TokenKind::Comment));
    }
}
