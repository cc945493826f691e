//! Read-only cursor over a token slice, shared by the expression parser and
//! the statement parser so both walk the same token stream representation.

use super::token::{Position, Token, TokenKind};
use crate::errors::EngineError;

pub struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Cursor { tokens, pos: 0 }
    }

    fn clamp(&self, idx: usize) -> usize {
        idx.min(self.tokens.len() - 1)
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.clamp(self.pos)]
    }

    pub fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[self.clamp(self.pos + offset)]
    }

    pub fn advance(&mut self) -> &Token {
        let idx = self.clamp(self.pos);
        if idx < self.tokens.len() - 1 {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    pub fn checkpoint(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, checkpoint: usize) {
        self.pos = checkpoint;
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    pub fn position(&self) -> Position {
        self.peek().position
    }

    pub fn match_operator(&mut self, op: &str) -> bool {
        if self.peek().is_operator(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn match_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_operator(&mut self, op: &str) -> Result<(), EngineError> {
        if self.match_operator(op) {
            Ok(())
        } else {
            Err(EngineError::syntax(
                format!("expected '{}', got '{}'", op, self.peek().value),
                self.position(),
            ))
        }
    }

    pub fn expect_keyword(&mut self, kw: &str) -> Result<(), EngineError> {
        if self.match_keyword(kw) {
            Ok(())
        } else {
            Err(EngineError::syntax(
                format!("expected keyword '{}', got '{}'", kw, self.peek().value),
                self.position(),
            ))
        }
    }

    pub fn expect_identifier(&mut self) -> Result<String, EngineError> {
        let t = self.peek();
        if t.kind == TokenKind::Identifier {
            let v = t.value.clone();
            self.advance();
            Ok(v)
        } else {
            Err(EngineError::syntax("expected identifier", self.position()))
        }
    }

    /// An identifier position that also accepts reserved keywords, used for
    /// property/label names in pattern and map literals (§4.1 "Reserved
    /// words may appear as property keys").
    pub fn expect_identifier_or_keyword(&mut self) -> Result<String, EngineError> {
        let t = self.peek();
        if matches!(t.kind, TokenKind::Identifier | TokenKind::Keyword) {
            let v = t.value.clone();
            self.advance();
            Ok(v)
        } else {
            Err(EngineError::syntax("expected identifier", self.position()))
        }
    }
}
