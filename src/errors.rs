//! Top-level error taxonomy (§7). Module-local error enums convert into
//! `EngineError` via `#[from]`, mirroring the layering the teacher uses
//! across `open_cypher_parser::errors`, `graph_catalog::errors` and
//! `render_plan::errors` — except built on `thiserror` instead of `nom`'s
//! `ParseError` trait, since this engine tokenizes up front rather than
//! parsing directly off the character stream.

use thiserror::Error;

use crate::tokenizer::token::Position;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Lexical error at {position}: {message}")]
    Lexical { message: String, position: Position },

    #[error("Syntax error at {position}: {message}")]
    Syntax { message: String, position: Position },

    #[error("Semantic error: {0}")]
    Semantic(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Query timed out")]
    Timeout,

    #[error("Query cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn lexical(message: impl Into<String>, position: Position) -> Self {
        EngineError::Lexical {
            message: message.into(),
            position,
        }
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        EngineError::Syntax {
            message: message.into(),
            position,
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        EngineError::Semantic(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime(message.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
