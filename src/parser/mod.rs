//! §4.1-§4.2 statement parser: turns a tokenized query string into the
//! clause tree the `Runner` drives (§4.8). Built on the shared `Cursor` so
//! identifier-resolution and pattern grammar agree exactly with the
//! expression evaluator (§4.3).

pub mod pattern;
mod statement;

pub use statement::{
    parse_query, Clause, LoadFormat, ParserState, ProjectionItem, SortDirection, Statement,
};
