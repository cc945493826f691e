//! Graph pattern AST (§3 "Pattern", "Node (graph)", "Relationship (graph)").
//! Grounded on the teacher's `open_cypher_parser::ast` pattern types
//! (`NodePattern`, `RelationshipPattern`, `Direction`,
//! `VariableLengthSpec`), adapted from borrowed `&'a str` fields to owned
//! `String` so patterns can be stored in the process-wide virtual graph
//! store as part of a producer's compiled sub-query AST.

use super::AstNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `<-[]-`
    Left,
    /// `-[]->`
    Right,
    /// `-[]-`, treated as Right per §3.
    Undirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLengthSpec {
    pub min: u32,
    pub max: u32,
}

impl VariableLengthSpec {
    pub fn single_hop() -> Self {
        VariableLengthSpec { min: 1, max: 1 }
    }

    pub fn is_variable_length(&self) -> bool {
        !(self.min == 1 && self.max == 1)
    }
}

#[derive(Debug, Clone)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub label: Option<String>,
    pub properties: Vec<(String, AstNode)>,
}

#[derive(Debug, Clone)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    pub direction: Direction,
    /// Multiple types are OR-ed (§4.7: "one or more allowed types
    /// (OR-ed)").
    pub types: Vec<String>,
    pub properties: Vec<(String, AstNode)>,
    pub hops: VariableLengthSpec,
}

/// One hop of a pattern chain: a relationship followed by the node it leads
/// to.
#[derive(Debug, Clone)]
pub struct PatternStep {
    pub relationship: RelationshipPattern,
    pub node: NodePattern,
}

/// An ordered chain alternating Node and Relationship references (§3).
#[derive(Debug, Clone)]
pub struct Pattern {
    pub path_variable: Option<String>,
    pub start: NodePattern,
    pub steps: Vec<PatternStep>,
}

impl Pattern {
    pub fn is_single_node(&self) -> bool {
        self.steps.is_empty()
    }
}

/// `MATCH (a), (b)` — comma-separated patterns cross-joined in declaration
/// order (§4.7 "Multi-pattern matching").
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    pub patterns: Vec<Pattern>,
}
