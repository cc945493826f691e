//! Pattern-chain parsing (§4.7, §6): turns a run of tokens like
//! `p = (a:Person)-[:KNOWS*1..3]->(b)` into the `ast::pattern` types. Shared
//! by the expression parser (a pattern used as a boolean existence check in
//! `WHERE`) and the `MATCH`/`OPTIONAL MATCH` clause parser, so both agree on
//! exactly one grammar for node and relationship patterns.

use crate::ast::pattern::{Direction, NodePattern, Pattern, PatternStep, RelationshipPattern, VariableLengthSpec};
use crate::ast::AstNode;
use crate::errors::{EngineError, EngineResult};
use crate::tokenizer::cursor::Cursor;
use crate::tokenizer::token::TokenKind;

/// Parses a pattern starting at `(`, wrapping it as a boolean expression
/// node. Only commits to the pattern-expression reading when the chain
/// contains at least one relationship hop — a bare `(n)` is ambiguous with a
/// parenthesized sub-expression and is left for the caller to re-parse as
/// one (§4.3 `parse_primary` tries this first and restores on failure).
pub fn try_parse_pattern_expression(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let pattern = parse_pattern(cursor)?;
    if pattern.is_single_node() {
        return Err(EngineError::syntax(
            "bare node pattern is not a boolean expression",
            cursor.position(),
        ));
    }
    Ok(AstNode::PatternExpression(Box::new(pattern)))
}

/// Parses one full pattern, including an optional leading path-variable
/// binding (`p = (...)`, §6).
pub fn parse_pattern(cursor: &mut Cursor) -> EngineResult<Pattern> {
    let path_variable = if cursor.peek().kind == TokenKind::Identifier
        && cursor.peek_at(1).is_operator("=")
        && cursor.peek_at(2).is_operator("(")
    {
        let name = cursor.expect_identifier()?;
        cursor.advance(); // '='
        Some(name)
    } else {
        None
    };

    let start = parse_node_pattern(cursor)?;
    let mut steps = Vec::new();
    while let Some(step) = try_parse_pattern_step(cursor)? {
        steps.push(step);
    }
    Ok(Pattern { path_variable, start, steps })
}

fn parse_node_pattern(cursor: &mut Cursor) -> EngineResult<NodePattern> {
    cursor.expect_operator("(")?;
    let variable = if cursor.peek().kind == TokenKind::Identifier {
        Some(cursor.expect_identifier()?)
    } else {
        None
    };
    let label = if cursor.match_operator(":") {
        Some(cursor.expect_identifier_or_keyword()?)
    } else {
        None
    };
    let properties = if cursor.peek().is_operator("{") {
        parse_property_map(cursor)?
    } else {
        Vec::new()
    };
    cursor.expect_operator(")")?;
    Ok(NodePattern { variable, label, properties })
}

fn parse_property_map(cursor: &mut Cursor) -> EngineResult<Vec<(String, AstNode)>> {
    cursor.expect_operator("{")?;
    let mut pairs = Vec::new();
    if !cursor.peek().is_operator("}") {
        loop {
            let key = cursor.expect_identifier_or_keyword()?;
            cursor.expect_operator(":")?;
            let value = crate::expression::parse_expression(cursor)?;
            pairs.push((key, value));
            if !cursor.match_operator(",") {
                break;
            }
        }
    }
    cursor.expect_operator("}")?;
    Ok(pairs)
}

/// One relationship-then-node hop, or `None` if the cursor isn't sitting on
/// a relationship arrow (i.e. the pattern chain has ended). Forms handled:
/// `-[...]->`  (Right), `<-[...]-`  (Left), `-[...]-`  (Undirected).
fn try_parse_pattern_step(cursor: &mut Cursor) -> EngineResult<Option<PatternStep>> {
    let checkpoint = cursor.checkpoint();

    let left_arrow = cursor.match_operator("<");
    if !cursor.match_operator("-") {
        if left_arrow {
            cursor.restore(checkpoint);
        }
        return Ok(None);
    }

    let (variable, types, properties, hops) = if cursor.match_operator("[") {
        let variable = if cursor.peek().kind == TokenKind::Identifier {
            Some(cursor.expect_identifier()?)
        } else {
            None
        };
        let mut types = Vec::new();
        if cursor.match_operator(":") {
            types.push(cursor.expect_identifier_or_keyword()?);
            while cursor.match_operator("|") {
                types.push(cursor.expect_identifier_or_keyword()?);
            }
        }
        let hops = parse_hop_spec(cursor)?;
        let properties = if cursor.peek().is_operator("{") {
            parse_property_map(cursor)?
        } else {
            Vec::new()
        };
        cursor.expect_operator("]")?;
        (variable, types, properties, hops)
    } else {
        (None, Vec::new(), Vec::new(), VariableLengthSpec::single_hop())
    };

    cursor.expect_operator("-")?;
    let right_arrow = cursor.match_operator(">");

    let direction = if left_arrow {
        Direction::Left
    } else if right_arrow {
        Direction::Right
    } else {
        Direction::Undirected
    };

    let node = parse_node_pattern(cursor)?;
    Ok(Some(PatternStep {
        relationship: RelationshipPattern { variable, direction, types, properties, hops },
        node,
    }))
}

/// `*`, `*N`, `*min..max`, `*min..`, `*..max` (§4.7 variable-length hops).
/// Bare `*` and open-ended forms are capped later by `EngineConfig.max_hops`
/// rather than here, since the cap is a runtime resource control, not a
/// grammar constant.
fn parse_hop_spec(cursor: &mut Cursor) -> EngineResult<VariableLengthSpec> {
    if !cursor.match_operator("*") {
        return Ok(VariableLengthSpec::single_hop());
    }
    let min = take_number(cursor);
    if cursor.match_operator("..") {
        let max = take_number(cursor);
        Ok(VariableLengthSpec { min: min.unwrap_or(0), max: max.unwrap_or(u32::MAX) })
    } else if let Some(n) = min {
        Ok(VariableLengthSpec { min: n, max: n })
    } else {
        Ok(VariableLengthSpec { min: 0, max: u32::MAX })
    }
}

fn take_number(cursor: &mut Cursor) -> Option<u32> {
    if cursor.peek().kind == TokenKind::Number {
        let value = cursor.peek().value.clone();
        cursor.advance();
        value.trim_start_matches('.').parse::<u32>().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_significant;

    fn parse_expr(src: &str) -> AstNode {
        let tokens = tokenize_significant(src).unwrap();
        let mut cursor = Cursor::new(&tokens);
        let node = crate::expression::parse_expression(&mut cursor).unwrap();
        assert!(cursor.at_eof(), "leftover tokens after parsing '{}'", src);
        node
    }

    #[test]
    fn simple_right_pattern_parses_as_pattern_expression() {
        let node = parse_expr("(a:Person)-[:KNOWS]->(b:Person)");
        match node {
            AstNode::PatternExpression(p) => {
                assert_eq!(p.start.label.as_deref(), Some("Person"));
                assert_eq!(p.steps.len(), 1);
                assert_eq!(p.steps[0].relationship.direction, Direction::Right);
                assert_eq!(p.steps[0].relationship.types, vec!["KNOWS".to_string()]);
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }

    #[test]
    fn left_arrow_pattern_parses() {
        let node = parse_expr("(a)<-[:FOLLOWS]-(b)");
        match node {
            AstNode::PatternExpression(p) => {
                assert_eq!(p.steps[0].relationship.direction, Direction::Left);
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }

    #[test]
    fn undirected_pattern_parses() {
        let node = parse_expr("(a)-[:KNOWS]-(b)");
        match node {
            AstNode::PatternExpression(p) => {
                assert_eq!(p.steps[0].relationship.direction, Direction::Undirected);
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }

    #[test]
    fn variable_length_range_parses() {
        let node = parse_expr("(a)-[:KNOWS*1..3]->(b)");
        match node {
            AstNode::PatternExpression(p) => {
                let hops = p.steps[0].relationship.hops;
                assert_eq!(hops.min, 1);
                assert_eq!(hops.max, 3);
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }

    #[test]
    fn unbounded_variable_length_parses() {
        let node = parse_expr("(a)-[:KNOWS*]->(b)");
        match node {
            AstNode::PatternExpression(p) => {
                let hops = p.steps[0].relationship.hops;
                assert_eq!(hops.min, 0);
                assert_eq!(hops.max, u32::MAX);
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }

    #[test]
    fn bare_node_pattern_falls_back_to_parenthesized_reference() {
        let node = parse_expr("(a)");
        assert!(matches!(node, AstNode::Reference(ref s) if s == "a"));
    }

    #[test]
    fn multiple_types_are_or_ed() {
        let node = parse_expr("(a)-[:KNOWS|FOLLOWS]->(b)");
        match node {
            AstNode::PatternExpression(p) => {
                assert_eq!(
                    p.steps[0].relationship.types,
                    vec!["KNOWS".to_string(), "FOLLOWS".to_string()]
                );
            }
            other => panic!("expected pattern expression, got {:?}", other),
        }
    }
}
