//! §4.3 Expression evaluator: Shunting-Yard conversion of an infix token
//! stream into an `AstNode` operator tree. Atoms (literals, references,
//! lookups, function calls, comprehensions) are parsed by recursive descent;
//! the binary-operator spine is resolved with a classic two-stack
//! precedence climb using the table below, so `1 + 2 * 3` and
//! `a AND b OR c` build the same tree regardless of how deeply they're
//! nested in a clause.

use crate::ast::{
    AstNode, CaseNode, FStringPart, FunctionCallNode, LookupKey, LookupNode, Operator,
    OperatorNode, PredicateComprehensionNode,
};
use crate::errors::{EngineError, EngineResult};
use crate::tokenizer::cursor::Cursor;
use crate::tokenizer::token::TokenKind;

/// Precedence table (§4.3): lower binds weaker. `None` means the token is
/// not a binary operator at all.
fn binary_precedence(op: Operator) -> Option<(u8, bool)> {
    use Operator::*;
    Some(match op {
        Or => (1, false),
        And => (2, false),
        Equal | NotEqual | In | NotIn | Contains | NotContains | StartsWith | NotStartsWith
        | EndsWith | NotEndsWith => (4, false),
        LessThan | GreaterThan | LessThanEqual | GreaterThanEqual => (5, false),
        Add | Subtract => (6, false),
        Multiply | Divide | Modulo => (7, false),
        Exponent => (8, true),
        _ => return None,
    })
}

fn binary_operator_for_token(cursor: &Cursor) -> Option<Operator> {
    let t = cursor.peek();
    match t.kind {
        TokenKind::Keyword => match t.value.to_uppercase().as_str() {
            "AND" => Some(Operator::And),
            "OR" => Some(Operator::Or),
            "IN" => Some(Operator::In),
            "CONTAINS" => Some(Operator::Contains),
            _ => None,
        },
        TokenKind::Operator => match t.value.to_uppercase().as_str() {
            "=" => Some(Operator::Equal),
            "<>" => Some(Operator::NotEqual),
            "<" => Some(Operator::LessThan),
            ">" => Some(Operator::GreaterThan),
            "<=" => Some(Operator::LessThanEqual),
            ">=" => Some(Operator::GreaterThanEqual),
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "*" => Some(Operator::Multiply),
            "/" => Some(Operator::Divide),
            "%" => Some(Operator::Modulo),
            "^" => Some(Operator::Exponent),
            "NOT_IN" => Some(Operator::NotIn),
            "NOT_CONTAINS" => Some(Operator::NotContains),
            "STARTS_WITH" => Some(Operator::StartsWith),
            "NOT_STARTS_WITH" => Some(Operator::NotStartsWith),
            "ENDS_WITH" => Some(Operator::EndsWith),
            "NOT_ENDS_WITH" => Some(Operator::NotEndsWith),
            _ => None,
        },
        _ => None,
    }
}

/// Entry point: parses one expression off the cursor, leaving it positioned
/// just past the last consumed token.
pub fn parse_expression(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let mut output: Vec<AstNode> = vec![parse_unary(cursor)?];
    let mut operators: Vec<(Operator, u8, bool)> = Vec::new();

    while let Some(op) = binary_operator_for_token(cursor) {
        let (prec, right_assoc) = binary_precedence(op).expect("binary_operator_for_token implies a precedence");
        while let Some(&(top_op, top_prec, _)) = operators.last() {
            let pops = if right_assoc { top_prec > prec } else { top_prec >= prec };
            if pops {
                operators.pop();
                reduce_binary(&mut output, top_op)?;
            } else {
                break;
            }
        }
        cursor.advance();
        operators.push((op, prec, right_assoc));
        output.push(parse_unary(cursor)?);
    }

    while let Some((op, _, _)) = operators.pop() {
        reduce_binary(&mut output, op)?;
    }

    output.pop().ok_or_else(|| EngineError::syntax("empty expression", cursor.position()))
}

fn reduce_binary(output: &mut Vec<AstNode>, op: Operator) -> EngineResult<()> {
    let rhs = output.pop().ok_or_else(|| EngineError::syntax("malformed expression", Default::default()))?;
    let lhs = output.pop().ok_or_else(|| EngineError::syntax("malformed expression", Default::default()))?;
    output.push(AstNode::Operator(OperatorNode { operator: op, operands: vec![lhs, rhs] }));
    Ok(())
}

/// Prefix operators (§4.3 precedence 3 `NOT`, precedence 9 unary minus) bind
/// tighter than any binary operator, so they're parsed as part of the atom
/// rather than through the binary precedence climb.
fn parse_unary(cursor: &mut Cursor) -> EngineResult<AstNode> {
    if cursor.match_keyword("NOT") {
        let operand = parse_unary(cursor)?;
        return Ok(AstNode::Operator(OperatorNode { operator: Operator::Not, operands: vec![operand] }));
    }
    if cursor.peek().kind == TokenKind::UnaryOperator && cursor.peek().value == "-" {
        cursor.advance();
        let operand = parse_unary(cursor)?;
        return Ok(AstNode::Operator(OperatorNode { operator: Operator::UnaryMinus, operands: vec![operand] }));
    }
    if cursor.match_operator("-") {
        let operand = parse_unary(cursor)?;
        return Ok(AstNode::Operator(OperatorNode { operator: Operator::UnaryMinus, operands: vec![operand] }));
    }
    parse_postfix(cursor)
}

/// Parses a primary atom, then chains any postfix property/index/range
/// lookups and the `IS NULL`/`IS NOT NULL` suffix onto it (§4.3 precedence
/// 9; these always bind tighter than any surrounding binary operator).
fn parse_postfix(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let mut node = parse_primary(cursor)?;
    loop {
        if cursor.match_operator(".") {
            let key = cursor.expect_identifier_or_keyword()?;
            node = AstNode::Lookup(LookupNode { base: Box::new(node), key: LookupKey::Property(key) });
            continue;
        }
        if cursor.match_operator("[") {
            node = parse_index_or_range(cursor, node)?;
            continue;
        }
        if cursor.peek().is_operator("IS_NULL") {
            cursor.advance();
            node = AstNode::Operator(OperatorNode { operator: Operator::IsNull, operands: vec![node] });
            continue;
        }
        if cursor.peek().is_operator("IS_NOT_NULL") {
            cursor.advance();
            node = AstNode::Operator(OperatorNode { operator: Operator::IsNotNull, operands: vec![node] });
            continue;
        }
        break;
    }
    Ok(node)
}

fn parse_index_or_range(cursor: &mut Cursor, base: AstNode) -> EngineResult<AstNode> {
    if cursor.match_operator(":") {
        let to = if cursor.peek().is_operator("]") { None } else { Some(Box::new(parse_expression(cursor)?)) };
        cursor.expect_operator("]")?;
        return Ok(AstNode::Lookup(LookupNode { base: Box::new(base), key: LookupKey::Range(None, to) }));
    }
    let first = parse_expression(cursor)?;
    if cursor.match_operator(":") {
        let to = if cursor.peek().is_operator("]") { None } else { Some(Box::new(parse_expression(cursor)?)) };
        cursor.expect_operator("]")?;
        return Ok(AstNode::Lookup(LookupNode {
            base: Box::new(base),
            key: LookupKey::Range(Some(Box::new(first)), to),
        }));
    }
    cursor.expect_operator("]")?;
    Ok(AstNode::Lookup(LookupNode { base: Box::new(base), key: LookupKey::Index(Box::new(first)) }))
}

fn parse_primary(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let t = cursor.peek().clone();
    match t.kind {
        TokenKind::Number => {
            cursor.advance();
            if t.value.contains('.') || t.value.to_lowercase().contains('e') {
                t.value.parse::<f64>().map(AstNode::Float).map_err(|_| {
                    EngineError::syntax(format!("invalid number literal '{}'", t.value), t.position)
                })
            } else {
                t.value.parse::<i64>().map(AstNode::Integer).map_err(|_| {
                    EngineError::syntax(format!("invalid number literal '{}'", t.value), t.position)
                })
            }
        }
        TokenKind::String => {
            cursor.advance();
            Ok(AstNode::Str(t.value))
        }
        TokenKind::FStringLiteral => parse_fstring(cursor),
        TokenKind::Keyword if t.value.eq_ignore_ascii_case("NULL") => {
            cursor.advance();
            Ok(AstNode::Null)
        }
        TokenKind::Keyword if t.value.eq_ignore_ascii_case("TRUE") => {
            cursor.advance();
            Ok(AstNode::Boolean(true))
        }
        TokenKind::Keyword if t.value.eq_ignore_ascii_case("FALSE") => {
            cursor.advance();
            Ok(AstNode::Boolean(false))
        }
        TokenKind::Keyword if t.value.eq_ignore_ascii_case("CASE") => parse_case(cursor),
        TokenKind::Identifier if cursor.peek_at(1).is_operator("(") => parse_function_call_or_comprehension(cursor),
        TokenKind::Identifier => {
            cursor.advance();
            Ok(AstNode::Reference(t.value))
        }
        _ if t.is_operator("(") => {
            let checkpoint = cursor.checkpoint();
            if let Ok(pattern) = crate::parser::pattern::try_parse_pattern_expression(cursor) {
                return Ok(pattern);
            }
            cursor.restore(checkpoint);
            cursor.advance();
            let inner = parse_expression(cursor)?;
            cursor.expect_operator(")")?;
            Ok(inner)
        }
        _ if t.is_operator("[") => {
            cursor.advance();
            let mut items = Vec::new();
            if !cursor.peek().is_operator("]") {
                loop {
                    items.push(parse_expression(cursor)?);
                    if !cursor.match_operator(",") {
                        break;
                    }
                }
            }
            cursor.expect_operator("]")?;
            Ok(AstNode::JsonArray(items))
        }
        _ if t.is_operator("{") => parse_map_literal(cursor),
        _ => Err(EngineError::syntax(format!("unexpected token '{}'", t.value), t.position)),
    }
}

fn parse_map_literal(cursor: &mut Cursor) -> EngineResult<AstNode> {
    cursor.expect_operator("{")?;
    let mut pairs = Vec::new();
    if !cursor.peek().is_operator("}") {
        loop {
            let key = cursor.expect_identifier_or_keyword()?;
            cursor.expect_operator(":")?;
            let value = parse_expression(cursor)?;
            pairs.push((key, value));
            if !cursor.match_operator(",") {
                break;
            }
        }
    }
    cursor.expect_operator("}")?;
    Ok(AstNode::AssociativeArray(pairs))
}

fn parse_fstring(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let mut parts = Vec::new();
    let literal = cursor.advance().value.clone();
    parts.push(FStringPart::Literal(literal));
    loop {
        if !cursor.peek().is_fstring_expr_start() {
            break;
        }
        cursor.advance();
        let expr = parse_expression(cursor)?;
        parts.push(FStringPart::Expr(expr));
        if !cursor.peek().is_fstring_expr_end() {
            return Err(EngineError::syntax("expected closing '}' in f-string", cursor.position()));
        }
        cursor.advance();
        if !cursor.peek().is_fstring_literal() {
            break;
        }
        let literal = cursor.advance().value.clone();
        parts.push(FStringPart::Literal(literal));
    }
    Ok(AstNode::FString(parts))
}

fn parse_case(cursor: &mut Cursor) -> EngineResult<AstNode> {
    cursor.expect_keyword("CASE")?;
    let subject = if cursor.peek().is_keyword("WHEN") {
        None
    } else {
        Some(Box::new(parse_expression(cursor)?))
    };
    let mut when_then = Vec::new();
    while cursor.match_keyword("WHEN") {
        let when = parse_expression(cursor)?;
        cursor.expect_keyword("THEN")?;
        let then = parse_expression(cursor)?;
        when_then.push((when, then));
    }
    let else_expr = if cursor.match_keyword("ELSE") {
        Some(Box::new(parse_expression(cursor)?))
    } else {
        None
    };
    cursor.expect_keyword("END")?;
    Ok(AstNode::Case(CaseNode { subject, when_then, else_expr }))
}

/// `name(args...)`, disambiguating the predicate-comprehension form
/// `agg(var IN list | expr [WHERE cond])` from a plain call by probing for
/// `IN` after a leading identifier and backtracking if absent (§4.4).
fn parse_function_call_or_comprehension(cursor: &mut Cursor) -> EngineResult<AstNode> {
    let name = cursor.expect_identifier()?;
    cursor.expect_operator("(")?;

    let checkpoint = cursor.checkpoint();
    if cursor.peek().kind == TokenKind::Identifier && cursor.peek_at(1).is_keyword("IN") {
        let variable = cursor.expect_identifier().unwrap();
        cursor.advance(); // IN
        if let Ok(list) = parse_comprehension_list(cursor) {
            if cursor.match_operator("|") {
                let projection = parse_expression(cursor)?;
                let condition = if cursor.match_keyword("WHERE") {
                    Some(Box::new(parse_expression(cursor)?))
                } else {
                    None
                };
                cursor.expect_operator(")")?;
                return Ok(AstNode::PredicateComprehension(PredicateComprehensionNode {
                    aggregate_name: name,
                    variable,
                    list: Box::new(list),
                    condition,
                    projection: Box::new(projection),
                }));
            }
        }
        cursor.restore(checkpoint);
    }

    let distinct = cursor.match_keyword("DISTINCT");
    let mut args = Vec::new();
    if cursor.peek().is_operator("*") {
        cursor.advance();
        args.push(AstNode::Reference("*".to_string()));
    } else if !cursor.peek().is_operator(")") {
        loop {
            args.push(parse_expression(cursor)?);
            if !cursor.match_operator(",") {
                break;
            }
        }
    }
    cursor.expect_operator(")")?;
    Ok(AstNode::FunctionCall(FunctionCallNode::new(name, args, distinct)))
}

/// The list in a predicate comprehension must not itself consume the `|`
/// separator; `parse_expression`'s binary loop never treats `|` as an
/// operator, so a plain call is safe here.
fn parse_comprehension_list(cursor: &mut Cursor) -> EngineResult<AstNode> {
    parse_expression(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_significant;

    fn parse(src: &str) -> AstNode {
        let tokens = tokenize_significant(src).unwrap();
        let mut cursor = Cursor::new(&tokens);
        let node = parse_expression(&mut cursor).unwrap();
        assert!(cursor.at_eof(), "leftover tokens after parsing '{}'", src);
        node
    }

    #[test]
    fn precedence_multiply_binds_tighter_than_add() {
        let node = parse("1 + 2 * 3");
        match node {
            AstNode::Operator(o) => {
                assert_eq!(o.operator, Operator::Add);
                assert!(matches!(o.operands[1], AstNode::Operator(ref inner) if inner.operator == Operator::Multiply));
            }
            _ => panic!("expected operator node"),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let node = parse("a OR b AND c");
        match node {
            AstNode::Operator(o) => {
                assert_eq!(o.operator, Operator::Or);
                assert!(matches!(o.operands[1], AstNode::Operator(ref inner) if inner.operator == Operator::And));
            }
            _ => panic!("expected operator node"),
        }
    }

    #[test]
    fn exponent_is_right_associative() {
        let node = parse("2 ^ 3 ^ 2");
        match node {
            AstNode::Operator(o) => {
                assert_eq!(o.operator, Operator::Exponent);
                assert!(matches!(o.operands[0], AstNode::Integer(2)));
                assert!(matches!(o.operands[1], AstNode::Operator(ref inner) if inner.operator == Operator::Exponent));
            }
            _ => panic!("expected operator node"),
        }
    }

    #[test]
    fn property_lookup_binds_tighter_than_addition() {
        let node = parse("a.x + 1");
        match node {
            AstNode::Operator(o) => {
                assert!(matches!(o.operands[0], AstNode::Lookup(_)));
            }
            _ => panic!("expected operator node"),
        }
    }

    #[test]
    fn function_call_parses_arguments() {
        let node = parse("size(xs)");
        match node {
            AstNode::FunctionCall(f) => {
                assert_eq!(f.name, "size");
                assert_eq!(f.args.len(), 1);
            }
            _ => panic!("expected function call"),
        }
    }

    #[test]
    fn predicate_comprehension_parses() {
        let node = parse("sum(x IN [1,2,3] | x * 2 WHERE x > 1)");
        match node {
            AstNode::PredicateComprehension(p) => {
                assert_eq!(p.aggregate_name, "sum");
                assert_eq!(p.variable, "x");
                assert!(p.condition.is_some());
            }
            _ => panic!("expected predicate comprehension"),
        }
    }

    #[test]
    fn is_null_is_postfix() {
        let node = parse("a IS NULL");
        assert!(matches!(node, AstNode::Operator(o) if o.operator == Operator::IsNull));
    }

    #[test]
    fn starts_with_string_predicate() {
        let node = parse("s STARTS WITH 'pine'");
        assert!(matches!(node, AstNode::Operator(o) if o.operator == Operator::StartsWith));
    }
}
