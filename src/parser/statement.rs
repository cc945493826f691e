//! §4.1-§4.2, §6 statement parser: turns a token stream into the clause list
//! the operation-pipeline builder (`crate::operations::build_pipeline`)
//! compiles into a runnable chain. Grounded on the teacher's
//! `open_cypher_parser` recursive-descent clause functions, adapted from a
//! `nom`-combinator style to the shared `Cursor`.

use std::collections::HashSet;

use crate::ast::pattern::Pattern;
use crate::ast::{AstNode, LookupKey};
use crate::errors::{EngineError, EngineResult};
use crate::function_registry::{FunctionKind, FunctionRegistry};
use crate::tokenizer::cursor::Cursor;
use crate::tokenizer::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    Json,
    Text,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct ProjectionItem {
    pub expr: AstNode,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub enum Clause {
    With { items: Vec<ProjectionItem> },
    Unwind { expr: AstNode, alias: String },
    Load {
        format: LoadFormat,
        source: AstNode,
        headers: Option<AstNode>,
        post_body: Option<AstNode>,
        alias: String,
    },
    Call { name: String, args: Vec<AstNode>, yield_fields: Option<Vec<String>> },
    Where { condition: AstNode },
    Limit { count: AstNode },
    OrderBy { items: Vec<(AstNode, SortDirection)> },
    Return { items: Vec<ProjectionItem> },
    Match { patterns: Vec<Pattern>, optional: bool },
    CreateVirtualNode { label: String, body: Vec<Clause> },
    CreateVirtualRelationship { left_label: String, rel_type: String, right_label: String, body: Vec<Clause> },
}

/// A fully parsed query: either one clause pipeline, or two pipelines
/// joined by `UNION`/`UNION ALL` (§4.5).
#[derive(Debug, Clone)]
pub enum Statement {
    Pipeline(Vec<Clause>),
    Union { all: bool, left: Box<Statement>, right: Box<Statement> },
}

/// Symbol table used while parsing: which variable names are already bound
/// by an earlier clause, so a `Reference` in a later expression resolves
/// instead of looking like a typo, and so a repeated pattern variable is
/// recognized as identifier reuse rather than a fresh binding (§4.2).
#[derive(Default)]
pub struct ParserState {
    bound: HashSet<String>,
}

impl ParserState {
    pub fn new() -> Self {
        ParserState::default()
    }

    pub fn bind(&mut self, name: &str) {
        self.bound.insert(name.to_string());
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bound.contains(name)
    }
}

/// Tokenizes and parses one top-level query (§6). `registry` is consulted
/// only to classify function calls as aggregate/scalar while checking the
/// "aggregates may not nest" rule (§4.2) — it is not mutated.
pub fn parse_query(source: &str, registry: &FunctionRegistry) -> EngineResult<Statement> {
    let tokens = crate::tokenizer::tokenize_significant(source)?;
    let mut cursor = Cursor::new(&tokens);
    let mut state = ParserState::new();
    let stmt = parse_statement(&mut cursor, registry, &mut state)?;
    if !cursor.at_eof() {
        return Err(EngineError::syntax(
            format!("unexpected trailing token '{}'", cursor.peek().value),
            cursor.position(),
        ));
    }
    validate_terminal_clause(&stmt)?;
    Ok(stmt)
}

fn parse_statement(cursor: &mut Cursor, registry: &FunctionRegistry, state: &mut ParserState) -> EngineResult<Statement> {
    let clauses = parse_single_query(cursor, registry, state)?;
    if cursor.match_keyword("UNION") {
        let all = cursor.match_keyword("ALL");
        let right = parse_statement(cursor, registry, state)?;
        return Ok(Statement::Union { all, left: Box::new(Statement::Pipeline(clauses)), right: Box::new(right) });
    }
    Ok(Statement::Pipeline(clauses))
}

fn parse_single_query(
    cursor: &mut Cursor,
    registry: &FunctionRegistry,
    state: &mut ParserState,
) -> EngineResult<Vec<Clause>> {
    let clauses = parse_clauses_until(cursor, registry, state, |t| t.is_keyword("UNION"))?;
    let returns = clauses.iter().filter(|c| matches!(c, Clause::Return { .. })).count();
    if returns > 1 {
        return Err(EngineError::semantic("multiple RETURN clauses are not allowed in one query"));
    }
    Ok(clauses)
}

fn parse_clauses_until(
    cursor: &mut Cursor,
    registry: &FunctionRegistry,
    state: &mut ParserState,
    stop: impl Fn(&Token) -> bool,
) -> EngineResult<Vec<Clause>> {
    let mut clauses = Vec::new();
    while !cursor.at_eof() && !stop(cursor.peek()) {
        clauses.push(parse_clause(cursor, registry, state)?);
    }
    Ok(clauses)
}

fn validate_terminal_clause(stmt: &Statement) -> EngineResult<()> {
    match stmt {
        Statement::Pipeline(clauses) => {
            // WHERE/ORDER BY/LIMIT may trail a RETURN or CALL (§6); skip any
            // such run before checking what the query actually ends with.
            let body_end = clauses
                .iter()
                .rposition(|c| !matches!(c, Clause::Where { .. } | Clause::OrderBy { .. } | Clause::Limit { .. }));
            match body_end.and_then(|i| clauses.get(i)) {
                Some(Clause::Return { .. })
                | Some(Clause::Call { .. })
                | Some(Clause::CreateVirtualNode { .. })
                | Some(Clause::CreateVirtualRelationship { .. }) => Ok(()),
                _ => Err(EngineError::semantic(
                    "a query must end with RETURN, CALL, or CREATE VIRTUAL",
                )),
            }
        }
        Statement::Union { left, right, .. } => {
            validate_terminal_clause(left)?;
            validate_terminal_clause(right)
        }
    }
}

fn parse_clause(cursor: &mut Cursor, registry: &FunctionRegistry, state: &mut ParserState) -> EngineResult<Clause> {
    if cursor.match_keyword("WITH") {
        return parse_projection(cursor, registry, state, false);
    }
    if cursor.match_keyword("UNWIND") {
        return parse_unwind(cursor, state);
    }
    if cursor.match_keyword("LOAD") {
        return parse_load(cursor, state);
    }
    if cursor.match_keyword("CALL") {
        return parse_call(cursor, state);
    }
    if cursor.match_keyword("WHERE") {
        let condition = crate::expression::parse_expression(cursor)?;
        return Ok(Clause::Where { condition });
    }
    if cursor.match_keyword("LIMIT") {
        let count = crate::expression::parse_expression(cursor)?;
        return Ok(Clause::Limit { count });
    }
    if cursor.peek().is_keyword("ORDER") {
        return parse_order_by(cursor);
    }
    if cursor.match_keyword("RETURN") {
        return parse_projection(cursor, registry, state, true);
    }
    if cursor.match_keyword("OPTIONAL") {
        cursor.expect_keyword("MATCH")?;
        return parse_match(cursor, state, true);
    }
    if cursor.match_keyword("MATCH") {
        return parse_match(cursor, state, false);
    }
    if cursor.match_keyword("CREATE") {
        cursor.expect_keyword("VIRTUAL")?;
        return parse_create_virtual(cursor, registry, state);
    }
    Err(EngineError::syntax(format!("unexpected token '{}'", cursor.peek().value), cursor.position()))
}

/// `WITH`/`RETURN` share a grammar: a comma-separated projection list, each
/// item an expression with an optional `AS alias` (§6). Aggregate nesting is
/// rejected here per item (§4.2).
fn parse_projection(
    cursor: &mut Cursor,
    registry: &FunctionRegistry,
    state: &mut ParserState,
    _is_return: bool,
) -> EngineResult<Clause> {
    let mut items = Vec::new();
    let mut index = 0usize;
    loop {
        let expr = crate::expression::parse_expression(cursor)?;
        reject_nested_aggregates(&expr, registry, false)?;
        let alias = if cursor.match_keyword("AS") {
            cursor.expect_identifier()?
        } else {
            default_alias(&expr, index)
        };
        state.bind(&alias);
        items.push(ProjectionItem { expr, alias });
        index += 1;
        if !cursor.match_operator(",") {
            break;
        }
    }
    if _is_return {
        Ok(Clause::Return { items })
    } else {
        Ok(Clause::With { items })
    }
}

fn default_alias(expr: &AstNode, index: usize) -> String {
    match expr {
        AstNode::Reference(name) => name.clone(),
        AstNode::Lookup(l) => match &l.key {
            LookupKey::Property(p) => p.clone(),
            _ => format!("column_{}", index),
        },
        _ => format!("column_{}", index),
    }
}

fn reject_nested_aggregates(node: &AstNode, registry: &FunctionRegistry, already_in_aggregate: bool) -> EngineResult<()> {
    let is_aggregate =
        matches!(node, AstNode::FunctionCall(f) if registry.kind_of(&f.name) == Some(FunctionKind::Aggregate));
    if is_aggregate && already_in_aggregate {
        return Err(EngineError::semantic("aggregate function calls may not nest"));
    }
    let next = already_in_aggregate || is_aggregate;
    for child in node.children() {
        reject_nested_aggregates(child, registry, next)?;
    }
    Ok(())
}

fn parse_unwind(cursor: &mut Cursor, state: &mut ParserState) -> EngineResult<Clause> {
    let expr = crate::expression::parse_expression(cursor)?;
    cursor.expect_keyword("AS")?;
    let alias = cursor.expect_identifier()?;
    state.bind(&alias);
    Ok(Clause::Unwind { expr, alias })
}

fn parse_load(cursor: &mut Cursor, state: &mut ParserState) -> EngineResult<Clause> {
    let format = if cursor.match_keyword("JSON") {
        LoadFormat::Json
    } else if cursor.match_keyword("TEXT") {
        LoadFormat::Text
    } else if cursor.match_keyword("CSV") {
        LoadFormat::Csv
    } else {
        return Err(EngineError::syntax("expected JSON, TEXT, or CSV after LOAD", cursor.position()));
    };
    cursor.expect_keyword("FROM")?;
    let source = crate::expression::parse_expression(cursor)?;
    let mut headers = None;
    let mut post_body = None;
    loop {
        if cursor.match_keyword("HEADERS") {
            headers = Some(crate::expression::parse_expression(cursor)?);
            continue;
        }
        if cursor.match_keyword("POST") {
            post_body = Some(crate::expression::parse_expression(cursor)?);
            continue;
        }
        break;
    }
    cursor.expect_keyword("AS")?;
    let alias = cursor.expect_identifier()?;
    state.bind(&alias);
    Ok(Clause::Load { format, source, headers, post_body, alias })
}

fn parse_call(cursor: &mut Cursor, state: &mut ParserState) -> EngineResult<Clause> {
    let name = cursor.expect_identifier()?;
    cursor.expect_operator("(")?;
    let mut args = Vec::new();
    if !cursor.peek().is_operator(")") {
        loop {
            args.push(crate::expression::parse_expression(cursor)?);
            if !cursor.match_operator(",") {
                break;
            }
        }
    }
    cursor.expect_operator(")")?;
    let yield_fields = if cursor.match_keyword("YIELD") {
        let mut fields = Vec::new();
        loop {
            let field = cursor.expect_identifier()?;
            state.bind(&field);
            fields.push(field);
            if !cursor.match_operator(",") {
                break;
            }
        }
        Some(fields)
    } else {
        None
    };
    Ok(Clause::Call { name, args, yield_fields })
}

fn parse_order_by(cursor: &mut Cursor) -> EngineResult<Clause> {
    cursor.expect_keyword("ORDER")?;
    cursor.expect_keyword("BY")?;
    let mut items = Vec::new();
    loop {
        let expr = crate::expression::parse_expression(cursor)?;
        let direction = if cursor.match_keyword("DESC") {
            SortDirection::Desc
        } else {
            cursor.match_keyword("ASC");
            SortDirection::Asc
        };
        items.push((expr, direction));
        if !cursor.match_operator(",") {
            break;
        }
    }
    Ok(Clause::OrderBy { items })
}

fn parse_match(cursor: &mut Cursor, state: &mut ParserState, optional: bool) -> EngineResult<Clause> {
    let mut patterns = Vec::new();
    loop {
        let pattern = crate::parser::pattern::parse_pattern(cursor)?;
        bind_pattern_variables(&pattern, state);
        patterns.push(pattern);
        if !cursor.match_operator(",") {
            break;
        }
    }
    Ok(Clause::Match { patterns, optional })
}

fn bind_pattern_variables(pattern: &Pattern, state: &mut ParserState) {
    if let Some(name) = &pattern.start.variable {
        state.bind(name);
    }
    for step in &pattern.steps {
        if let Some(name) = &step.relationship.variable {
            state.bind(name);
        }
        if let Some(name) = &step.node.variable {
            state.bind(name);
        }
    }
    if let Some(name) = &pattern.path_variable {
        state.bind(name);
    }
}

fn parse_create_virtual(
    cursor: &mut Cursor,
    registry: &FunctionRegistry,
    state: &mut ParserState,
) -> EngineResult<Clause> {
    cursor.expect_operator("(")?;
    cursor.expect_operator(":")?;
    let left_label = cursor.expect_identifier_or_keyword()?;
    cursor.expect_operator(")")?;

    if cursor.peek().is_operator("-") || cursor.peek().is_operator("<") {
        cursor.match_operator("<");
        cursor.expect_operator("-")?;
        cursor.expect_operator("[")?;
        cursor.expect_operator(":")?;
        let rel_type = cursor.expect_identifier_or_keyword()?;
        cursor.expect_operator("]")?;
        cursor.expect_operator("-")?;
        cursor.match_operator(">");
        cursor.expect_operator("(")?;
        cursor.expect_operator(":")?;
        let right_label = cursor.expect_identifier_or_keyword()?;
        cursor.expect_operator(")")?;
        cursor.expect_keyword("AS")?;
        cursor.expect_operator("{")?;
        let body = parse_clauses_until(cursor, registry, state, |t| t.is_operator("}"))?;
        cursor.expect_operator("}")?;
        Ok(Clause::CreateVirtualRelationship { left_label, rel_type, right_label, body })
    } else {
        cursor.expect_keyword("AS")?;
        cursor.expect_operator("{")?;
        let body = parse_clauses_until(cursor, registry, state, |t| t.is_operator("}"))?;
        cursor.expect_operator("}")?;
        Ok(Clause::CreateVirtualNode { label: left_label, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Statement {
        let registry = FunctionRegistry::with_builtins();
        parse_query(src, &registry).unwrap()
    }

    #[test]
    fn simple_return_parses() {
        let stmt = parse("RETURN 1 AS one");
        match stmt {
            Statement::Pipeline(clauses) => {
                assert_eq!(clauses.len(), 1);
                assert!(matches!(&clauses[0], Clause::Return { items } if items[0].alias == "one"));
            }
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn default_alias_uses_reference_name() {
        let stmt = parse("MATCH (a:Person) RETURN a");
        match stmt {
            Statement::Pipeline(clauses) => match clauses.last().unwrap() {
                Clause::Return { items } => assert_eq!(items[0].alias, "a"),
                _ => panic!("expected return"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn missing_terminal_clause_is_rejected() {
        let registry = FunctionRegistry::with_builtins();
        assert!(parse_query("WITH 1 AS x", &registry).is_err());
    }

    #[test]
    fn nested_aggregates_are_rejected() {
        let registry = FunctionRegistry::with_builtins();
        assert!(parse_query("RETURN sum(avg(x)) AS y", &registry).is_err());
    }

    #[test]
    fn multiple_returns_are_rejected() {
        let registry = FunctionRegistry::with_builtins();
        assert!(parse_query("RETURN 1 AS a RETURN 2 AS b", &registry).is_err());
    }

    #[test]
    fn union_all_joins_two_pipelines() {
        let stmt = parse("RETURN 1 AS a UNION ALL RETURN 2 AS a");
        assert!(matches!(stmt, Statement::Union { all: true, .. }));
    }

    #[test]
    fn match_with_where_and_return_parses() {
        let stmt = parse("MATCH (a:Person)-[:KNOWS]->(b:Person) WHERE a.age > 21 RETURN b.name AS name");
        match stmt {
            Statement::Pipeline(clauses) => assert_eq!(clauses.len(), 3),
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn create_virtual_node_parses() {
        let stmt = parse("CREATE VIRTUAL (:Person) AS { LOAD JSON FROM people_source() AS row RETURN row.id AS id }");
        match stmt {
            Statement::Pipeline(clauses) => match &clauses[0] {
                Clause::CreateVirtualNode { label, body } => {
                    assert_eq!(label, "Person");
                    assert_eq!(body.len(), 2);
                }
                _ => panic!("expected create virtual node"),
            },
            _ => panic!("expected pipeline"),
        }
    }
}
