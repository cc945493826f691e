//! §3 AST node model: "a polymorphic tree of typed nodes; every node exposes
//! a uniform `value()` evaluation and a child list." Modeled as a sum type
//! per the DESIGN.md note ("avoid deep inheritance"), mirroring the shape of
//! the teacher's `open_cypher_parser::ast::Expression` enum but carrying
//! owned data (rather than `&'a str` borrows of source text) so that AST
//! subtrees can be registered in the process-wide virtual graph store and
//! outlive the parse that produced them (§3 "Physical graph data outlives a
//! single query").

pub mod pattern;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::errors::{EngineError, EngineResult};
use crate::function_registry::{FunctionKind, FunctionRegistry};
use crate::graph::matcher::TraversalCache;
use crate::scope::Scope;
use crate::value::Value;

pub use pattern::{Direction, NodePattern, Pattern, RelationshipPattern, VariableLengthSpec};

/// Everything an `AstNode::eval` needs: the current variable bindings, the
/// function registry (for scalar/aggregate/predicate dispatch) and the
/// per-query traversal cache (for pattern-existence expressions, §4.7).
/// The cache — not the process-wide `GraphStore` — is what `eval` sees,
/// since evaluation is synchronous (§5) while resolving a label's producer
/// is not; the enclosing `Match`/`Where` operation resolves producers into
/// the cache before entering the synchronous expression evaluator.
pub struct EvalContext<'a> {
    pub scope: &'a Scope,
    pub registry: &'a FunctionRegistry,
    pub graph: &'a TraversalCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    And,
    Or,
    Not,
    In,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    IsNull,
    IsNotNull,
    UnaryMinus,
}

impl Operator {
    pub fn arity(&self) -> usize {
        matches!(
            self,
            Operator::Not | Operator::IsNull | Operator::IsNotNull | Operator::UnaryMinus
        )
        .then_some(1)
        .unwrap_or(2)
    }
}

#[derive(Debug, Clone)]
pub struct OperatorNode {
    pub operator: Operator,
    pub operands: Vec<AstNode>,
}

#[derive(Debug, Clone)]
pub enum LookupKey {
    Property(String),
    Dynamic(Box<AstNode>),
    Index(Box<AstNode>),
    Range(Option<Box<AstNode>>, Option<Box<AstNode>>),
}

#[derive(Debug, Clone)]
pub struct LookupNode {
    pub base: Box<AstNode>,
    pub key: LookupKey,
}

/// A function-call node. Aggregate calls (as classified by the registry)
/// carry a private override cell: the group-by engine fills it with the
/// final reduced value before the enclosing projection expression is
/// re-evaluated (§4.6), rather than recomputing the aggregate per row.
#[derive(Debug, Clone)]
pub struct FunctionCallNode {
    pub name: String,
    pub args: Vec<AstNode>,
    pub distinct: bool,
    pub aggregate_override: Rc<RefCell<Option<Value>>>,
}

impl FunctionCallNode {
    pub fn new(name: impl Into<String>, args: Vec<AstNode>, distinct: bool) -> Self {
        FunctionCallNode {
            name: name.into(),
            args,
            distinct,
            aggregate_override: Rc::new(RefCell::new(None)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaseNode {
    pub subject: Option<Box<AstNode>>,
    pub when_then: Vec<(AstNode, AstNode)>,
    pub else_expr: Option<Box<AstNode>>,
}

/// `agg(var IN list | expr [WHERE cond])`: a self-contained evaluation, its
/// aggregate state never crosses into the surrounding group-by (§4.4).
#[derive(Debug, Clone)]
pub struct PredicateComprehensionNode {
    pub aggregate_name: String,
    pub variable: String,
    pub list: Box<AstNode>,
    pub condition: Option<Box<AstNode>>,
    pub projection: Box<AstNode>,
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Expr(AstNode),
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Integer(i64),
    Float(f64),
    Str(String),
    Boolean(bool),
    Null,
    Reference(String),
    Lookup(LookupNode),
    FunctionCall(FunctionCallNode),
    AssociativeArray(Vec<(String, AstNode)>),
    JsonArray(Vec<AstNode>),
    FString(Vec<FStringPart>),
    PatternExpression(Box<Pattern>),
    Case(CaseNode),
    Operator(OperatorNode),
    PredicateComprehension(PredicateComprehensionNode),
}

impl AstNode {
    pub fn children(&self) -> Vec<&AstNode> {
        match self {
            AstNode::Lookup(l) => {
                let mut out = vec![l.base.as_ref()];
                match &l.key {
                    LookupKey::Dynamic(e) | LookupKey::Index(e) => out.push(e),
                    LookupKey::Range(from, to) => {
                        if let Some(f) = from {
                            out.push(f);
                        }
                        if let Some(t) = to {
                            out.push(t);
                        }
                    }
                    LookupKey::Property(_) => {}
                }
                out
            }
            AstNode::FunctionCall(f) => f.args.iter().collect(),
            AstNode::AssociativeArray(pairs) => pairs.iter().map(|(_, v)| v).collect(),
            AstNode::JsonArray(items) => items.iter().collect(),
            AstNode::FString(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    FStringPart::Expr(e) => Some(e),
                    FStringPart::Literal(_) => None,
                })
                .collect(),
            AstNode::Case(c) => {
                let mut out = Vec::new();
                if let Some(s) = &c.subject {
                    out.push(s.as_ref());
                }
                for (w, t) in &c.when_then {
                    out.push(w);
                    out.push(t);
                }
                if let Some(e) = &c.else_expr {
                    out.push(e.as_ref());
                }
                out
            }
            AstNode::Operator(o) => o.operands.iter().collect(),
            AstNode::PredicateComprehension(p) => {
                let mut out = vec![p.list.as_ref()];
                if let Some(c) = &p.condition {
                    out.push(c.as_ref());
                }
                out.push(p.projection.as_ref());
                out
            }
            _ => Vec::new(),
        }
    }

    /// §4.2: "Aggregate function calls may not nest (detected via a context
    /// stack)." Used both by the parser (to reject nested aggregates while
    /// building the tree) and by `Return`/`With` (to decide whether to
    /// instantiate an `AggregatedReturn`).
    pub fn contains_aggregate(&self, registry: &FunctionRegistry) -> bool {
        if let AstNode::FunctionCall(f) = self {
            if registry.kind_of(&f.name) == Some(FunctionKind::Aggregate) {
                return true;
            }
        }
        self.children().iter().any(|c| c.contains_aggregate(registry))
    }

    pub fn eval(&self, ctx: &EvalContext) -> EngineResult<Value> {
        match self {
            AstNode::Integer(i) => Ok(Value::Integer(*i)),
            AstNode::Float(f) => Ok(Value::Float(*f)),
            AstNode::Str(s) => Ok(Value::String(s.clone())),
            AstNode::Boolean(b) => Ok(Value::Bool(*b)),
            AstNode::Null => Ok(Value::Null),
            AstNode::Reference(name) => Ok(ctx.scope.get(name).unwrap_or(Value::Null)),
            AstNode::Lookup(l) => eval_lookup(l, ctx),
            AstNode::FunctionCall(f) => eval_function_call(f, ctx),
            AstNode::AssociativeArray(pairs) => {
                let mut map = BTreeMap::new();
                for (k, v) in pairs {
                    map.insert(k.clone(), v.eval(ctx)?);
                }
                Ok(Value::Map(map))
            }
            AstNode::JsonArray(items) => {
                let values = items.iter().map(|i| i.eval(ctx)).collect::<EngineResult<Vec<_>>>()?;
                Ok(Value::Array(values))
            }
            AstNode::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => out.push_str(s),
                        FStringPart::Expr(e) => out.push_str(&format!("{}", e.eval(ctx)?)),
                    }
                }
                Ok(Value::String(out))
            }
            AstNode::PatternExpression(pattern) => {
                let exists = crate::graph::matcher::pattern_exists(ctx, pattern)?;
                Ok(Value::bool_as_int(exists))
            }
            AstNode::Case(c) => eval_case(c, ctx),
            AstNode::Operator(o) => eval_operator(o, ctx),
            AstNode::PredicateComprehension(p) => eval_predicate_comprehension(p, ctx),
        }
    }
}

fn eval_lookup(l: &LookupNode, ctx: &EvalContext) -> EngineResult<Value> {
    let base = l.base.eval(ctx)?;
    match &l.key {
        LookupKey::Property(name) => Ok(base.get_property(name)),
        LookupKey::Dynamic(expr) => {
            let key = expr.eval(ctx)?;
            match key {
                Value::String(s) => Ok(base.get_property(&s)),
                Value::Integer(i) => index_into(&base, i),
                _ => Err(EngineError::runtime("invalid dynamic lookup key")),
            }
        }
        LookupKey::Index(expr) => {
            let idx = expr.eval(ctx)?;
            match idx {
                Value::Integer(i) => index_into(&base, i),
                _ => Err(EngineError::runtime("array index must be an integer")),
            }
        }
        LookupKey::Range(from, to) => {
            let arr = base.as_array().unwrap_or(&[]).to_vec();
            let len = arr.len() as i64;
            let from = match from {
                Some(e) => normalize_index(eval_int(e, ctx)?, len),
                None => 0,
            };
            let to = match to {
                Some(e) => normalize_index(eval_int(e, ctx)?, len),
                None => len,
            };
            let from = from.clamp(0, len) as usize;
            let to = to.clamp(0, len) as usize;
            if from >= to {
                Ok(Value::Array(Vec::new()))
            } else {
                Ok(Value::Array(arr[from..to].to_vec()))
            }
        }
    }
}

fn eval_int(e: &AstNode, ctx: &EvalContext) -> EngineResult<i64> {
    match e.eval(ctx)? {
        Value::Integer(i) => Ok(i),
        other => Err(EngineError::runtime(format!(
            "expected integer, got {}",
            other.type_name()
        ))),
    }
}

fn normalize_index(i: i64, len: i64) -> i64 {
    if i < 0 {
        len + i
    } else {
        i
    }
}

fn index_into(base: &Value, i: i64) -> EngineResult<Value> {
    let arr = base
        .as_array()
        .ok_or_else(|| EngineError::runtime("cannot index a non-array value"))?;
    let i = normalize_index(i, arr.len() as i64);
    if i < 0 || i as usize >= arr.len() {
        Ok(Value::Null)
    } else {
        Ok(arr[i as usize].clone())
    }
}

fn eval_function_call(f: &FunctionCallNode, ctx: &EvalContext) -> EngineResult<Value> {
    if let Some(v) = f.aggregate_override.borrow().clone() {
        return Ok(v);
    }
    let kind = ctx.registry.kind_of(&f.name);
    if kind == Some(FunctionKind::Aggregate) {
        // Evaluated outside a group-by context (e.g. a bare `RETURN sum(x)`
        // with no rows seen yet, or accessed before the group-by engine set
        // the override): fall back to an empty reduction.
        let args = f.args.iter().map(|a| a.eval(ctx)).collect::<EngineResult<Vec<_>>>()?;
        return ctx.registry.call_aggregate_standalone(&f.name, &args, f.distinct);
    }
    let args = f.args.iter().map(|a| a.eval(ctx)).collect::<EngineResult<Vec<_>>>()?;
    ctx.registry.call_scalar(&f.name, &args)
}

fn eval_case(c: &CaseNode, ctx: &EvalContext) -> EngineResult<Value> {
    match &c.subject {
        Some(subject) => {
            let subject_val = subject.eval(ctx)?;
            for (when, then) in &c.when_then {
                if subject_val.deep_eq(&when.eval(ctx)?) {
                    return then.eval(ctx);
                }
            }
        }
        None => {
            for (when, then) in &c.when_then {
                if when.eval(ctx)?.truthy() {
                    return then.eval(ctx);
                }
            }
        }
    }
    match &c.else_expr {
        Some(e) => e.eval(ctx),
        None => Ok(Value::Null),
    }
}

fn eval_predicate_comprehension(p: &PredicateComprehensionNode, ctx: &EvalContext) -> EngineResult<Value> {
    let list = p.list.eval(ctx)?;
    let items = list
        .as_array()
        .ok_or_else(|| EngineError::runtime("predicate comprehension source must be an array"))?
        .to_vec();
    let mut reducer = ctx.registry.make_reducer(&p.aggregate_name, false)?;
    for item in items {
        ctx.scope.bind(&p.variable, item.clone());
        let include = match &p.condition {
            Some(cond) => cond.eval(ctx)?.truthy(),
            None => true,
        };
        if include {
            let projected = p.projection.eval(ctx)?;
            reducer.reduce(&projected)?;
        }
    }
    Ok(reducer.finish())
}

fn eval_operator(o: &OperatorNode, ctx: &EvalContext) -> EngineResult<Value> {
    use Operator::*;
    if o.operator.arity() == 1 {
        let v = o.operands[0].eval(ctx)?;
        return match o.operator {
            Not => Ok(Value::bool_as_int(!v.truthy())),
            IsNull => Ok(Value::bool_as_int(v.is_null())),
            IsNotNull => Ok(Value::bool_as_int(!v.is_null())),
            UnaryMinus => match v {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Err(EngineError::runtime("unary minus requires a number")),
            },
            _ => unreachable!(),
        };
    }

    // Short-circuiting logical operators.
    if matches!(o.operator, And | Or) {
        let lhs = o.operands[0].eval(ctx)?;
        return match o.operator {
            And => {
                if !lhs.truthy() {
                    Ok(Value::bool_as_int(false))
                } else {
                    Ok(Value::bool_as_int(o.operands[1].eval(ctx)?.truthy()))
                }
            }
            Or => {
                if lhs.truthy() {
                    Ok(Value::bool_as_int(true))
                } else {
                    Ok(Value::bool_as_int(o.operands[1].eval(ctx)?.truthy()))
                }
            }
            _ => unreachable!(),
        };
    }

    let lhs = o.operands[0].eval(ctx)?;
    let rhs = o.operands[1].eval(ctx)?;
    match o.operator {
        Add => add(&lhs, &rhs),
        Subtract => arith(&lhs, &rhs, |a, b| a - b, "subtract"),
        Multiply => arith(&lhs, &rhs, |a, b| a * b, "multiply"),
        Divide => divide(&lhs, &rhs),
        Modulo => modulo(&lhs, &rhs),
        Exponent => arith(&lhs, &rhs, |a, b| a.powf(b), "exponentiate"),
        Equal => Ok(Value::bool_as_int(lhs.deep_eq(&rhs))),
        NotEqual => Ok(Value::bool_as_int(!lhs.deep_eq(&rhs))),
        LessThan => compare(&lhs, &rhs, std::cmp::Ordering::is_lt),
        GreaterThan => compare(&lhs, &rhs, std::cmp::Ordering::is_gt),
        LessThanEqual => compare(&lhs, &rhs, std::cmp::Ordering::is_le),
        GreaterThanEqual => compare(&lhs, &rhs, std::cmp::Ordering::is_ge),
        In => Ok(Value::bool_as_int(
            rhs.as_array().is_some_and(|arr| arr.iter().any(|v| v.deep_eq(&lhs))),
        )),
        NotIn => Ok(Value::bool_as_int(
            !rhs.as_array().is_some_and(|arr| arr.iter().any(|v| v.deep_eq(&lhs))),
        )),
        Contains => string_pred(&lhs, &rhs, |a, b| a.contains(b)),
        NotContains => string_pred(&lhs, &rhs, |a, b| !a.contains(b)),
        StartsWith => string_pred(&lhs, &rhs, |a, b| a.starts_with(b)),
        NotStartsWith => string_pred(&lhs, &rhs, |a, b| !a.starts_with(b)),
        EndsWith => string_pred(&lhs, &rhs, |a, b| a.ends_with(b)),
        NotEndsWith => string_pred(&lhs, &rhs, |a, b| !a.ends_with(b)),
        _ => unreachable!(),
    }
}

fn add(lhs: &Value, rhs: &Value) -> EngineResult<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Ok(Value::Array(out))
        }
        _ => arith(lhs, rhs, |a, b| a + b, "add"),
    }
}

fn arith(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64, op: &str) -> EngineResult<Value> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => {
            let result = f(a, b);
            if matches!(lhs, Value::Integer(_)) && matches!(rhs, Value::Integer(_)) && result.fract() == 0.0 {
                Ok(Value::Integer(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        _ => Err(EngineError::runtime(format!(
            "cannot {} {} and {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn divide(lhs: &Value, rhs: &Value) -> EngineResult<Value> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(_), Some(b)) if b == 0.0 => Err(EngineError::runtime("division by zero")),
        (Some(a), Some(b)) => {
            if matches!(lhs, Value::Integer(_)) && matches!(rhs, Value::Integer(_)) && (a as i64) % (b as i64) == 0 {
                Ok(Value::Integer((a as i64) / (b as i64)))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        _ => Err(EngineError::runtime(format!(
            "cannot divide {} by {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn modulo(lhs: &Value, rhs: &Value) -> EngineResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            if *b == 0 {
                Err(EngineError::runtime("division by zero"))
            } else {
                Ok(Value::Integer(a % b))
            }
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(_), Some(b)) if b == 0.0 => Err(EngineError::runtime("division by zero")),
            (Some(a), Some(b)) => Ok(Value::Float(a % b)),
            _ => Err(EngineError::runtime("modulo requires numbers")),
        },
    }
}

fn compare(lhs: &Value, rhs: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> EngineResult<Value> {
    match lhs.compare(rhs) {
        Some(ord) => Ok(Value::bool_as_int(pred(ord))),
        None => Err(EngineError::runtime(format!(
            "cannot compare {} and {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn string_pred(lhs: &Value, rhs: &Value, pred: impl Fn(&str, &str) -> bool) -> EngineResult<Value> {
    match (lhs.as_str(), rhs.as_str()) {
        (Some(a), Some(b)) => Ok(Value::bool_as_int(pred(a, b))),
        _ => Err(EngineError::runtime("string predicate requires string operands")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_registry::FunctionRegistry;
    use crate::graph::matcher::TraversalCache;

    fn ctx<'a>(scope: &'a Scope, registry: &'a FunctionRegistry, graph: &'a TraversalCache) -> EvalContext<'a> {
        EvalContext { scope, registry, graph }
    }

    #[test]
    fn arithmetic_precedence_independent_eval() {
        let scope = Scope::new();
        let registry = FunctionRegistry::with_builtins();
        let graph = TraversalCache::new();
        let c = ctx(&scope, &registry, &graph);
        let node = AstNode::Operator(OperatorNode {
            operator: Operator::Add,
            operands: vec![
                AstNode::Integer(1),
                AstNode::Operator(OperatorNode {
                    operator: Operator::Multiply,
                    operands: vec![AstNode::Integer(2), AstNode::Integer(3)],
                }),
            ],
        });
        assert_eq!(node.eval(&c).unwrap(), Value::Integer(7));
    }

    #[test]
    fn division_by_zero_is_runtime_error() {
        let scope = Scope::new();
        let registry = FunctionRegistry::with_builtins();
        let graph = TraversalCache::new();
        let c = ctx(&scope, &registry, &graph);
        let node = AstNode::Operator(OperatorNode {
            operator: Operator::Divide,
            operands: vec![AstNode::Integer(1), AstNode::Integer(0)],
        });
        assert!(node.eval(&c).is_err());
    }

    #[test]
    fn is_null_on_null_is_one() {
        let scope = Scope::new();
        let registry = FunctionRegistry::with_builtins();
        let graph = TraversalCache::new();
        let c = ctx(&scope, &registry, &graph);
        let node = AstNode::Operator(OperatorNode {
            operator: Operator::IsNull,
            operands: vec![AstNode::Null],
        });
        assert_eq!(node.eval(&c).unwrap(), Value::Integer(1));
    }

    #[test]
    fn string_starts_with() {
        let scope = Scope::new();
        let registry = FunctionRegistry::with_builtins();
        let graph = TraversalCache::new();
        let c = ctx(&scope, &registry, &graph);
        let node = AstNode::Operator(OperatorNode {
            operator: Operator::StartsWith,
            operands: vec![
                AstNode::Str("pineapple".to_string()),
                AstNode::Str("pine".to_string()),
            ],
        });
        assert_eq!(node.eval(&c).unwrap(), Value::Integer(1));
    }
}
