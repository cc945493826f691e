//! §4.5 Operation pipeline: the runtime chain a `Statement`'s clause list
//! compiles into. Each clause becomes one `Operation`; rows flow by mutating
//! a shared `Scope` and calling `next.run()` (push semantics, §5 "rows flow
//! in strict source order"), mirroring the teacher's staged `render_plan`
//! builders but executing instead of emitting SQL text.
//!
//! A deliberate simplification from a literal reading of §4.5: the parser
//! (`parser::statement`) produces a flat `Clause` list rather than this
//! crate's parser directly constructing the linked chain, so `build_pipeline`
//! is a separate compilation step (recorded in DESIGN.md).

mod groupby_return;
mod pattern_ops;
mod sources;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::ast::{AstNode, EvalContext};
use crate::errors::{EngineError, EngineResult};
use crate::function_registry::FunctionRegistry;
use crate::graph::matcher::TraversalCache;
use crate::graph::store::GraphStore;
use crate::http::HttpFetcher;
use crate::parser::{Clause, ProjectionItem, SortDirection};
use crate::scope::Scope;
use crate::value::Value;

pub use groupby_return::{AggregatedReturn, Return};
pub use pattern_ops::{Match, OptionalMatch};
pub use sources::{Call, Load, Unwind};

pub type Row = HashMap<String, Value>;

/// Whether an `Operation` wants more rows. `Stop` propagates upward through
/// every enclosing fan-out loop (Unwind/Match/Load) so a `LIMIT` downstream
/// halts the whole chain rather than merely discarding excess rows (§8
/// "LIMIT: ... producing operations short-circuit once N is reached").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Everything an `Operation` needs to evaluate expressions and reach the
/// outside world. Borrowed for the lifetime of one Runner execution.
/// Deliberately not
/// `Send`/`Sync` (the `Scope`/`TraversalCache` it carries use `Rc`/`RefCell`
/// for the single-threaded cooperative model §5 describes), so every
/// `Operation` impl below is driven with `#[async_trait(?Send)]`.
pub struct Env<'a> {
    pub scope: &'a Scope,
    pub registry: &'a FunctionRegistry,
    pub cache: &'a TraversalCache,
    pub fetcher: &'a dyn HttpFetcher,
    pub store: &'a GraphStore,
}

impl<'a> Env<'a> {
    pub fn eval_ctx(&self) -> EvalContext<'a> {
        EvalContext { scope: self.scope, registry: self.registry, graph: self.cache }
    }

    pub fn with_scope(&self, scope: &'a Scope) -> Env<'a> {
        Env { scope, registry: self.registry, cache: self.cache, fetcher: self.fetcher, store: self.store }
    }
}

#[async_trait(?Send)]
pub trait Operation {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()>;
    /// Processes the row currently bound in `env.scope`. Source operations
    /// (the head of the chain) ignore the ambient scope and produce their
    /// own rows instead.
    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow>;
    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow>;
    /// Populated only on the terminal operation.
    fn results(&mut self) -> Option<Vec<Row>> {
        None
    }
}

/// Runs a clause list to completion against the ambient engine resources
/// (registry, cache, fetcher, store) but a fresh `Scope` — used to resolve a
/// `CREATE VIRTUAL` producer's sub-query (§4.8 "for nested sub-queries ... a
/// new Runner is constructed over the already-parsed sub-AST").
pub async fn run_pipeline_to_rows(clauses: &[Clause], env: &Env<'_>) -> EngineResult<Vec<Row>> {
    let (mut pipeline, post_ops) = build_pipeline(clauses, env.registry)?;
    let scope = Scope::new();
    let sub_env = env.with_scope(&scope);
    pipeline.initialize(&sub_env).await?;
    pipeline.run(&sub_env).await?;
    pipeline.finish(&sub_env).await?;
    let rows = pipeline.results().unwrap_or_default();
    apply_post_ops(rows, &post_ops, env.registry, env.cache)
}

/// A query consisting only of `CREATE VIRTUAL` clauses compiles to this:
/// no rows, nothing to run.
pub struct Noop {
    rows: Vec<Row>,
}

impl Noop {
    pub fn new() -> Self {
        Noop { rows: Vec::new() }
    }
}

#[async_trait(?Send)]
impl Operation for Noop {
    async fn initialize(&mut self, _env: &Env<'_>) -> EngineResult<()> {
        Ok(())
    }
    async fn run(&mut self, _env: &Env<'_>) -> EngineResult<Flow> {
        Ok(Flow::Continue)
    }
    async fn finish(&mut self, _env: &Env<'_>) -> EngineResult<Flow> {
        Ok(Flow::Continue)
    }
    fn results(&mut self) -> Option<Vec<Row>> {
        Some(std::mem::take(&mut self.rows))
    }
}

/// A `WHERE`/`ORDER BY`/`LIMIT` clause trailing a terminal `RETURN`/`CALL`
/// (§6 "`RETURN ...` (same shape, may contain aggregates)") — these can't be
/// chain `next` operations since the terminal op has none, so they're
/// applied to the terminal's materialized rows instead.
#[derive(Debug, Clone)]
pub enum PostOp {
    Where(AstNode),
    OrderBy(Vec<(AstNode, SortDirection)>),
    Limit(AstNode),
}

/// Builds the runtime chain. `clauses` must already have any
/// `CreateVirtualNode`/`CreateVirtualRelationship` clauses stripped and
/// registered by the caller (§4.5 "registers the label/type ... does not
/// execute the sub-query eagerly" is a pure side effect, not a chain stage).
pub fn build_pipeline(
    clauses: &[Clause],
    registry: &FunctionRegistry,
) -> EngineResult<(Box<dyn Operation>, Vec<PostOp>)> {
    if clauses.is_empty() {
        return Ok((Box::new(Noop::new()), Vec::new()));
    }
    build_from(clauses, 0, registry)
}

fn build_from(clauses: &[Clause], idx: usize, registry: &FunctionRegistry) -> EngineResult<(Box<dyn Operation>, Vec<PostOp>)> {
    let clause = clauses
        .get(idx)
        .ok_or_else(|| EngineError::semantic("a query must end with RETURN, CALL, or CREATE VIRTUAL"))?;
    match clause {
        Clause::Return { items } => {
            let post = collect_post_ops(&clauses[idx + 1..])?;
            let op = if items.iter().any(|i| i.expr.contains_aggregate(registry)) {
                Box::new(groupby_return::AggregatedReturn::new(items.clone())) as Box<dyn Operation>
            } else {
                groupby_return::build_return(items.clone())
            };
            Ok((op, post))
        }
        Clause::Call { name, args, yield_fields: None } => {
            let post = collect_post_ops(&clauses[idx + 1..])?;
            Ok((Box::new(Call::terminal(name.clone(), args.clone())), post))
        }
        Clause::Call { name, args, yield_fields: Some(fields) } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(Call::projecting(name.clone(), args.clone(), fields.clone(), next)), post))
        }
        Clause::With { items } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(With { items: items.clone(), next }), post))
        }
        Clause::Unwind { expr, alias } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(Unwind { expr: expr.clone(), alias: alias.clone(), next }), post))
        }
        Clause::Load { format, source, headers, post_body, alias } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((
                Box::new(Load {
                    format: *format,
                    source: source.clone(),
                    headers: headers.clone(),
                    post_body: post_body.clone(),
                    alias: alias.clone(),
                    next,
                }),
                post,
            ))
        }
        Clause::Where { condition } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(Where { condition: condition.clone(), next }), post))
        }
        Clause::Limit { count } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(LimitOp { count: count.clone(), remaining: None, next }), post))
        }
        Clause::OrderBy { items } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            Ok((Box::new(OrderByOp { items: items.clone(), next, buffer: Vec::new() }), post))
        }
        Clause::Match { patterns, optional } => {
            let (next, post) = build_from(clauses, idx + 1, registry)?;
            if *optional {
                Ok((Box::new(OptionalMatch { patterns: patterns.clone(), next }), post))
            } else {
                Ok((Box::new(Match { patterns: patterns.clone(), next }), post))
            }
        }
        Clause::CreateVirtualNode { .. } | Clause::CreateVirtualRelationship { .. } => Err(EngineError::semantic(
            "CREATE VIRTUAL must be resolved before the operation chain is built",
        )),
    }
}

fn collect_post_ops(rest: &[Clause]) -> EngineResult<Vec<PostOp>> {
    let mut ops = Vec::new();
    for clause in rest {
        match clause {
            Clause::Where { condition } => ops.push(PostOp::Where(condition.clone())),
            Clause::OrderBy { items } => ops.push(PostOp::OrderBy(items.clone())),
            Clause::Limit { count } => ops.push(PostOp::Limit(count.clone())),
            _ => return Err(EngineError::semantic("only WHERE, ORDER BY, or LIMIT may follow RETURN or CALL")),
        }
    }
    Ok(ops)
}

/// Applies any trailing `PostOp`s to a terminal operation's materialized
/// rows: WHERE filters, ORDER BY stable-sorts (null first, ties fall
/// through to the next key), LIMIT truncates.
pub fn apply_post_ops(
    mut rows: Vec<Row>,
    post_ops: &[PostOp],
    registry: &FunctionRegistry,
    cache: &TraversalCache,
) -> EngineResult<Vec<Row>> {
    for op in post_ops {
        match op {
            PostOp::Where(condition) => {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let scope = row_scope(&row);
                    let ctx = EvalContext { scope: &scope, registry, graph: cache };
                    if condition.eval(&ctx)?.truthy() {
                        kept.push(row);
                    }
                }
                rows = kept;
            }
            PostOp::OrderBy(items) => {
                let mut keyed = Vec::with_capacity(rows.len());
                for row in rows {
                    let scope = row_scope(&row);
                    let ctx = EvalContext { scope: &scope, registry, graph: cache };
                    let mut keys = Vec::with_capacity(items.len());
                    for (expr, _) in items {
                        keys.push(expr.eval(&ctx)?);
                    }
                    keyed.push((keys, row));
                }
                keyed.sort_by(|a, b| {
                    for (idx, (_, direction)) in items.iter().enumerate() {
                        let ordering = a.0[idx].compare(&b.0[idx]).unwrap_or(std::cmp::Ordering::Equal);
                        let ordering = match direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        };
                        if ordering != std::cmp::Ordering::Equal {
                            return ordering;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                rows = keyed.into_iter().map(|(_, row)| row).collect();
            }
            PostOp::Limit(count_expr) => {
                let scope = Scope::new();
                let ctx = EvalContext { scope: &scope, registry, graph: cache };
                let n = match count_expr.eval(&ctx)? {
                    Value::Integer(i) if i >= 0 => i as usize,
                    Value::Integer(_) => 0,
                    other => return Err(EngineError::runtime(format!("LIMIT expects a non-negative integer, got {}", other.type_name()))),
                };
                rows.truncate(n);
            }
        }
    }
    Ok(rows)
}

fn row_scope(row: &Row) -> Scope {
    let scope = Scope::new();
    for (k, v) in row {
        scope.bind(k, v.clone());
    }
    scope
}

// ---------------------------------------------------------------------
// Simple 1:1 and fan-out row transforms.
// ---------------------------------------------------------------------

pub struct With {
    items: Vec<ProjectionItem>,
    next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for With {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        for item in &self.items {
            let value = item.expr.eval(&ctx)?;
            env.scope.bind(&item.alias, value);
        }
        self.next.run(env).await
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

pub struct Where {
    condition: AstNode,
    next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for Where {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        if self.condition.eval(&ctx)?.truthy() {
            self.next.run(env).await
        } else {
            Ok(Flow::Continue)
        }
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

pub struct LimitOp {
    count: AstNode,
    remaining: Option<usize>,
    next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for LimitOp {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.remaining = None;
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        if self.remaining.is_none() {
            let ctx = env.eval_ctx();
            let n = match self.count.eval(&ctx)? {
                Value::Integer(i) if i >= 0 => i as usize,
                Value::Integer(_) => 0,
                other => {
                    return Err(EngineError::runtime(format!(
                        "LIMIT expects a non-negative integer, got {}",
                        other.type_name()
                    )))
                }
            };
            self.remaining = Some(n);
        }
        let remaining = self.remaining.unwrap();
        if remaining == 0 {
            return Ok(Flow::Stop);
        }
        let flow = self.next.run(env).await?;
        self.remaining = Some(remaining - 1);
        if self.remaining == Some(0) {
            Ok(Flow::Stop)
        } else {
            Ok(flow)
        }
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

/// Buffers every inbound row (with a snapshot of the whole ambient scope, not
/// just its own sort keys, so downstream operations still see every
/// variable), then on `finish` replays them in sorted order.
pub struct OrderByOp {
    items: Vec<(AstNode, SortDirection)>,
    next: Box<dyn Operation>,
    buffer: Vec<Row>,
}

#[async_trait(?Send)]
impl Operation for OrderByOp {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.buffer.clear();
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let row: Row = env.scope.names().into_iter().filter_map(|n| env.scope.get(&n).map(|v| (n, v))).collect();
        self.buffer.push(row);
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let mut keyed = Vec::with_capacity(self.buffer.len());
        for row in self.buffer.drain(..) {
            let scope = row_scope(&row);
            let ctx = EvalContext { scope: &scope, registry: env.registry, graph: env.cache };
            let mut keys = Vec::with_capacity(self.items.len());
            for (expr, _) in &self.items {
                keys.push(expr.eval(&ctx)?);
            }
            keyed.push((keys, row));
        }
        let items = &self.items;
        keyed.sort_by(|a, b| {
            for (idx, (_, direction)) in items.iter().enumerate() {
                let ordering = a.0[idx].compare(&b.0[idx]).unwrap_or(std::cmp::Ordering::Equal);
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        for (_, row) in keyed {
            for (k, v) in &row {
                env.scope.bind(k, v.clone());
            }
            let flow = self.next.run(env).await?;
            if flow == Flow::Stop {
                break;
            }
        }
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}
