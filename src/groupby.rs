//! §4.6 Aggregation engine: a prefix trie keyed by the tuple of
//! non-aggregate ("mapper") projected values. Each leaf owns one reducer per
//! aggregate call appearing anywhere in the projection; `map()` walks or
//! creates the leaf for the current row and feeds every aggregate's
//! reducer, `finish()` walks leaves in insertion order (a plain `Vec` scan,
//! since groups are pushed in first-seen order — the trie only needs to
//! answer "have I seen this key tuple before," not drive the iteration
//! order) and re-evaluates the projection against each group's reduced
//! values.
//!
//! Mapper re-evaluation deviates from a literal per-node override cell (only
//! `FunctionCallNode` carries one, per `AstNode::FunctionCall`): instead, the
//! first row of a group snapshots the whole variable scope, and `finish()`
//! rebuilds a fresh `Scope` from that snapshot before re-evaluating the
//! projection — equivalent for any projection expression, since a
//! non-aggregate projected value is by definition constant across the rows
//! of one group.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{AstNode, EvalContext, FunctionCallNode};
use crate::errors::EngineResult;
use crate::function_registry::{aggregate::Reducer, FunctionRegistry};
use crate::parser::ProjectionItem;
use crate::scope::Scope;
use crate::value::Value;

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    leaf: Option<usize>,
}

struct GroupState {
    scope_snapshot: Vec<(String, Value)>,
    reducers: Vec<Box<dyn Reducer>>,
}

pub struct GroupByEngine {
    agg_template: Vec<(Rc<RefCell<Option<Value>>>, String, bool)>,
    root: TrieNode,
    groups: Vec<GroupState>,
}

impl GroupByEngine {
    pub fn new(items: &[ProjectionItem], registry: &FunctionRegistry) -> Self {
        let mut agg_template = Vec::new();
        for item in items {
            walk_aggregates(&item.expr, registry, &mut |fc| {
                agg_template.push((fc.aggregate_override.clone(), fc.name.clone(), fc.distinct));
            });
        }
        GroupByEngine { agg_template, root: TrieNode::default(), groups: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Feeds one input row into the trie (§4.6 "`map()` walks/creates the
    /// path for the current row").
    pub fn map(&mut self, items: &[ProjectionItem], ctx: &EvalContext) -> EngineResult<()> {
        let mut key_values = Vec::new();
        for item in items {
            if !item.expr.contains_aggregate(ctx.registry) {
                key_values.push(item.expr.eval(ctx)?);
            }
        }

        let mut arg_values = Vec::new();
        for item in items {
            walk_aggregates_fallible(&item.expr, ctx.registry, &mut |fc| {
                arg_values.push(if fc.args.is_empty() { Value::Integer(1) } else { fc.args[0].eval(ctx)? });
                Ok(())
            })?;
        }

        let group_idx = self.group_for(&key_values, ctx);
        let group = &mut self.groups[group_idx];
        for (reducer, value) in group.reducers.iter_mut().zip(arg_values.iter()) {
            reducer.reduce(value)?;
        }
        Ok(())
    }

    fn group_for(&mut self, key_values: &[Value], ctx: &EvalContext) -> usize {
        let mut node = &mut self.root;
        for key in key_values {
            node = node.children.entry(key.dedup_key()).or_default();
        }
        if let Some(idx) = node.leaf {
            return idx;
        }
        let reducers = self
            .agg_template
            .iter()
            .map(|(_, name, distinct)| {
                ctx.registry.make_reducer(name, *distinct).expect("aggregate classified at parse time must resolve")
            })
            .collect();
        let scope_snapshot =
            ctx.scope.names().into_iter().filter_map(|n| ctx.scope.get(&n).map(|v| (n, v))).collect();
        let idx = self.groups.len();
        self.groups.push(GroupState { scope_snapshot, reducers });
        node.leaf = Some(idx);
        idx
    }

    /// §4.6: re-evaluates the projection once per group, with every
    /// aggregate's override cell set to its reduced value and the group's
    /// snapshotted variables re-bound.
    pub fn finish(&self, items: &[ProjectionItem], ctx: &EvalContext) -> EngineResult<Vec<HashMap<String, Value>>> {
        let mut rows = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let scope = Scope::new();
            for (name, value) in &group.scope_snapshot {
                scope.bind(name, value.clone());
            }
            for ((cell, _, _), reducer) in self.agg_template.iter().zip(group.reducers.iter()) {
                *cell.borrow_mut() = Some(reducer.finish());
            }
            let group_ctx = EvalContext { scope: &scope, registry: ctx.registry, graph: ctx.graph };
            let mut row = HashMap::new();
            for item in items {
                row.insert(item.alias.clone(), item.expr.eval(&group_ctx)?);
            }
            rows.push(row);
            for (cell, _, _) in &self.agg_template {
                *cell.borrow_mut() = None;
            }
        }
        Ok(rows)
    }
}

fn walk_aggregates(node: &AstNode, registry: &FunctionRegistry, f: &mut impl FnMut(&FunctionCallNode)) {
    if let AstNode::FunctionCall(fc) = node {
        if registry.kind_of(&fc.name) == Some(crate::function_registry::FunctionKind::Aggregate) {
            f(fc);
        }
    }
    for child in node.children() {
        walk_aggregates(child, registry, f);
    }
}

fn walk_aggregates_fallible(
    node: &AstNode,
    registry: &FunctionRegistry,
    f: &mut impl FnMut(&FunctionCallNode) -> EngineResult<()>,
) -> EngineResult<()> {
    if let AstNode::FunctionCall(fc) = node {
        if registry.kind_of(&fc.name) == Some(crate::function_registry::FunctionKind::Aggregate) {
            f(fc)?;
        }
    }
    for child in node.children() {
        walk_aggregates_fallible(child, registry, f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionCallNode;
    use crate::graph::matcher::TraversalCache;

    fn items(exprs: Vec<(&str, AstNode)>) -> Vec<ProjectionItem> {
        exprs.into_iter().map(|(alias, expr)| ProjectionItem { expr, alias: alias.to_string() }).collect()
    }

    #[test]
    fn groups_by_non_aggregate_key() {
        let registry = FunctionRegistry::with_builtins();
        let cache = TraversalCache::new();
        let scope = Scope::new();
        let projection = items(vec![
            ("dept", AstNode::Reference("dept".into())),
            ("n", AstNode::FunctionCall(FunctionCallNode::new("count", vec![AstNode::Reference("dept".into())], false))),
        ]);
        let mut engine = GroupByEngine::new(&projection, &registry);

        for dept in ["eng", "eng", "sales"] {
            scope.bind("dept", Value::String(dept.to_string()));
            let ctx = EvalContext { scope: &scope, registry: &registry, graph: &cache };
            engine.map(&projection, &ctx).unwrap();
        }

        let ctx = EvalContext { scope: &scope, registry: &registry, graph: &cache };
        let rows = engine.finish(&projection, &ctx).unwrap();
        assert_eq!(rows.len(), 2);
        let eng_row = rows.iter().find(|r| r["dept"] == Value::String("eng".into())).unwrap();
        assert_eq!(eng_row["n"], Value::Integer(2));
    }
}
