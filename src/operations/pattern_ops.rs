//! §4.7/§4.5 `Match`/`OptionalMatch`: resolves every label/relationship type
//! a pattern touches into the per-query `TraversalCache` (async, may run a
//! nested sub-query against a registered producer), then hands off to the
//! synchronous recursive descent in `crate::graph::matcher`.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::ast::pattern::Pattern;
use crate::errors::{EngineError, EngineResult};
use crate::graph::matcher::{match_pattern, PatternRow};
use crate::value::{NodeRecord, RelationshipRecord, Value};

use super::{run_pipeline_to_rows, Env, Flow, Operation, Row};

pub struct Match {
    pub(super) patterns: Vec<Pattern>,
    pub(super) next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for Match {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let mut combos = vec![PatternRow::new()];
        for pattern in &self.patterns {
            resolve_pattern_producers(pattern, env).await?;
            let ctx = env.eval_ctx();
            let rows = match_pattern(&ctx, pattern)?;
            combos = cross_join(combos, rows);
        }
        emit(combos, env, &mut self.next).await
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

pub struct OptionalMatch {
    pub(super) patterns: Vec<Pattern>,
    pub(super) next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for OptionalMatch {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let mut combos = vec![PatternRow::new()];
        let mut all_resolved = true;
        for pattern in &self.patterns {
            if !pattern_producers_resolved(pattern, env).await? {
                // An unregistered label/type means this pattern can never
                // match; treat the whole clause as a zero-row traversal
                // instead of erroring, same as any other empty result.
                all_resolved = false;
                continue;
            }
            let ctx = env.eval_ctx();
            let rows = match_pattern(&ctx, pattern)?;
            combos = cross_join(combos, rows);
        }
        if !all_resolved {
            combos = Vec::new();
        }

        // The clause's own patterns cross-join like a regular MATCH; only
        // when that combined traversal yields nothing does it fall back to
        // one row with every variable the clause introduces bound to null
        // (§4.7 "if the inner traversal yields zero rows ... emit one row
        // in which all variables newly introduced by this MATCH are
        // null-valued").
        if combos.is_empty() {
            let mut null_row = PatternRow::new();
            for pattern in &self.patterns {
                for name in pattern_variable_names(pattern) {
                    null_row.insert(name, Value::Null);
                }
            }
            combos = vec![null_row];
        }
        emit(combos, env, &mut self.next).await
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

async fn emit(combos: Vec<PatternRow>, env: &Env<'_>, next: &mut Box<dyn Operation>) -> EngineResult<Flow> {
    for combo in combos {
        for (name, value) in &combo {
            env.scope.bind(name, value.clone());
        }
        if next.run(env).await? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

fn cross_join(acc: Vec<PatternRow>, rows: Vec<PatternRow>) -> Vec<PatternRow> {
    let mut out = Vec::with_capacity(acc.len() * rows.len());
    for a in &acc {
        for r in &rows {
            let mut merged = a.clone();
            merged.extend(r.clone());
            out.push(merged);
        }
    }
    out
}

fn pattern_variable_names(pattern: &Pattern) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(name) = &pattern.start.variable {
        names.push(name.clone());
    }
    for step in &pattern.steps {
        if let Some(name) = &step.relationship.variable {
            names.push(name.clone());
        }
        if let Some(name) = &step.node.variable {
            names.push(name.clone());
        }
    }
    if let Some(name) = &pattern.path_variable {
        names.push(name.clone());
    }
    names
}

/// Strict resolution for `MATCH`: an unregistered label/type is a runtime
/// error (§7, §8.6).
async fn resolve_pattern_producers(pattern: &Pattern, env: &Env<'_>) -> EngineResult<()> {
    if let Some(label) = &pattern.start.label {
        require_node_label(label, env).await?;
    }
    for step in &pattern.steps {
        for rel_type in &step.relationship.types {
            require_rel_type(rel_type, env).await?;
        }
        if let Some(label) = &step.node.label {
            require_node_label(label, env).await?;
        }
    }
    Ok(())
}

/// Lenient resolution for `OPTIONAL MATCH`: an unregistered label/type is
/// not an error — it just means this pattern can never match, so the
/// clause falls through to its null-padded row (§7, §8.6). Producer
/// execution failures (a registered producer's sub-query itself erroring)
/// still propagate.
async fn pattern_producers_resolved(pattern: &Pattern, env: &Env<'_>) -> EngineResult<bool> {
    let mut resolved = true;
    if let Some(label) = &pattern.start.label {
        resolved &= ensure_node_label(label, env).await?;
    }
    for step in &pattern.steps {
        for rel_type in &step.relationship.types {
            resolved &= ensure_rel_type(rel_type, env).await?;
        }
        if let Some(label) = &step.node.label {
            resolved &= ensure_node_label(label, env).await?;
        }
    }
    Ok(resolved)
}

async fn require_node_label(label: &str, env: &Env<'_>) -> EngineResult<()> {
    if ensure_node_label(label, env).await? {
        Ok(())
    } else {
        Err(EngineError::runtime(format!("no producer registered for label :{}", label)))
    }
}

async fn require_rel_type(rel_type: &str, env: &Env<'_>) -> EngineResult<()> {
    if ensure_rel_type(rel_type, env).await? {
        Ok(())
    } else {
        Err(EngineError::runtime(format!("no producer registered for relationship type :{}", rel_type)))
    }
}

/// Resolves `label`'s producer into the cache. Returns `false` (instead of
/// erroring) when no producer is registered, so callers can choose whether
/// a miss is fatal.
async fn ensure_node_label(label: &str, env: &Env<'_>) -> EngineResult<bool> {
    if env.cache.has_node_label(label) {
        return Ok(true);
    }
    let Some(producer) = env.store.node_producer(label).await else {
        return Ok(false);
    };
    let rows = run_pipeline_to_rows(&producer.clauses, env).await?;
    let records = rows_to_node_records(label, rows)?;
    env.cache.put_nodes(label.to_string(), records);
    Ok(true)
}

/// Resolves `rel_type`'s producer into the cache. Returns `false` (instead
/// of erroring) when no producer is registered, so callers can choose
/// whether a miss is fatal.
async fn ensure_rel_type(rel_type: &str, env: &Env<'_>) -> EngineResult<bool> {
    if env.cache.has_rel_type(rel_type) {
        return Ok(true);
    }
    let Some(producer) = env.store.relationship_producer(rel_type).await else {
        return Ok(false);
    };
    let rows = run_pipeline_to_rows(&producer.clauses, env).await?;
    let records = rows_to_relationship_records(rel_type, rows)?;
    env.cache.put_relationships(rel_type.to_string(), records);
    Ok(true)
}

/// §6 "Node producer must emit records with field `id`" — `id` is pulled
/// out, everything else becomes a property.
fn rows_to_node_records(label: &str, rows: Vec<Row>) -> EngineResult<Vec<NodeRecord>> {
    rows.into_iter()
        .map(|mut row| {
            let id = row
                .remove("id")
                .ok_or_else(|| EngineError::runtime(format!("producer for label :{} did not emit an 'id' field", label)))?;
            let properties: BTreeMap<String, Value> = row.into_iter().collect();
            Ok(NodeRecord { label: label.to_string(), id: Box::new(id), properties })
        })
        .collect()
}

/// §6 "Relationship producer must emit records with fields `left_id` and
/// `right_id` ... `id`/`left_id`/`right_id` are excluded from `properties`".
fn rows_to_relationship_records(rel_type: &str, rows: Vec<Row>) -> EngineResult<Vec<RelationshipRecord>> {
    rows.into_iter()
        .map(|mut row| {
            let left_id = row.remove("left_id").ok_or_else(|| {
                EngineError::runtime(format!("producer for relationship type :{} did not emit a 'left_id' field", rel_type))
            })?;
            let right_id = row.remove("right_id").ok_or_else(|| {
                EngineError::runtime(format!("producer for relationship type :{} did not emit a 'right_id' field", rel_type))
            })?;
            let properties: BTreeMap<String, Value> = row.into_iter().collect();
            Ok(RelationshipRecord { rel_type: rel_type.to_string(), left_id: Box::new(left_id), right_id: Box::new(right_id), properties })
        })
        .collect()
}
