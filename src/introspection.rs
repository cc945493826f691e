//! `CALL schema()` / `CALL functions([category])` (§4.9, §6): standalone
//! procedures handled before a clause list ever reaches
//! `crate::operations::build_pipeline`, mirroring the teacher's
//! `is_procedure_only_query` short-circuit in `server::handlers`.

use crate::errors::EngineResult;
use crate::function_registry::FunctionRegistry;
use crate::graph::matcher::TraversalCache;
use crate::graph::store::GraphStore;
use crate::http::HttpFetcher;
use crate::operations::{run_pipeline_to_rows, Env, Row};
use crate::parser::{Clause, Statement};
use crate::scope::Scope;
use crate::value::Value;

/// A parsed statement is procedure-only when it's a single `CALL
/// schema()`/`CALL functions(...)` clause with nothing else in the
/// pipeline — any trailing WHERE/ORDER BY/LIMIT or a YIELD still routes
/// through the normal operation chain, since only the bare introspection
/// call has a special-cased result shape.
pub fn introspection_call(statement: &Statement) -> Option<(&str, &[crate::ast::AstNode])> {
    let Statement::Pipeline(clauses) = statement else { return None };
    let [Clause::Call { name, args, yield_fields: None }] = clauses.as_slice() else { return None };
    matches!(name.as_str(), "schema" | "functions").then_some((name.as_str(), args.as_slice()))
}

pub async fn run_introspection(
    name: &str,
    args: &[crate::ast::AstNode],
    store: &GraphStore,
    registry: &FunctionRegistry,
    fetcher: &dyn HttpFetcher,
) -> EngineResult<Vec<Row>> {
    match name {
        "schema" => schema_rows(store, registry, fetcher).await,
        "functions" => {
            let cache = TraversalCache::default();
            let scope = Scope::new();
            let env = Env { scope: &scope, registry, cache: &cache, fetcher, store };
            let ctx = env.eval_ctx();
            let category = match args.first() {
                Some(expr) => expr.eval(&ctx)?.as_str().map(|s| s.to_string()),
                None => None,
            };
            Ok(functions_rows(registry, category.as_deref()))
        }
        _ => unreachable!("introspection_call only admits schema/functions"),
    }
}

/// `CALL schema() YIELD kind, label, type, sample`: one row per registered
/// label/relationship type, each carrying a sample record with its
/// `id`/`left_id`/`right_id` fields stripped.
async fn schema_rows(store: &GraphStore, registry: &FunctionRegistry, fetcher: &dyn HttpFetcher) -> EngineResult<Vec<Row>> {
    let cache = TraversalCache::default();
    let scope = Scope::new();
    let env = Env { scope: &scope, registry, cache: &cache, fetcher, store };

    let mut rows = Vec::new();
    for label in store.node_labels().await {
        let producer = store.node_producer(&label).await.expect("label came from node_labels()");
        let sample = run_pipeline_to_rows(&producer.clauses, &env)
            .await?
            .into_iter()
            .next()
            .map(|mut r| {
                r.remove("id");
                Value::Map(r.into_iter().collect())
            })
            .unwrap_or(Value::Null);
        rows.push(schema_row("node", Some(label), None, sample));
    }
    for (rel_type, _left, _right) in store.relationship_types().await {
        let producer = store.relationship_producer(&rel_type).await.expect("type came from relationship_types()");
        let sample = run_pipeline_to_rows(&producer.clauses, &env)
            .await?
            .into_iter()
            .next()
            .map(|mut r| {
                r.remove("left_id");
                r.remove("right_id");
                Value::Map(r.into_iter().collect())
            })
            .unwrap_or(Value::Null);
        rows.push(schema_row("relationship", None, Some(rel_type), sample));
    }
    Ok(rows)
}

fn schema_row(kind: &str, label: Option<String>, rel_type: Option<String>, sample: Value) -> Row {
    let mut row = Row::new();
    row.insert("kind".to_string(), Value::String(kind.to_string()));
    row.insert("label".to_string(), label.map(Value::String).unwrap_or(Value::Null));
    row.insert("type".to_string(), rel_type.map(Value::String).unwrap_or(Value::Null));
    row.insert("sample".to_string(), sample);
    row
}

fn functions_rows(registry: &FunctionRegistry, category: Option<&str>) -> Vec<Row> {
    registry
        .list_metadata(category)
        .into_iter()
        .map(|meta| {
            let mut row = Row::new();
            row.insert("name".to_string(), Value::String(meta.name));
            row.insert("description".to_string(), Value::String(meta.description));
            row.insert("category".to_string(), Value::String(meta.category));
            row.insert(
                "parameters".to_string(),
                Value::Array(meta.parameters.into_iter().map(Value::String).collect()),
            );
            row.insert("output".to_string(), Value::String(meta.output));
            row
        })
        .collect()
}
