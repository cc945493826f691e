//! §4.8 Runner: drives one parsed `Statement` to completion — registering
//! any `CREATE VIRTUAL` side effects, building the operation chain for the
//! rest of the clause list, and running it to materialize the terminal
//! operation's rows.

use crate::errors::{EngineError, EngineResult};
use crate::function_registry::FunctionRegistry;
use crate::graph::matcher::TraversalCache;
use crate::graph::store::GraphStore;
use crate::http::HttpFetcher;
use crate::operations::{apply_post_ops, build_pipeline, Env, Row};
use crate::parser::{Clause, Statement};
use crate::scope::Scope;

pub struct Runner<'a> {
    pub store: &'a GraphStore,
    pub registry: &'a FunctionRegistry,
    pub fetcher: &'a dyn HttpFetcher,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a GraphStore, registry: &'a FunctionRegistry, fetcher: &'a dyn HttpFetcher) -> Self {
        Runner { store, registry, fetcher }
    }

    pub async fn execute(&self, statement: &Statement) -> EngineResult<Vec<Row>> {
        match statement {
            Statement::Pipeline(clauses) => self.execute_pipeline(clauses).await,
            Statement::Union { all, left, right } => {
                let mut left_rows = Box::pin(self.execute(left)).await?;
                let right_rows = Box::pin(self.execute(right)).await?;
                check_same_columns(&left_rows, &right_rows)?;
                left_rows.extend(right_rows);
                Ok(if *all { left_rows } else { dedup_rows(left_rows) })
            }
        }
    }

    async fn execute_pipeline(&self, clauses: &[Clause]) -> EngineResult<Vec<Row>> {
        let mut body = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                Clause::CreateVirtualNode { label, body: producer_body } => {
                    self.store.register_node(label.clone(), producer_body.clone()).await;
                }
                Clause::CreateVirtualRelationship { left_label, rel_type, right_label, body: producer_body } => {
                    self.store
                        .register_relationship(
                            rel_type.clone(),
                            left_label.clone(),
                            right_label.clone(),
                            producer_body.clone(),
                        )
                        .await;
                }
                other => body.push(other.clone()),
            }
        }

        let (mut pipeline, post_ops) = build_pipeline(&body, self.registry)?;
        let cache = TraversalCache::default();
        let scope = Scope::new();
        let env = Env { scope: &scope, registry: self.registry, cache: &cache, fetcher: self.fetcher, store: self.store };

        pipeline.initialize(&env).await?;
        pipeline.run(&env).await?;
        pipeline.finish(&env).await?;
        let rows = pipeline.results().unwrap_or_default();
        apply_post_ops(rows, &post_ops, self.registry, &cache)
    }
}

/// UNION requires both sides to project the same set of column names (§4.5
/// "Both sides must project the same set of column names (unordered
/// compare) or fail").
fn check_same_columns(left: &[Row], right: &[Row]) -> EngineResult<()> {
    let mut left_cols: Vec<&String> = left.first().map(|r| r.keys().collect()).unwrap_or_default();
    let mut right_cols: Vec<&String> = right.first().map(|r| r.keys().collect()).unwrap_or_default();
    left_cols.sort();
    right_cols.sort();
    if !left_cols.is_empty() && !right_cols.is_empty() && left_cols != right_cols {
        return Err(EngineError::semantic("UNION requires both sides to return the same columns"));
    }
    Ok(())
}

/// UNION dedups by deep value equality on the whole projected record (§4.5,
/// §8 "every output row is unique under deep value equality").
fn dedup_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    'next_row: for row in rows {
        for kept in &out {
            if rows_deep_eq(kept, &row) {
                continue 'next_row;
            }
        }
        out.push(row);
    }
    out
}

fn rows_deep_eq(a: &Row, b: &Row) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(k, v)| b.get(k).is_some_and(|other| v.deep_eq(other)))
}

