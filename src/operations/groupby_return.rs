//! §4.5 "Return"/"AggregatedReturn": the terminal projection operations.
//! `build_return` inspects the projection for an aggregate call (§4.2) and
//! picks between them, mirroring the teacher's `render_plan` builders
//! choosing a plain projection vs. a `GROUP BY` render based on the same
//! AST shape.

use async_trait::async_trait;

use crate::errors::EngineResult;
use crate::groupby::GroupByEngine;
use crate::parser::ProjectionItem;

use super::{Env, Flow, Operation, Row};

pub struct Return {
    items: Vec<ProjectionItem>,
    rows: Vec<Row>,
}

pub fn build_return(items: Vec<ProjectionItem>) -> Box<dyn Operation> {
    Box::new(Return { items, rows: Vec::new() })
}

#[async_trait(?Send)]
impl Operation for Return {
    async fn initialize(&mut self, _env: &Env<'_>) -> EngineResult<()> {
        self.rows.clear();
        Ok(())
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        let mut row = Row::new();
        for item in &self.items {
            row.insert(item.alias.clone(), item.expr.eval(&ctx)?);
        }
        self.rows.push(row);
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, _env: &Env<'_>) -> EngineResult<Flow> {
        Ok(Flow::Continue)
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        Some(std::mem::take(&mut self.rows))
    }
}

/// Delegates to `GroupByEngine`: feeds every inbound row into the trie, then
/// on `finish` streams one output row per group (§4.6).
pub struct AggregatedReturn {
    items: Vec<ProjectionItem>,
    engine: Option<GroupByEngine>,
    rows: Vec<Row>,
}

impl AggregatedReturn {
    pub fn new(items: Vec<ProjectionItem>) -> Self {
        AggregatedReturn { items, engine: None, rows: Vec::new() }
    }
}

#[async_trait(?Send)]
impl Operation for AggregatedReturn {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.engine = Some(GroupByEngine::new(&self.items, env.registry));
        self.rows.clear();
        Ok(())
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        self.engine.as_mut().expect("initialize runs before run").map(&self.items, &ctx)?;
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        let engine = self.engine.as_ref().expect("initialize runs before finish");
        // A query with no MATCH/UNWIND source and only aggregates (e.g.
        // `RETURN count(1) AS n`) never calls `run()`, so the group-by trie
        // stays empty; §4.6's reducers still answer (count → 0, sum → 0,
        // etc.) for the implicit single group.
        if engine.is_empty() {
            let mut row = Row::new();
            for item in &self.items {
                row.insert(item.alias.clone(), item.expr.eval(&ctx)?);
            }
            self.rows.push(row);
        } else {
            self.rows = engine.finish(&self.items, &ctx)?;
        }
        Ok(Flow::Continue)
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        Some(std::mem::take(&mut self.rows))
    }
}
