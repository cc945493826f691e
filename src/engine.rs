//! §4.9 Engine facade: owns the process-wide state (function registry,
//! virtual graph catalog) and the config a single call site needs to run a
//! query end to end.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::function_registry::FunctionRegistry;
use crate::graph::store::GraphStore;
use crate::http::HttpFetcher;
use crate::introspection::{introspection_call, run_introspection};
use crate::operations::Row;
use crate::parser::parse_query;
use crate::runner::Runner;

/// One projected output row. Named to match the public vocabulary in the
/// query surface contract — a plain alias over the pipeline's internal
/// `Row`, since both describe the same `{alias -> value}` shape.
pub type Record = Row;

pub struct Engine {
    pub config: EngineConfig,
    pub registry: FunctionRegistry,
    pub store: GraphStore,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine { config, registry: FunctionRegistry::with_builtins(), store: GraphStore::new() }
    }

    /// `tokenize → parse → Runner::execute`, under `config.query_timeout`.
    /// Partial results are discarded on expiry (§5) — the in-flight future
    /// is simply dropped, which cancels it at its next `.await` point.
    pub async fn run(&self, query: &str, ctx: &dyn HttpFetcher) -> Result<Vec<Record>, EngineError> {
        let statement = parse_query(query, &self.registry)?;

        let work = async {
            if let Some((name, args)) = introspection_call(&statement) {
                return run_introspection(name, args, &self.store, &self.registry, ctx).await;
            }
            let runner = Runner::new(&self.store, &self.registry, ctx);
            runner.execute(&statement).await
        };

        match tokio::time::timeout(self.config.query_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::UnconfiguredFetcher;

    #[tokio::test]
    async fn runs_a_bare_return() {
        let engine = Engine::default();
        let rows = engine.run("RETURN 1 + 1 AS n", &UnconfiguredFetcher).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&crate::value::Value::Integer(2)));
    }

    #[tokio::test]
    async fn unknown_function_is_a_semantic_error() {
        let engine = Engine::default();
        let err = engine.run("RETURN nope() AS n", &UnconfiguredFetcher).await.unwrap_err();
        assert!(matches!(err, EngineError::Semantic(_)));
    }

    #[tokio::test]
    async fn functions_introspection_lists_builtins() {
        let engine = Engine::default();
        let rows = engine.run("CALL functions()", &UnconfiguredFetcher).await.unwrap();
        assert!(!rows.is_empty());
    }
}
