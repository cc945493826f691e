//! §4.4 Function registry: a process-wide, name-keyed map with four
//! variants (scalar, aggregate, predicate-comprehension host, async data
//! provider). Grounded on the teacher's `clickhouse_query_generator::
//! function_registry` (a `lazy_static` `HashMap<&str, FunctionMapping>`) and
//! `procedures::ProcedureRegistry` (`HashMap<String, Arc<dyn Fn...>>`) —
//! here the map stores metadata-carrying entries rather than SQL name
//! translations, since this registry *executes* functions rather than
//! rewriting their call sites.

pub mod aggregate;
pub mod provider;
pub mod scalar;

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::value::Value;

pub use aggregate::Reducer;
pub use provider::{DataProvider, ProviderFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    Provider,
}

pub type ScalarFn = Arc<dyn Fn(&[Value]) -> EngineResult<Value> + Send + Sync>;
pub type ReducerFactory = Arc<dyn Fn() -> Box<dyn Reducer> + Send + Sync>;

/// Introspection metadata exposed via `functions()`/`schema()` (§4.4,
/// §6 "Introspection").
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: Vec<String>,
    pub output: String,
}

pub enum FunctionImpl {
    Scalar { min_args: usize, max_args: Option<usize>, f: ScalarFn },
    Aggregate { factory: ReducerFactory, supports_distinct: bool },
    Provider(ProviderFn),
}

pub struct FunctionEntry {
    pub meta: FunctionMeta,
    pub imp: FunctionImpl,
}

/// Process-wide registry. Plugin registrations override built-ins of the
/// same (lowercased) name (§4.4 "Name resolution").
#[derive(Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry::new();
        scalar::register_builtins(&mut registry);
        aggregate::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, entry: FunctionEntry) {
        log::debug!("registering function {}", entry.meta.name);
        self.entries.insert(entry.meta.name.to_lowercase(), entry);
    }

    pub fn register_scalar(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
        min_args: usize,
        max_args: Option<usize>,
        f: impl Fn(&[Value]) -> EngineResult<Value> + Send + Sync + 'static,
    ) {
        self.register(FunctionEntry {
            meta: FunctionMeta {
                name: name.to_string(),
                description: description.to_string(),
                category: category.to_string(),
                parameters: Vec::new(),
                output: "any".to_string(),
            },
            imp: FunctionImpl::Scalar { min_args, max_args, f: Arc::new(f) },
        });
    }

    pub fn register_aggregate(
        &mut self,
        name: &str,
        description: &str,
        supports_distinct: bool,
        factory: impl Fn() -> Box<dyn Reducer> + Send + Sync + 'static,
    ) {
        self.register(FunctionEntry {
            meta: FunctionMeta {
                name: name.to_string(),
                description: description.to_string(),
                category: "aggregate".to_string(),
                parameters: Vec::new(),
                output: "any".to_string(),
            },
            imp: FunctionImpl::Aggregate { factory: Arc::new(factory), supports_distinct },
        });
    }

    pub fn register_provider(&mut self, name: &str, description: &str, provider: ProviderFn) {
        self.register(FunctionEntry {
            meta: FunctionMeta {
                name: name.to_string(),
                description: description.to_string(),
                category: "provider".to_string(),
                parameters: Vec::new(),
                output: "stream".to_string(),
            },
            imp: FunctionImpl::Provider(provider),
        });
    }

    pub fn kind_of(&self, name: &str) -> Option<FunctionKind> {
        self.entries.get(&name.to_lowercase()).map(|e| match e.imp {
            FunctionImpl::Scalar { .. } => FunctionKind::Scalar,
            FunctionImpl::Aggregate { .. } => FunctionKind::Aggregate,
            FunctionImpl::Provider(_) => FunctionKind::Provider,
        })
    }

    pub fn call_scalar(&self, name: &str, args: &[Value]) -> EngineResult<Value> {
        let entry = self
            .entries
            .get(&name.to_lowercase())
            .ok_or_else(|| EngineError::semantic(format!("Unknown function: {}", name)))?;
        match &entry.imp {
            FunctionImpl::Scalar { min_args, max_args, f } => {
                if args.len() < *min_args || max_args.is_some_and(|max| args.len() > max) {
                    return Err(EngineError::semantic(format!(
                        "Function {} expected {} parameters, but got {}",
                        name,
                        min_args,
                        args.len()
                    )));
                }
                f(args)
            }
            _ => Err(EngineError::semantic(format!("{} is not a scalar function", name))),
        }
    }

    pub fn make_reducer(&self, name: &str, distinct: bool) -> EngineResult<Box<dyn Reducer>> {
        let entry = self
            .entries
            .get(&name.to_lowercase())
            .ok_or_else(|| EngineError::semantic(format!("Unknown function: {}", name)))?;
        match &entry.imp {
            FunctionImpl::Aggregate { factory, supports_distinct } => {
                if distinct && !supports_distinct {
                    return Err(EngineError::semantic(format!(
                        "DISTINCT is not supported for function {}",
                        name
                    )));
                }
                let reducer = factory();
                Ok(if distinct {
                    Box::new(aggregate::DistinctReducer::new(reducer))
                } else {
                    reducer
                })
            }
            _ => Err(EngineError::semantic(format!("{} is not an aggregate function", name))),
        }
    }

    pub fn call_aggregate_standalone(&self, name: &str, args: &[Value], distinct: bool) -> EngineResult<Value> {
        let mut reducer = self.make_reducer(name, distinct)?;
        for arg in args {
            reducer.reduce(arg)?;
        }
        Ok(reducer.finish())
    }

    pub fn get_provider(&self, name: &str) -> EngineResult<ProviderFn> {
        let entry = self
            .entries
            .get(&name.to_lowercase())
            .ok_or_else(|| EngineError::runtime(format!("Async provider not registered: {}", name)))?;
        match &entry.imp {
            FunctionImpl::Provider(p) => Ok(p.clone()),
            _ => Err(EngineError::runtime(format!("{} is not an async provider", name))),
        }
    }

    /// `functions([category])` introspection (§6).
    pub fn list_metadata(&self, category: Option<&str>) -> Vec<FunctionMeta> {
        let mut metas: Vec<_> = self
            .entries
            .values()
            .filter(|e| category.is_none_or(|c| e.meta.category.eq_ignore_ascii_case(c)))
            .map(|e| e.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        metas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_is_semantic_error() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.call_scalar("nope", &[]).is_err());
    }

    #[test]
    fn builtin_lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.kind_of("SIZE"), Some(FunctionKind::Scalar));
        assert_eq!(registry.kind_of("size"), Some(FunctionKind::Scalar));
    }

    #[test]
    fn plugin_registration_overrides_builtin() {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register_scalar("size", "custom", "overridden", 0, None, |_| Ok(Value::Integer(42)));
        assert_eq!(
            registry.call_scalar("size", &[Value::Array(vec![])]).unwrap(),
            Value::Integer(42)
        );
    }
}
