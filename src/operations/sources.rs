//! §4.5 fan-out sources: `Unwind`, `Load`, `Call`. Each binds zero-or-more
//! values into the ambient scope and calls `next.run()` once per value,
//! checking `Flow` after every call so a downstream `LIMIT` stops the loop
//! early rather than draining the whole source.

use async_trait::async_trait;

use crate::ast::AstNode;
use crate::errors::{EngineError, EngineResult};
use crate::function_registry::FunctionKind;
use crate::http::{FetchRequest, FetchResponse};
use crate::parser::LoadFormat;
use crate::value::Value;

use super::{Env, Flow, Operation, Row};

pub struct Unwind {
    pub(super) expr: AstNode,
    pub(super) alias: String,
    pub(super) next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for Unwind {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let ctx = env.eval_ctx();
        let value = self.expr.eval(&ctx)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Path(items) => items,
            other => {
                return Err(EngineError::runtime(format!(
                    "UNWIND expects an array, got {}",
                    other.type_name()
                )))
            }
        };
        for item in items {
            env.scope.bind(&self.alias, item);
            if self.next.run(env).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

pub struct Load {
    pub(super) format: LoadFormat,
    pub(super) source: AstNode,
    pub(super) headers: Option<AstNode>,
    pub(super) post_body: Option<AstNode>,
    pub(super) alias: String,
    pub(super) next: Box<dyn Operation>,
}

#[async_trait(?Send)]
impl Operation for Load {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        self.next.initialize(env).await
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let records = self.fetch_records(env).await?;
        for record in records {
            env.scope.bind(&self.alias, record);
            if self.next.run(env).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        self.next.finish(env).await
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        self.next.results()
    }
}

impl Load {
    /// `LOAD JSON|TEXT|CSV FROM fn(...)` reads from a registered async
    /// provider instead of the HTTP boundary, exactly like `CALL` (§4.4
    /// "usable as the source in `LOAD JSON FROM fn(...) AS x`").
    async fn fetch_records(&self, env: &Env<'_>) -> EngineResult<Vec<Value>> {
        if let AstNode::FunctionCall(fc) = &self.source {
            if env.registry.kind_of(&fc.name) == Some(FunctionKind::Provider) {
                return drain_provider(&fc.name, &fc.args, env).await;
            }
        }

        let ctx = env.eval_ctx();
        let url = self
            .source
            .eval(&ctx)?
            .as_str()
            .ok_or_else(|| EngineError::runtime("LOAD FROM expects a URL string or provider call"))?
            .to_string();

        let mut request = match &self.post_body {
            Some(body_expr) => {
                let body = body_expr.eval(&ctx)?;
                FetchRequest::post(url.clone(), serde_json::to_string(&serde_json::Value::from(body)).unwrap_or_default())
            }
            None => FetchRequest::get(url.clone()),
        };
        if let Some(headers_expr) = &self.headers {
            let headers_value = headers_expr.eval(&ctx)?;
            if let Value::Map(map) = headers_value {
                let headers = map
                    .into_iter()
                    .map(|(k, v)| (k, v.to_string()))
                    .collect();
                request = request.with_headers(headers);
            }
        }

        let response = env
            .fetcher
            .fetch(request)
            .await
            .map_err(|e| EngineError::runtime(format!("Failed to load data from {}. Error: {}", url, e)))?;
        parse_response(self.format, response)
    }
}

fn parse_response(format: LoadFormat, response: FetchResponse) -> EngineResult<Vec<Value>> {
    match format {
        LoadFormat::Json => {
            let json: serde_json::Value = serde_json::from_str(&response.body)
                .map_err(|e| EngineError::runtime(format!("invalid JSON response: {}", e)))?;
            match json {
                serde_json::Value::Array(items) => Ok(items.into_iter().map(Value::from).collect()),
                other => Ok(vec![Value::from(other)]),
            }
        }
        LoadFormat::Text => Ok(vec![Value::String(response.body)]),
        LoadFormat::Csv => {
            let mut reader = csv::Reader::from_reader(response.body.as_bytes());
            let headers = reader
                .headers()
                .map_err(|e| EngineError::runtime(format!("invalid CSV response: {}", e)))?
                .clone();
            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| EngineError::runtime(format!("invalid CSV response: {}", e)))?;
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in headers.iter().zip(record.iter()) {
                    map.insert(key.to_string(), Value::String(value.to_string()));
                }
                rows.push(Value::Map(map));
            }
            Ok(rows)
        }
    }
}

/// Drives a registered provider's stream to completion and collects every
/// yielded value (§5 "`Call` providers' `next()` calls ... may suspend").
pub(super) async fn drain_provider(name: &str, args: &[AstNode], env: &Env<'_>) -> EngineResult<Vec<Value>> {
    use futures_util::StreamExt;

    let ctx = env.eval_ctx();
    let arg_values = args.iter().map(|a| a.eval(&ctx)).collect::<EngineResult<Vec<_>>>()?;
    let provider = env.registry.get_provider(name)?;
    let mut stream = provider.stream(arg_values).await?;
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item?);
    }
    Ok(out)
}

/// `CALL <fn>(args) [YIELD ...]` (§4.5). A terminal call with no YIELD
/// accumulates yielded items verbatim as result rows; with YIELD, or
/// mid-chain, each item is destructured into the named bindings and
/// `next.run()` is called once per item.
pub struct Call {
    name: String,
    args: Vec<AstNode>,
    mode: CallMode,
}

enum CallMode {
    Terminal { rows: Vec<Row> },
    Projecting { yield_fields: Vec<String>, next: Box<dyn Operation> },
}

impl Call {
    pub fn terminal(name: String, args: Vec<AstNode>) -> Self {
        Call { name, args, mode: CallMode::Terminal { rows: Vec::new() } }
    }

    pub fn projecting(name: String, args: Vec<AstNode>, yield_fields: Vec<String>, next: Box<dyn Operation>) -> Self {
        Call { name, args, mode: CallMode::Projecting { yield_fields, next } }
    }
}

#[async_trait(?Send)]
impl Operation for Call {
    async fn initialize(&mut self, env: &Env<'_>) -> EngineResult<()> {
        match &mut self.mode {
            CallMode::Terminal { rows } => rows.clear(),
            CallMode::Projecting { next, .. } => next.initialize(env).await?,
        }
        Ok(())
    }

    async fn run(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        let items = drain_provider(&self.name, &self.args, env).await?;
        match &mut self.mode {
            CallMode::Terminal { rows } => {
                for item in items {
                    let row = match item {
                        Value::Map(map) => map.into_iter().collect(),
                        other => {
                            let mut row = Row::new();
                            row.insert(self.name.clone(), other);
                            row
                        }
                    };
                    rows.push(row);
                }
                Ok(Flow::Continue)
            }
            CallMode::Projecting { yield_fields, next } => {
                for item in items {
                    for field in yield_fields.iter() {
                        env.scope.bind(field, item.get_property(field));
                    }
                    if next.run(env).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    async fn finish(&mut self, env: &Env<'_>) -> EngineResult<Flow> {
        match &mut self.mode {
            CallMode::Terminal { .. } => Ok(Flow::Continue),
            CallMode::Projecting { next, .. } => next.finish(env).await,
        }
    }

    fn results(&mut self) -> Option<Vec<Row>> {
        match &mut self.mode {
            CallMode::Terminal { rows } => Some(std::mem::take(rows)),
            CallMode::Projecting { next, .. } => next.results(),
        }
    }
}
