//! Async data provider variant (§4.4): "produces a lazy stream of values via
//! an async iterator; usable as the source in `LOAD JSON FROM fn(...) AS x`
//! or `CALL fn() YIELD …`." The only two operations allowed to suspend (§5)
//! drive this stream with `StreamExt::next().await`.

use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::errors::EngineResult;
use crate::value::Value;

pub type ProviderStream = BoxStream<'static, EngineResult<Value>>;

#[async_trait::async_trait]
pub trait DataProvider: Send + Sync {
    async fn stream(&self, args: Vec<Value>) -> EngineResult<ProviderStream>;
}

pub type ProviderFn = Arc<dyn DataProvider>;

/// Adapts a provider that resolves eagerly to a `Vec<Value>` into the
/// streaming interface; convenient for host applications and tests that
/// don't need incremental delivery.
pub struct EagerProvider<F> {
    pub f: F,
}

#[async_trait::async_trait]
impl<F> DataProvider for EagerProvider<F>
where
    F: Fn(Vec<Value>) -> futures_util::future::BoxFuture<'static, EngineResult<Vec<Value>>> + Send + Sync,
{
    async fn stream(&self, args: Vec<Value>) -> EngineResult<ProviderStream> {
        let items = (self.f)(args).await?;
        Ok(Box::pin(futures_util::stream::iter(items.into_iter().map(Ok))))
    }
}
