/*!
 * Resilient client: one place that owns the cache, the breakers, the retry
 * policy, the fallbacks, the batch processor and the paginator of a service
 */

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::VigilConfig;
use crate::error::Result;
use vigil_core_batch::{
    BatchOptions, BatchProcessor, BatchResult, Page, StreamBatch, StreamPaginator,
};
use vigil_core_cache::{CacheStats, LruCache};
use vigil_core_resilience::{
    CircuitBreakerRegistry, CircuitBreakerStats, FallbackHandler, ResilienceError,
    ResilientExecutor,
};
use vigil_observability::{MetricsCollector, PrometheusCollector};

/// Build the cache key for `key` under `operation`
///
/// Keys are namespaced by operation so that `invalidate_cache("get_hosts:*")`
/// drops every cached response of one operation.
pub fn cache_key(operation: &str, key: &str) -> String {
    format!("{operation}:{key}")
}

/// Composition of every resilience component behind one service-facing API
///
/// Responses are cached as JSON values, so anything `Serialize +
/// DeserializeOwned` can go through [`cached_call`](Self::cached_call).
///
/// # Example
/// ```no_run
/// use vigil::{ResilientClient, VigilConfig};
/// use vigil_core_resilience::ResilienceError;
///
/// # async fn example() -> vigil::Result<()> {
/// let client = ResilientClient::new(&VigilConfig::default())?;
///
/// let hosts: Vec<String> = client
///     .cached_call("get_hosts", "group=web", None, || async {
///         Ok::<_, ResilienceError>(vec!["web-01".to_string()])
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ResilientClient {
    cache: Arc<LruCache<String, Value>>,
    executor: ResilientExecutor,
    fallbacks: FallbackHandler<Value, Value>,
    batch: BatchProcessor,
    paginator: StreamPaginator,
    metrics: Arc<dyn MetricsCollector>,
    prometheus: Option<Arc<PrometheusCollector>>,
    cleanup_interval: Option<Duration>,
    shutdown: CancellationToken,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("cache", &self.cache)
            .field("executor", &self.executor)
            .field("fallbacks", &self.fallbacks)
            .field("batch", &self.batch.config())
            .field("paginator", &self.paginator.config())
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl ResilientClient {
    /// Create a client without metrics
    pub fn new(config: &VigilConfig) -> Result<Self> {
        Self::build(config, vigil_observability::noop(), None)
    }

    /// Create a client reporting into its own Prometheus registry
    pub fn with_prometheus(config: &VigilConfig) -> Result<Self> {
        let prometheus = Arc::new(PrometheusCollector::new());
        Self::build(config, prometheus.clone(), Some(prometheus))
    }

    /// Create a client reporting into an arbitrary collector
    pub fn with_collector(config: &VigilConfig, metrics: Arc<dyn MetricsCollector>) -> Result<Self> {
        Self::build(config, metrics, None)
    }

    fn build(
        config: &VigilConfig,
        metrics: Arc<dyn MetricsCollector>,
        prometheus: Option<Arc<PrometheusCollector>>,
    ) -> Result<Self> {
        config.validate()?;

        let cache =
            LruCache::new(config.cache.to_cache_config()?)?.with_metrics(metrics.clone());
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.to_breaker_config()?)
            .with_metrics(metrics.clone());
        let retry = config
            .retry
            .to_retry_policy()?
            .with_metrics(metrics.clone());
        let batch =
            BatchProcessor::new(config.batch.to_batch_config()?)?.with_metrics(metrics.clone());
        let paginator = StreamPaginator::new(config.pagination.to_paginator_config()?)?
            .with_metrics(metrics.clone());

        tracing::debug!(
            cache = %config.cache.name,
            capacity = config.cache.capacity,
            max_concurrent = config.batch.max_concurrent,
            "Resilient client ready"
        );

        Ok(Self {
            cache: Arc::new(cache),
            executor: ResilientExecutor::new(breakers, retry),
            fallbacks: FallbackHandler::new().with_metrics(metrics.clone()),
            batch,
            paginator,
            metrics,
            prometheus,
            cleanup_interval: config.cache.cleanup_interval()?,
            shutdown: CancellationToken::new(),
        })
    }

    /// Return the cached response for (`operation`, `key`), or run `op`
    /// under the operation's breaker and retry policy and cache the result.
    ///
    /// `ttl` of `None` uses the cache's default TTL. Failures are not cached.
    pub async fn cached_call<T, F, Fut>(
        &self,
        operation: &str,
        key: &str,
        ttl: Option<Duration>,
        op: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        let value = self
            .cache
            .get_or_fetch(cache_key(operation, key), ttl, || async move {
                let fresh = self.executor.execute(operation, op).await?;
                Ok::<_, crate::error::VigilError>(serde_json::to_value(fresh)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run `op` under the operation's breaker and retry policy
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        Ok(self.executor.execute(operation, op).await?)
    }

    /// Register (or replace) the fallback used by
    /// [`call_with_fallback`](Self::call_with_fallback) for `operation`
    pub fn register_fallback<F, Fut>(&self, operation: impl Into<String>, fallback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ResilienceError>> + Send + 'static,
    {
        self.fallbacks.register(operation, fallback);
    }

    /// Like [`call`](Self::call), handing `args` to the registered fallback
    /// once the retried call fails
    pub async fn call_with_fallback<T, F, Fut>(
        &self,
        operation: &str,
        args: Value,
        mut op: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ResilienceError>>,
    {
        let value = self
            .executor
            .execute_with_fallback(
                operation,
                || {
                    let attempt = op();
                    async move {
                        let output = attempt.await?;
                        serde_json::to_value(output)
                            .map_err(|e| ResilienceError::permanent(e.to_string()))
                    }
                },
                &self.fallbacks,
                args,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Run `operation` over `inputs` with the configured batch settings
    pub async fn run_batch<In, Out, E, F, Fut>(
        &self,
        inputs: Vec<In>,
        operation: F,
        options: BatchOptions<In>,
    ) -> Result<BatchResult<In, Out>>
    where
        In: Clone + Send + Sync + 'static,
        Out: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Out, E>> + Send + 'static,
    {
        Ok(self.batch.process(inputs, operation, options).await?)
    }

    /// Like [`run_batch`](Self::run_batch), sending every attempt through
    /// the breaker for `operation_name`
    ///
    /// Once the breaker opens, the remaining attempts are rejected without
    /// reaching the remote API and their items fail with the rejection.
    pub async fn run_guarded_batch<In, Out, F, Fut>(
        &self,
        operation_name: &str,
        inputs: Vec<In>,
        operation: F,
        options: BatchOptions<In>,
    ) -> Result<BatchResult<In, Out>>
    where
        In: Clone + Send + Sync + 'static,
        Out: Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Out, ResilienceError>> + Send + 'static,
    {
        let breaker = self.executor.breakers().get(operation_name);
        let guarded = move |input: In| {
            let breaker = breaker.clone();
            let attempt = operation(input);
            async move { breaker.call(move || attempt).await }
        };
        Ok(self.batch.process(inputs, guarded, options).await?)
    }

    /// Lazily walk a paginated result set with the configured page size
    pub fn stream_pages<T, E, F, Fut>(&self, fetch: F) -> impl Stream<Item = StreamBatch<T>>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, E>>,
        E: fmt::Display,
    {
        self.paginator.stream(fetch)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response; statistics are kept
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop cached responses whose key matches a `*` wildcard pattern
    pub fn invalidate_cache(&self, pattern: &str) -> Result<usize> {
        Ok(self.cache.invalidate_pattern(pattern)?)
    }

    /// Snapshot of every breaker created so far, sorted by name
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.executor.breakers().stats()
    }

    /// Close every breaker and clear its counters
    pub fn reset_breakers(&self) {
        self.executor.breakers().reset_all();
    }

    /// Prometheus text exposition of all metrics
    ///
    /// Empty unless the client was built with
    /// [`with_prometheus`](Self::with_prometheus).
    pub fn metrics_text(&self) -> Result<String> {
        match &self.prometheus {
            Some(prometheus) => Ok(prometheus.gather_text()?),
            None => Ok(String::new()),
        }
    }

    /// Start the background sweep of expired cache entries, if an interval
    /// is configured. The sweep stops on [`shutdown`](Self::shutdown) or
    /// when the client is dropped.
    pub fn spawn_cache_janitor(&self) -> Option<JoinHandle<()>> {
        let interval = self.cleanup_interval?;
        Some(
            self.cache
                .spawn_janitor(interval, self.shutdown.child_token()),
        )
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn cache(&self) -> &LruCache<String, Value> {
        &self.cache
    }

    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn fallbacks(&self) -> &FallbackHandler<Value, Value> {
        &self.fallbacks
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }
}

impl Drop for ResilientClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
