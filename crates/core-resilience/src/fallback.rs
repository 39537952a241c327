//! Named fallbacks for operations whose primary path is unavailable

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use vigil_observability::{names, MetricsCollector};

type FallbackFn<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Registry of alternate implementations, keyed by operation name.
///
/// `A` is the argument handed to a fallback, `T` the value it produces in
/// place of the primary.
///
/// # Example
/// ```no_run
/// use vigil_core_resilience::{FallbackHandler, ResilienceError};
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let fallbacks: FallbackHandler<String, Vec<String>> = FallbackHandler::new();
/// fallbacks.register("get_hosts", |group: String| async move {
///     Ok(vec![format!("{group}-cached")])
/// });
///
/// let hosts = fallbacks
///     .run("get_hosts", "web".to_string(), || async {
///         Err(ResilienceError::transient("API unavailable"))
///     })
///     .await?;
/// assert_eq!(hosts, vec!["web-cached"]);
/// # Ok(())
/// # }
/// ```
pub struct FallbackHandler<A, T> {
    fallbacks: RwLock<HashMap<String, FallbackFn<A, T>>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<A, T> fmt::Debug for FallbackHandler<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackHandler")
            .field("registered", &self.names())
            .finish()
    }
}

impl<A, T> Default for FallbackHandler<A, T> {
    fn default() -> Self {
        Self {
            fallbacks: RwLock::new(HashMap::new()),
            metrics: vigil_observability::noop(),
        }
    }
}

impl<A, T> FallbackHandler<A, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register (or replace) the fallback for `name`
    pub fn register<F, Fut>(&self, name: impl Into<String>, fallback: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let wrapped: FallbackFn<A, T> = Arc::new(move |args| fallback(args).boxed());
        self.fallbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.into(), wrapped);
    }

    /// Remove the fallback for `name`, returning whether one existed
    pub fn unregister(&self, name: &str) -> bool {
        self.fallbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn has_fallback(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Registered operation names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fallbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run `primary`; if it fails, run the fallback registered under `name`
    /// with `args`.
    ///
    /// Without a registered fallback the primary's error is returned. If the
    /// fallback itself fails, its error is returned.
    pub async fn run<F, Fut>(&self, name: &str, args: A, primary: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let error = match primary().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(fallback) = self.lookup(name) else {
            tracing::debug!(operation = name, error = %error, "No fallback registered");
            return Err(error);
        };

        tracing::warn!(operation = name, error = %error, "Primary failed, using fallback");
        match fallback(args).await {
            Ok(value) => {
                self.metrics.incr_counter(
                    names::FALLBACK_INVOCATIONS,
                    &[("operation", name), ("result", "success")],
                    1,
                );
                Ok(value)
            }
            Err(fallback_error) => {
                tracing::error!(
                    operation = name,
                    primary_error = %error,
                    error = %fallback_error,
                    "Fallback failed"
                );
                self.metrics.incr_counter(
                    names::FALLBACK_INVOCATIONS,
                    &[("operation", name), ("result", "failure")],
                    1,
                );
                Err(fallback_error)
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<FallbackFn<A, T>> {
        self.fallbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vigil_observability::InMemoryCollector;

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let handler: FallbackHandler<(), u32> = FallbackHandler::new();
        let used = Arc::new(AtomicBool::new(false));
        let flag = used.clone();
        handler.register("op", move |_| {
            flag.store(true, Ordering::SeqCst);
            async { Ok(0) }
        });

        let value = handler.run("op", (), || async { Ok(7) }).await;

        assert_eq!(value, Ok(7));
        assert!(!used.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fallback_receives_args() {
        let handler: FallbackHandler<u32, u32> = FallbackHandler::new();
        handler.register("double", |n| async move { Ok(n * 2) });

        let value = tokio_test::assert_ok!(
            handler
                .run("double", 21, || async { Err(ResilienceError::transient("down")) })
                .await
        );

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_without_fallback_original_error_propagates() {
        let handler: FallbackHandler<(), u32> = FallbackHandler::new();

        let value = handler
            .run("missing", (), || async {
                Err(ResilienceError::permanent("original"))
            })
            .await;

        assert_eq!(value, Err(ResilienceError::permanent("original")));
    }

    #[tokio::test]
    async fn test_fallback_failure_propagates_fallback_error() {
        let metrics = Arc::new(InMemoryCollector::new());
        let handler: FallbackHandler<(), u32> =
            FallbackHandler::new().with_metrics(metrics.clone());
        handler.register("op", |_| async {
            Err(ResilienceError::permanent("fallback broke"))
        });

        let value = handler
            .run("op", (), || async { Err(ResilienceError::transient("primary")) })
            .await;

        assert_eq!(value, Err(ResilienceError::permanent("fallback broke")));
        assert_eq!(
            metrics.counter(
                names::FALLBACK_INVOCATIONS,
                &[("operation", "op"), ("result", "failure")]
            ),
            1
        );
    }

    #[test]
    fn test_register_and_unregister() {
        let handler: FallbackHandler<(), ()> = FallbackHandler::new();
        handler.register("b", |_| async { Ok(()) });
        handler.register("a", |_| async { Ok(()) });

        assert_eq!(handler.names(), vec!["a", "b"]);
        assert!(handler.unregister("a"));
        assert!(!handler.unregister("a"));
        assert!(!handler.has_fallback("a"));
        assert!(handler.has_fallback("b"));
    }
}
