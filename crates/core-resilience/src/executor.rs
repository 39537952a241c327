//! Explicit composition of breaker, retry and fallback around one call
//!
//! The layering is fixed: the breaker guards each individual attempt, the
//! retry policy drives attempts, and the fallback (when used) wraps the
//! whole retried call:
//!
//! ```text
//! fallback( retry( breaker( op ) ) )
//! ```
//!
//! An open circuit is not retryable, so once the breaker opens the retry
//! loop stops and the fallback takes over.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::Result;
use crate::fallback::FallbackHandler;
use crate::retry::RetryPolicy;
use std::future::Future;

/// Breaker registry plus retry policy, applied per named operation
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    breakers: CircuitBreakerRegistry,
    retry: RetryPolicy,
}

impl Default for ResilientExecutor {
    fn default() -> Self {
        Self::new(
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
            RetryPolicy::default(),
        )
    }
}

impl ResilientExecutor {
    pub fn new(breakers: CircuitBreakerRegistry, retry: RetryPolicy) -> Self {
        Self { breakers, retry }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` under the breaker for `name`, retrying transient failures
    pub async fn execute<F, Fut, T>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breakers.get(name);
        self.retry
            .execute(name, || {
                let breaker = breaker.clone();
                let attempt = op();
                async move { breaker.call(move || attempt).await }
            })
            .await
    }

    /// Like [`execute`](Self::execute), falling back to the handler's
    /// registered alternative for `name` once the retried call fails
    pub async fn execute_with_fallback<F, Fut, A, T>(
        &self,
        name: &str,
        op: F,
        fallbacks: &FallbackHandler<A, T>,
        args: A,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        fallbacks
            .run(name, args, || self.execute(name, op))
            .await
    }
}
