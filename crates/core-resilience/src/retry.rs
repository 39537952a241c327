//! Retry with configurable backoff
//!
//! A [`RetryPolicy`] computes the delay before each retry and drives repeated
//! attempts of a single operation. Attempt 1 runs immediately; each retryable
//! failure is followed by a sleep and another attempt, up to `max_retries`
//! additional attempts. A non-retryable failure is returned at once, and
//! exhausting all attempts returns the last failure unchanged.
//!
//! # Examples
//!
//! ```no_run
//! use vigil_core_resilience::{BackoffStrategy, ResilienceError, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let policy = RetryPolicy::new(BackoffStrategy::Exponential)
//!     .with_max_retries(5)
//!     .with_base_delay(Duration::from_millis(100))
//!     .with_max_delay(Duration::from_secs(10));
//!
//! let hosts = policy
//!     .execute("get_hosts", || async { Ok::<_, ResilienceError>(vec!["web-01"]) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ResilienceError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use vigil_observability::{names, MetricsCollector};

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,

    /// Delay grows linearly with the attempt number
    Linear,

    /// Delay doubles with every attempt (2^n)
    #[default]
    Exponential,

    /// Exponential delay scaled by a random factor in [0.5, 1.0]
    JitteredExponential,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Delay unit the strategy scales
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    pub strategy: BackoffStrategy,

    /// Apply ±10% jitter (ignored by `JitteredExponential`, which has its own)
    pub jitter: bool,

    metrics: Arc<dyn MetricsCollector>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            metrics: vigil_observability::noop(),
        }
    }
}

impl RetryPolicy {
    /// Default policy using the given strategy
    pub fn new(strategy: BackoffStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Create a policy for fast retries (good for rate limiting)
    pub fn fast() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            strategy: BackoffStrategy::Linear,
            ..Default::default()
        }
    }

    /// Create a policy for slow/expensive operations
    pub fn slow() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            strategy: BackoffStrategy::Exponential,
            ..Default::default()
        }
    }

    /// Create a policy for network-flaky scenarios
    pub fn network() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::JitteredExponential,
            ..Default::default()
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delay < self.base_delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "max_delay ({:?}) is shorter than base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        Ok(())
    }

    /// Calculate the delay to sleep before retry number `attempt` (1-indexed)
    ///
    /// The result never exceeds `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();

        let mut delay = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * f64::from(attempt),
            BackoffStrategy::Exponential | BackoffStrategy::JitteredExponential => {
                let exponent = (attempt - 1).min(1023) as i32;
                base * 2f64.powi(exponent)
            }
        };

        if self.strategy == BackoffStrategy::JitteredExponential {
            delay *= rand::rng().random_range(0.5..=1.0);
        } else if self.jitter {
            delay *= rand::rng().random_range(0.9..=1.1);
        }

        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
        } else {
            Duration::ZERO
        }
    }

    /// Run `op`, retrying transient failures (see [`ResilienceError::is_transient`])
    pub async fn execute<F, Fut, T>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_if(operation, ResilienceError::is_transient, op)
            .await
    }

    /// Run `op`, retrying the failures for which `retryable` returns true
    pub async fn execute_if<F, Fut, T, P>(
        &self,
        operation: &str,
        retryable: P,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&ResilienceError) -> bool,
    {
        let mut retries = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        tracing::debug!(operation, retries, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => {
                    tracing::debug!(operation, error = %e, "Failure is not retryable");
                    return Err(e);
                }
                Err(e) if retries >= self.max_retries => {
                    tracing::warn!(
                        operation,
                        attempts = retries + 1,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    retries += 1;
                    let delay = self.calculate_delay(retries);
                    tracing::warn!(
                        operation,
                        attempt = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    self.metrics
                        .incr_counter(names::RETRY_ATTEMPTS, &[("operation", operation)], 1);
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_observability::InMemoryCollector;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy::new(strategy)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(false)
    }

    #[test]
    fn test_fixed_and_linear_delays() {
        let fixed = policy(BackoffStrategy::Fixed);
        assert_eq!(fixed.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(fixed.calculate_delay(4), Duration::from_secs(1));

        let linear = policy(BackoffStrategy::Linear);
        assert_eq!(linear.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(linear.calculate_delay(3), Duration::from_secs(3));
        assert_eq!(linear.calculate_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let exp = policy(BackoffStrategy::Exponential);
        let delays: Vec<u64> = (1..=6).map(|a| exp.calculate_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);

        // Huge attempt numbers must not overflow
        assert_eq!(exp.calculate_delay(u32::MAX), Duration::from_secs(10));

        // Nor may a cap beyond what a float round-trips to
        let unbounded = exp.with_max_delay(Duration::MAX);
        assert_eq!(unbounded.calculate_delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_jittered_exponential_range() {
        let policy = policy(BackoffStrategy::JitteredExponential).with_max_delay(Duration::from_secs(1000));
        for attempt in 1..=5 {
            let exp = 2f64.powi(attempt as i32 - 1);
            for _ in 0..50 {
                let delay = policy.calculate_delay(attempt).as_secs_f64();
                assert!(delay >= 0.5 * exp - 1e-9, "{delay} below range for {attempt}");
                assert!(delay <= exp + 1e-9, "{delay} above range for {attempt}");
            }
        }
    }

    #[test]
    fn test_plain_jitter_stays_within_ten_percent_and_cap() {
        let policy = policy(BackoffStrategy::Linear).with_jitter(true);
        for _ in 0..100 {
            let delay = policy.calculate_delay(2).as_secs_f64();
            assert!((1.8 - 1e-9..=2.2 + 1e-9).contains(&delay));
            assert!(policy.calculate_delay(50) <= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(BackoffStrategy::Fixed)
            .execute("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ResilienceError::transient("503"))
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let metrics = Arc::new(InMemoryCollector::new());
        let result: Result<()> = policy(BackoffStrategy::Fixed)
            .with_max_retries(2)
            .with_metrics(metrics.clone())
            .execute("down", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::transient(format!("failure {n}")))
            })
            .await;

        assert_eq!(result, Err(ResilienceError::transient("failure 2")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            metrics.counter(names::RETRY_ATTEMPTS, &[("operation", "down")]),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(BackoffStrategy::Fixed)
            .execute("bad", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::permanent("400"))
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _: Result<()> = policy(BackoffStrategy::Exponential)
            .with_max_retries(3)
            .execute("timed", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::Timeout(Duration::from_secs(1)))
            })
            .await;

        // 1 + 2 + 4 seconds of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_if_custom_predicate() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(BackoffStrategy::Fixed)
            .with_max_retries(1)
            .execute_if(
                "custom",
                |e| matches!(e, ResilienceError::Permanent(m) if m == "retry me"),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::permanent("retry me"))
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_presets_are_valid() {
        for policy in [
            RetryPolicy::default(),
            RetryPolicy::fast(),
            RetryPolicy::slow(),
            RetryPolicy::network(),
            RetryPolicy::no_retry(),
        ] {
            assert!(policy.validate().is_ok());
        }

        let inverted = RetryPolicy::default().with_max_delay(Duration::from_millis(1));
        assert!(inverted.validate().is_err());
    }
}
