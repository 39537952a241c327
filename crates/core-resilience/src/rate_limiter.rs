//! Rate limiting for preventing service overload
//!
//! Enforces a minimum interval between successive dispatches. The limiter
//! is shared (it is cheap to clone) and every clone draws from the same
//! schedule, so it bounds the combined rate of all workers holding it.

use crate::error::{ResilienceError, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

/// Minimum-interval rate limiter
///
/// # Example
/// ```no_run
/// use vigil_core_resilience::{RateLimiter, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     // At most 10 dispatches per second
///     let limiter = RateLimiter::per_second(10.0)?;
///
///     limiter.execute(|| async {
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Minimum time between two dispatches
    interval: Duration,
    /// Time slot reserved by the most recent dispatch
    last_dispatch: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter enforcing `interval` between dispatches
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a rate limiter with dispatches per second
    pub fn per_second(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "rate limit must be a positive number, got {rate}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / rate).map_err(|_| {
            ResilienceError::InvalidConfig(format!(
                "rate limit {rate} gives an interval too long to represent"
            ))
        })?;
        Ok(Self::new(interval))
    }

    /// Create a rate limiter with dispatches per minute
    pub fn per_minute(rate: f64) -> Result<Self> {
        Self::per_second(rate / 60.0)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until this caller may dispatch.
    ///
    /// The slot is reserved under the lock and the wait happens outside it,
    /// so concurrent callers queue up at consecutive intervals.
    pub async fn acquire(&self) {
        let slot = {
            let mut last = self
                .last_dispatch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            let slot = match *last {
                Some(previous) => previous.checked_add(self.interval).map(|next| next.max(now)),
                None => Some(now),
            };
            if let Some(slot) = slot {
                *last = Some(slot);
            }
            slot
        };

        let Some(slot) = slot else {
            // Next slot lies beyond the clock's range
            sleep(self.interval).await;
            return;
        };
        if slot > Instant::now() {
            tracing::trace!(
                wait_ms = slot.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limited, waiting for slot"
            );
            sleep_until(slot).await;
        }
    }

    /// Execute an operation with rate limiting
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire().await;
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::per_second(4.0).unwrap();
        assert_eq!(limiter.interval(), Duration::from_millis(250));

        let limiter = RateLimiter::per_minute(120.0).unwrap();
        assert_eq!(limiter.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(RateLimiter::per_second(0.0).is_err());
        assert!(RateLimiter::per_second(-1.0).is_err());
        assert!(RateLimiter::per_second(f64::NAN).is_err());
        assert!(RateLimiter::per_second(1e-30).is_err());
        assert!(RateLimiter::per_second(f64::MIN_POSITIVE).is_err());
        assert!(RateLimiter::per_minute(1e-30).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_slot_waits_without_panicking() {
        let limiter = RateLimiter::new(Duration::MAX);
        limiter.acquire().await;

        let second = tokio::time::timeout(Duration::from_secs(3600), limiter.acquire()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_are_spaced() {
        let limiter = RateLimiter::per_second(10.0).unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        // First dispatch is immediate, then four 100ms gaps
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_schedule() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }
        waits.sort();

        assert_eq!(
            waits,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let start = Instant::now();
        let value = limiter.execute(|| async { Ok(1) }).await;
        assert_eq!(value, Ok(1));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
