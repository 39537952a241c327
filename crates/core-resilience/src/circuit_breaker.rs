//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! dependency is experiencing issues. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Dependency is presumed unhealthy, calls are rejected immediately
//! - HalfOpen: Exactly one probe call is let through to test recovery
//!
//! State lives behind a synchronous lock that is never held across an
//! `.await`, so a rejection in the Open state never suspends the caller.

use crate::error::{ResilienceError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use vigil_observability::{names, MetricsCollector};

/// Decides whether a failure counts against the breaker
pub type FailurePredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// Circuit is half-open, one probe call tests recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive counted failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait in Open before letting a probe through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker, for admin and metrics surfaces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive counted failures since the circuit last closed
    pub failure_count: u32,
    /// All counted failures ever observed
    pub total_failures: u64,
    /// All successful calls ever observed
    pub success_count: u64,
    /// Calls rejected without being attempted
    pub rejected_count: u64,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Wall-clock time of the most recent counted failure
    pub last_failure_at: Option<SystemTime>,
    /// How long the circuit has been open, if it is open
    pub open_for: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    total_failures: u64,
    success_count: u64,
    rejected_count: u64,
    /// Failure time recorded when the circuit last opened
    opened_at: Option<Instant>,
    last_failure_at: Option<SystemTime>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            total_failures: 0,
            success_count: 0,
            rejected_count: 0,
            opened_at: None,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker for protecting against cascading failures
///
/// Cloning is cheap and clones share state, so one breaker per logical
/// operation can be handed to every caller of that operation.
///
/// # Example
/// ```no_run
/// use vigil_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new("get_hosts", CircuitBreakerConfig::default());
///
///     let hosts = breaker
///         .call(|| async { Ok::<_, ResilienceError>(vec!["web-01"]) })
///         .await?;
///
///     println!("Hosts: {:?}", hosts);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
    is_failure: FailurePredicate,
    metrics: Arc<dyn MetricsCollector>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.lock_state().state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the named operation
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState::new())),
            is_failure: Arc::new(ResilienceError::should_trip_breaker),
            metrics: vigil_observability::noop(),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Replace the predicate deciding which failures count against the circuit
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(predicate);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    /// Get the current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock_state().failure_count
    }

    /// Get the total number of successful calls
    pub fn success_count(&self) -> u64 {
        self.lock_state().success_count
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.lock_state();
        CircuitBreakerStats {
            name: self.name.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            total_failures: state.total_failures,
            success_count: state.success_count,
            rejected_count: state.rejected_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            last_failure_at: state.last_failure_at,
            open_for: match state.state {
                CircuitState::Open => state.opened_at.map(|t| t.elapsed()),
                _ => None,
            },
        }
    }

    /// Reset the circuit breaker to closed state
    ///
    /// Cumulative counters (successes, total failures, rejections) are kept.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        self.transition(&mut state, CircuitState::Closed);
        state.failure_count = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Fails with [`ResilienceError::CircuitOpen`] without invoking `op` when
    /// the circuit is open (or a half-open probe is already in flight).
    /// Failures not matching the failure predicate are returned unchanged
    /// and leave the circuit state alone.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;

        let outcome = op().await;
        match &outcome {
            Ok(_) => self.on_success(admission),
            Err(e) if (self.is_failure)(e) => self.on_failure(admission, e),
            Err(_) => admission.release(),
        }
        outcome
    }

    /// Decide whether a call may proceed, moving Open -> HalfOpen when the
    /// recovery timeout has elapsed
    fn admit(&self) -> Result<Admission<'_>> {
        let mut state = self.lock_state();

        match state.state {
            CircuitState::Closed => Ok(Admission::new(self, false)),
            CircuitState::Open => {
                let recovered = state
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.probe_in_flight = true;
                    Ok(Admission::new(self, true))
                } else {
                    Err(self.reject(&mut state))
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(self.reject(&mut state))
                } else {
                    state.probe_in_flight = true;
                    Ok(Admission::new(self, true))
                }
            }
        }
    }

    fn reject(&self, state: &mut BreakerState) -> ResilienceError {
        state.rejected_count += 1;
        tracing::debug!(breaker = %self.name, state = %state.state, "Rejecting call");
        self.metrics
            .incr_counter(names::CIRCUIT_REJECTIONS, &[("breaker", &self.name)], 1);
        ResilienceError::CircuitOpen {
            name: self.name.to_string(),
        }
    }

    fn on_success(&self, mut admission: Admission<'_>) {
        admission.settled = true;
        let mut state = self.lock_state();
        state.success_count += 1;

        if admission.probe {
            state.probe_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen if admission.probe => {
                self.transition(&mut state, CircuitState::Closed);
                state.failure_count = 0;
                state.opened_at = None;
            }
            // A call admitted before the circuit opened finished late
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, mut admission: Admission<'_>, error: &ResilienceError) {
        admission.settled = true;
        let mut state = self.lock_state();
        state.failure_count = state.failure_count.saturating_add(1);
        state.total_failures += 1;
        state.last_failure_at = Some(SystemTime::now());

        if admission.probe {
            state.probe_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        error = %error,
                        "Failure threshold reached"
                    );
                    state.opened_at = Some(Instant::now());
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, error = %error, "Recovery probe failed");
                state.opened_at = Some(Instant::now());
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;

        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, %from, "Circuit opened")
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, %from, "Circuit half-open, probing")
            }
            CircuitState::Closed => {
                tracing::info!(breaker = %self.name, %from, "Circuit closed")
            }
        }
        self.metrics.incr_counter(
            names::CIRCUIT_TRANSITIONS,
            &[("breaker", &self.name), ("to", to.as_str())],
            1,
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Permission to run one call. A probe admission that is dropped before it
/// is settled (the caller's future was cancelled) frees the probe slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Finish without touching circuit state (uncounted failure)
    fn release(self) {}
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.lock_state().probe_in_flight = false;
        }
    }
}

/// One circuit breaker per logical operation name, created on first use.
///
/// # Example
/// ```
/// use vigil_core_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
///
/// let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
/// let a = registry.get("acknowledge_problem");
/// let b = registry.get("acknowledge_problem");
/// assert_eq!(a.name(), b.name());
/// assert_eq!(registry.stats().len(), 1);
/// ```
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: Arc<Mutex<HashMap<String, CircuitBreakerConfig>>>,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
    is_failure: Option<FailurePredicate>,
    metrics: Arc<dyn MetricsCollector>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .field("breakers", &self.names())
            .finish()
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: Arc::new(Mutex::new(HashMap::new())),
            breakers: Arc::new(Mutex::new(HashMap::new())),
            is_failure: None,
            metrics: vigil_observability::noop(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Failure predicate applied to every breaker created from now on
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Some(Arc::new(predicate));
        self
    }

    /// Use a specific configuration for one operation name.
    ///
    /// Only affects breakers not created yet.
    pub fn configure(&self, name: impl Into<String>, config: CircuitBreakerConfig) {
        lock(&self.overrides).insert(name.into(), config);
    }

    /// Get (or lazily create) the breaker for an operation
    pub fn get(&self, name: &str) -> CircuitBreaker {
        let mut breakers = lock(&self.breakers);
        if let Some(existing) = breakers.get(name) {
            return existing.clone();
        }

        let config = lock(&self.overrides)
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let mut breaker = CircuitBreaker::new(name, config).with_metrics(self.metrics.clone());
        if let Some(predicate) = &self.is_failure {
            breaker.is_failure = predicate.clone();
        }
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Names of all breakers created so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.breakers).keys().cloned().collect();
        names.sort();
        names
    }

    /// Stats of every breaker, sorted by name
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> =
            lock(&self.breakers).values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Close every circuit
    pub fn reset_all(&self) {
        for breaker in lock(&self.breakers).values() {
            breaker.reset();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_observability::InMemoryCollector;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(|| async { Err(ResilienceError::transient("boom")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = breaker(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking() {
        let breaker = breaker(2, Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        let invoked = AtomicUsize::new(0);
        let result: Result<()> = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().rejected_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let breaker = breaker(2, Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = breaker(1, Duration::from_secs(10));
        fail(&breaker).await.ok();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Failure time was re-recorded, so the circuit stays open for a full timeout
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_in_flight() {
        let breaker = breaker(1, Duration::from_secs(1));
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_secs(2)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(|| async move {
                    release_rx.await.ok();
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A second caller is rejected while the probe is running
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));

        release_tx.send(()).ok();
        assert!(probe.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let breaker = breaker(1, Duration::from_secs(1));
        fail(&breaker).await.ok();
        tokio::time::advance(Duration::from_secs(2)).await;

        let pending = breaker.call(|| std::future::pending::<Result<()>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_uncounted_failures_do_not_trip() {
        let breaker = breaker(1, Duration::from_secs(60));
        let result: Result<()> = breaker
            .call(|| async { Err(ResilienceError::permanent("bad request")) })
            .await;

        assert!(matches!(result, Err(ResilienceError::Permanent(_))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_failure_predicate() {
        let breaker = breaker(1, Duration::from_secs(60)).with_failure_predicate(|e| {
            matches!(e, ResilienceError::Permanent(msg) if msg.contains("500"))
        });

        let _: Result<()> = breaker
            .call(|| async { Err(ResilienceError::transient("ignored")) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _: Result<()> = breaker
            .call(|| async { Err(ResilienceError::permanent("HTTP 500")) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.ok();
        fail(&breaker).await.ok();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.success_count(), 1);
        assert_eq!(breaker.stats().total_failures, 3);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = breaker(1, Duration::from_secs(60));
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        tokio_test::assert_ok!(succeed(&breaker).await);
    }

    #[tokio::test]
    async fn test_transitions_are_reported() {
        let metrics = Arc::new(InMemoryCollector::new());
        let breaker = breaker(1, Duration::from_secs(60)).with_metrics(metrics.clone());
        fail(&breaker).await.ok();
        succeed(&breaker).await.ok();

        assert_eq!(
            metrics.counter(
                names::CIRCUIT_TRANSITIONS,
                &[("breaker", "test"), ("to", "open")]
            ),
            1
        );
        assert_eq!(
            metrics.counter(names::CIRCUIT_REJECTIONS, &[("breaker", "test")]),
            1
        );
    }

    #[tokio::test]
    async fn test_registry_shares_state_per_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        registry.configure(
            "tolerant",
            CircuitBreakerConfig {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(60),
            },
        );

        fail(&registry.get("hosts")).await.ok();
        fail(&registry.get("tolerant")).await.ok();

        assert_eq!(registry.get("hosts").state(), CircuitState::Open);
        assert_eq!(registry.get("tolerant").state(), CircuitState::Closed);
        assert_eq!(registry.names(), vec!["hosts", "tolerant"]);

        registry.reset_all();
        assert!(registry
            .stats()
            .iter()
            .all(|s| s.state == CircuitState::Closed));
    }
}
