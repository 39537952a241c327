//! Vigil Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides building blocks for calling a remote, rate-limited and
//! occasionally unreliable API without making things worse for it. It includes:
//!
//! - **Circuit Breaker**: Fails fast while a dependency is unhealthy, probing it once to detect recovery
//! - **Retry Policy**: Fixed, linear, exponential and jittered exponential backoff
//! - **Fallback Handler**: Named alternate implementations used when the primary path is exhausted
//! - **Rate Limiter**: Minimum-interval dispatch shared by every worker holding it
//! - **Resilient Executor**: The composition `fallback(retry(breaker(op)))` per named operation
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The remote API's requests and responses
//! - Domain objects (hosts, services, problems)
//! - Authentication or persistence
//!
//! Operations are plain closures returning futures of `Result<T, ResilienceError>`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Fallback Handler                  │  ← Alternate path
//! │  (Runs when the retried call fails)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Transient failures
//! │  (Backoff between attempts)             │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!        Monitoring API
//! ```
//!
//! # Usage Example
//!
//! ## Basic Circuit Breaker
//!
//! ```no_run
//! use vigil_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     recovery_timeout: Duration::from_secs(60),
//! };
//!
//! let breaker = CircuitBreaker::new("get_problems", config);
//!
//! let result = breaker.call(|| async {
//!     // Your potentially failing operation
//!     Ok::<_, ResilienceError>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Full Composition
//!
//! ```no_run
//! use vigil_core_resilience::prelude::*;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let executor = ResilientExecutor::new(
//!     CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
//!     RetryPolicy::network(),
//! );
//! let fallbacks: FallbackHandler<(), Vec<String>> = FallbackHandler::new();
//! fallbacks.register("get_hosts", |_| async { Ok(Vec::new()) });
//!
//! let hosts = executor
//!     .execute_with_fallback(
//!         "get_hosts",
//!         || async { Ok(vec!["web-01".to_string()]) },
//!         &fallbacks,
//!         (),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState, FailurePredicate,
};
pub use error::ResilienceError;
pub use executor::ResilientExecutor;
pub use fallback::FallbackHandler;
pub use rate_limiter::RateLimiter;
pub use retry::{BackoffStrategy, RetryPolicy};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use vigil_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    };
    pub use super::error::ResilienceError;
    pub use super::executor::ResilientExecutor;
    pub use super::fallback::FallbackHandler;
    pub use super::rate_limiter::RateLimiter;
    pub use super::retry::{BackoffStrategy, RetryPolicy};
}
