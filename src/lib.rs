/*!
 * Vigil - client-side resilience for rate-limited monitoring APIs
 *
 * Pushes large collections of work through a remote API safely:
 * - Bounded-concurrency batches with rate limiting and per-item retry
 * - Circuit breakers per operation, retry with backoff, named fallbacks
 * - TTL-aware LRU response cache
 * - Lazy pagination over offset/limit endpoints
 *
 * The components live in the `vigil-core-*` crates and can be used on their
 * own; [`ResilientClient`] composes them behind one configuration.
 */

pub mod client;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use client::{cache_key, ResilientClient};
pub use config::{
    BatchSettings, CacheSettings, CircuitBreakerSettings, LogLevel, LoggingSettings,
    PaginationSettings, RetrySettings, VigilConfig,
};
pub use error::{ErrorCategory, Result, VigilError};

pub use vigil_core_batch as batch;
pub use vigil_core_cache as cache;
pub use vigil_core_resilience as resilience;
pub use vigil_observability as observability;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
