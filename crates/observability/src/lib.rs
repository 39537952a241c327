//! Vigil Observability: metrics collection for resilience components
//!
//! Every Vigil component (cache, circuit breaker, retry policy, batch
//! processor, paginator) reports what it does through a [`MetricsCollector`]
//! handed to it at construction time. There is no process-wide registry:
//! a component that was never given a collector talks to [`NoopCollector`].
//!
//! ## Collectors
//!
//! - [`NoopCollector`]: discards everything (the default)
//! - [`PrometheusCollector`]: owns a private `prometheus::Registry` and renders
//!   the text exposition format for a metrics endpoint
//! - [`InMemoryCollector`]: records values for assertions in tests
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use vigil_observability::{MetricsCollector, PrometheusCollector, names};
//!
//! let collector = Arc::new(PrometheusCollector::new());
//! collector.incr_counter(names::CACHE_REQUESTS, &[("cache", "api"), ("result", "hit")], 1);
//!
//! let text = collector.gather_text().unwrap();
//! assert!(text.contains("vigil_cache_requests_total"));
//! ```

pub mod error;
pub mod metrics;
pub mod testing;

pub use error::ObservabilityError;
pub use metrics::{names, noop, MetricsCollector, NoopCollector, PrometheusCollector};
pub use testing::InMemoryCollector;
