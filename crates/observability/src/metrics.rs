//! Metrics collector abstraction and the Prometheus-backed implementation
//!
//! Components call the three primitive operations (`incr_counter`, `observe`,
//! `set_gauge`) with a metric name from [`names`] and a list of label pairs.
//! The collector decides where the value goes.

use crate::error::ObservabilityError;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Metric names emitted by Vigil components
pub mod names {
    /// Cache lookups. Labels: cache, result (hit, miss)
    pub const CACHE_REQUESTS: &str = "vigil_cache_requests_total";
    /// Cache evictions. Labels: cache, reason (expired, size, invalidated)
    pub const CACHE_EVICTIONS: &str = "vigil_cache_evictions_total";
    /// Live cache entries. Labels: cache
    pub const CACHE_ENTRIES: &str = "vigil_cache_entries";
    /// Circuit state transitions. Labels: breaker, to
    pub const CIRCUIT_TRANSITIONS: &str = "vigil_circuit_transitions_total";
    /// Calls rejected by an open circuit. Labels: breaker
    pub const CIRCUIT_REJECTIONS: &str = "vigil_circuit_rejections_total";
    /// Retry attempts after a failure. Labels: operation
    pub const RETRY_ATTEMPTS: &str = "vigil_retry_attempts_total";
    /// Fallback invocations. Labels: operation, result (success, failure)
    pub const FALLBACK_INVOCATIONS: &str = "vigil_fallback_invocations_total";
    /// Batch items reaching a terminal state. Labels: status
    pub const BATCH_ITEMS: &str = "vigil_batch_items_total";
    /// Wall-clock duration of whole batches in seconds
    pub const BATCH_DURATION: &str = "vigil_batch_duration_seconds";
    /// Page fetches issued by the paginator. Labels: result (success, error)
    pub const PAGES_FETCHED: &str = "vigil_pages_fetched_total";

    /// Help text for a known metric name
    pub fn help(name: &str) -> &'static str {
        match name {
            CACHE_REQUESTS => "Cache lookups by result",
            CACHE_EVICTIONS => "Cache evictions by reason",
            CACHE_ENTRIES => "Current number of cache entries",
            CIRCUIT_TRANSITIONS => "Circuit breaker state transitions",
            CIRCUIT_REJECTIONS => "Calls rejected while a circuit was open",
            RETRY_ATTEMPTS => "Retry attempts performed after a failure",
            FALLBACK_INVOCATIONS => "Fallback invocations by result",
            BATCH_ITEMS => "Batch items by terminal status",
            BATCH_DURATION => "Batch wall-clock duration in seconds",
            PAGES_FETCHED => "Paginator page fetches by result",
            _ => "Vigil metric",
        }
    }
}

/// Sink for metrics emitted by Vigil components.
///
/// Implementations must be cheap to call from hot paths and must never panic.
pub trait MetricsCollector: Send + Sync + fmt::Debug {
    /// Add `value` to a monotonically increasing counter
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)], value: u64);

    /// Record one observation in a distribution (durations, sizes)
    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64);

    /// Set a gauge to an absolute value
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Collector that drops every value
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollector;

impl MetricsCollector for NoopCollector {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}

    fn observe(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}

    fn set_gauge(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// Shared no-op collector, the default for every component
pub fn noop() -> Arc<dyn MetricsCollector> {
    Arc::new(NoopCollector)
}

/// Collector backed by a private Prometheus registry.
///
/// Metric families are registered lazily on first use; the label names of
/// the first call fix the family's schema. Later calls with a different label
/// set are dropped with a debug log instead of panicking.
pub struct PrometheusCollector {
    registry: Registry,
    counters: Mutex<HashMap<String, CounterVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl PrometheusCollector {
    /// Create a collector with a fresh registry
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Create a collector that registers into an existing registry
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, ObservabilityError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn counter_vec(&self, name: &str, label_names: &[&str]) -> Option<CounterVec> {
        let mut counters = lock(&self.counters);
        if let Some(existing) = counters.get(name) {
            return Some(existing.clone());
        }
        let created = CounterVec::new(Opts::new(name, names::help(name)), label_names)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|_| vec));
        match created {
            Ok(vec) => {
                counters.insert(name.to_string(), vec.clone());
                Some(vec)
            }
            Err(e) => {
                tracing::debug!(metric = name, error = %e, "Failed to register counter");
                None
            }
        }
    }

    fn histogram_vec(&self, name: &str, label_names: &[&str]) -> Option<HistogramVec> {
        let mut histograms = lock(&self.histograms);
        if let Some(existing) = histograms.get(name) {
            return Some(existing.clone());
        }
        let opts = HistogramOpts::new(name, names::help(name))
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]);
        let created = HistogramVec::new(opts, label_names)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|_| vec));
        match created {
            Ok(vec) => {
                histograms.insert(name.to_string(), vec.clone());
                Some(vec)
            }
            Err(e) => {
                tracing::debug!(metric = name, error = %e, "Failed to register histogram");
                None
            }
        }
    }

    fn gauge_vec(&self, name: &str, label_names: &[&str]) -> Option<GaugeVec> {
        let mut gauges = lock(&self.gauges);
        if let Some(existing) = gauges.get(name) {
            return Some(existing.clone());
        }
        let created = GaugeVec::new(Opts::new(name, names::help(name)), label_names)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|_| vec));
        match created {
            Ok(vec) => {
                gauges.insert(name.to_string(), vec.clone());
                Some(vec)
            }
            Err(e) => {
                tracing::debug!(metric = name, error = %e, "Failed to register gauge");
                None
            }
        }
    }
}

impl Default for PrometheusCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrometheusCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusCollector")
            .field("counters", &lock(&self.counters).len())
            .field("histograms", &lock(&self.histograms).len())
            .field("gauges", &lock(&self.gauges).len())
            .finish()
    }
}

impl MetricsCollector for PrometheusCollector {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        let (label_names, label_values) = split_labels(labels);
        if let Some(vec) = self.counter_vec(name, &label_names) {
            match vec.get_metric_with_label_values(&label_values) {
                Ok(counter) => counter.inc_by(value as f64),
                Err(e) => tracing::debug!(metric = name, error = %e, "Label mismatch"),
            }
        }
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let (label_names, label_values) = split_labels(labels);
        if let Some(vec) = self.histogram_vec(name, &label_names) {
            match vec.get_metric_with_label_values(&label_values) {
                Ok(histogram) => histogram.observe(value),
                Err(e) => tracing::debug!(metric = name, error = %e, "Label mismatch"),
            }
        }
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let (label_names, label_values) = split_labels(labels);
        if let Some(vec) = self.gauge_vec(name, &label_names) {
            match vec.get_metric_with_label_values(&label_values) {
                Ok(gauge) => gauge.set(value),
                Err(e) => tracing::debug!(metric = name, error = %e, "Label mismatch"),
            }
        }
    }
}

fn split_labels<'a>(labels: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    labels.iter().copied().unzip()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_collector_accepts_everything() {
        let collector = noop();
        collector.incr_counter(names::RETRY_ATTEMPTS, &[("operation", "x")], 3);
        collector.observe(names::BATCH_DURATION, &[], 1.5);
        collector.set_gauge(names::CACHE_ENTRIES, &[("cache", "api")], 10.0);
    }

    #[test]
    fn test_prometheus_counter_rendered() {
        let collector = PrometheusCollector::new();
        collector.incr_counter(
            names::CIRCUIT_REJECTIONS,
            &[("breaker", "get_hosts")],
            2,
        );
        collector.incr_counter(
            names::CIRCUIT_REJECTIONS,
            &[("breaker", "get_hosts")],
            1,
        );

        let text = collector.gather_text().unwrap();
        assert!(text.contains("vigil_circuit_rejections_total"));
        assert!(text.contains("breaker=\"get_hosts\"} 3"));
    }

    #[test]
    fn test_prometheus_histogram_and_gauge() {
        let collector = PrometheusCollector::new();
        collector.observe(names::BATCH_DURATION, &[], 0.25);
        collector.set_gauge(names::CACHE_ENTRIES, &[("cache", "api")], 42.0);

        let text = collector.gather_text().unwrap();
        assert!(text.contains("vigil_batch_duration_seconds_count 1"));
        assert!(text.contains("vigil_cache_entries{cache=\"api\"} 42"));
    }

    #[test]
    fn test_label_mismatch_is_ignored() {
        let collector = PrometheusCollector::new();
        collector.incr_counter(names::BATCH_ITEMS, &[("status", "success")], 1);
        // Different label schema for the same family must not panic
        collector.incr_counter(names::BATCH_ITEMS, &[("status", "failed"), ("extra", "x")], 1);

        let text = collector.gather_text().unwrap();
        assert!(text.contains("vigil_batch_items_total{status=\"success\"} 1"));
        assert!(!text.contains("extra"));
    }

    #[test]
    fn test_collectors_are_independent() {
        let a = PrometheusCollector::new();
        let b = PrometheusCollector::new();
        a.incr_counter(names::PAGES_FETCHED, &[("result", "success")], 1);

        assert!(a.gather_text().unwrap().contains("vigil_pages_fetched_total"));
        assert!(!b.gather_text().unwrap().contains("vigil_pages_fetched_total"));
    }
}
