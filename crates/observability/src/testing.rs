//! In-memory collector for asserting on emitted metrics in tests

use crate::metrics::MetricsCollector;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Series key: metric name plus its label pairs in call order
type SeriesKey = (String, Vec<(String, String)>);

/// Collector that keeps every value in memory.
///
/// ## Example
///
/// ```
/// use vigil_observability::{InMemoryCollector, MetricsCollector};
///
/// let collector = InMemoryCollector::new();
/// collector.incr_counter("requests", &[("result", "hit")], 1);
/// collector.incr_counter("requests", &[("result", "hit")], 2);
///
/// assert_eq!(collector.counter("requests", &[("result", "hit")]), 3);
/// assert_eq!(collector.counter_total("requests"), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCollector {
    counters: Mutex<HashMap<SeriesKey, u64>>,
    gauges: Mutex<HashMap<SeriesKey, f64>>,
    observations: Mutex<HashMap<SeriesKey, Vec<f64>>>,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter series (0 if never touched)
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        lock(&self.counters)
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of a counter across all label combinations
    pub fn counter_total(&self, name: &str) -> u64 {
        lock(&self.counters)
            .iter()
            .filter(|((metric, _), _)| metric == name)
            .map(|(_, value)| *value)
            .sum()
    }

    /// Last value set on a gauge series
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        lock(&self.gauges).get(&series_key(name, labels)).copied()
    }

    /// All observations recorded on a distribution series
    pub fn observations(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        lock(&self.observations)
            .get(&series_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }

    /// Forget everything recorded so far
    pub fn reset(&self) {
        lock(&self.counters).clear();
        lock(&self.gauges).clear();
        lock(&self.observations).clear();
    }
}

impl MetricsCollector for InMemoryCollector {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        *lock(&self.counters)
            .entry(series_key(name, labels))
            .or_insert(0) += value;
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        lock(&self.observations)
            .entry(series_key(name, labels))
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        lock(&self.gauges).insert(series_key(name, labels), value);
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    (
        name.to_string(),
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
