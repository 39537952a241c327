//! TTL-aware LRU cache
//!
//! Every operation takes the single internal lock, so each call is atomic
//! with respect to concurrent callers. Expiry is checked lazily on `get`
//! and eagerly by [`LruCache::cleanup_expired`] (or the janitor task).

use crate::error::{CacheError, Result};
use crate::pattern::KeyPattern;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vigil_observability::{names, MetricsCollector};

/// Cache construction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Label used in logs and metrics
    pub name: String,
    /// Maximum number of live entries
    pub capacity: usize,
    /// TTL applied by [`LruCache::set`]; `None` or zero means entries never expire
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            capacity: 1000,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// One cached value and its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub created_at: Instant,
    /// `None` for entries that never expire
    pub expires_at: Option<Instant>,
    pub access_count: u64,
    pub last_accessed: Instant,
}

impl<K, V> CacheEntry<K, V> {
    fn new(key: K, value: V, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            key,
            value,
            created_at: now,
            expires_at: ttl
                .filter(|ttl| !ttl.is_zero())
                .and_then(|ttl| now.checked_add(ttl)),
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Time left before expiry, `None` for entries that never expire
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(now))
    }
}

/// Cumulative cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `expired_evictions + size_evictions`
    pub evictions: u64,
    pub expired_evictions: u64,
    pub size_evictions: u64,
    /// Entries removed by `invalidate`, `invalidate_pattern` or `clear`
    pub invalidations: u64,
    /// Current number of entries (the only non-monotonic field)
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that were hits, 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Inner<K: Hash + Eq, V> {
    entries: lru::LruCache<K, CacheEntry<K, V>>,
    stats: CacheStats,
}

/// Fixed-capacity, TTL-aware key/value store
///
/// # Example
/// ```
/// use vigil_core_cache::{CacheConfig, LruCache};
/// use std::time::Duration;
///
/// let cache: LruCache<String, u32> = LruCache::new(CacheConfig {
///     name: "hosts".to_string(),
///     capacity: 2,
///     default_ttl: Some(Duration::from_secs(60)),
/// })?;
///
/// cache.set("hosts:web".to_string(), 3);
/// assert_eq!(cache.get(&"hosts:web".to_string()), Some(3));
/// assert_eq!(cache.get(&"hosts:db".to_string()), None);
/// assert_eq!(cache.stats().hits, 1);
/// # Ok::<(), vigil_core_cache::CacheError>(())
/// ```
pub struct LruCache<K: Hash + Eq, V> {
    name: String,
    default_ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<K: Hash + Eq, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LruCache")
            .field("name", &self.name)
            .field("default_ttl", &self.default_ttl)
            .field("len", &inner.entries.len())
            .field("capacity", &inner.entries.cap())
            .finish()
    }
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or(CacheError::ZeroCapacity)?;
        Ok(Self {
            name: config.name,
            default_ttl: config.default_ttl,
            inner: Mutex::new(Inner {
                entries: lru::LruCache::new(capacity),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..Default::default()
                },
            }),
            metrics: vigil_observability::noop(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a live value, refreshing its recency.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.peek(key).map(|entry| entry.is_expired(now)) {
            Some(expired) => expired,
            None => {
                inner.stats.misses += 1;
                drop(inner);
                self.record_lookup("miss");
                return None;
            }
        };

        if expired {
            inner.entries.pop(key);
            inner.stats.misses += 1;
            inner.stats.expired_evictions += 1;
            inner.stats.evictions += 1;
            let len = inner.entries.len();
            drop(inner);
            tracing::trace!(cache = %self.name, key = %key, "Entry expired on read");
            self.record_lookup("miss");
            self.record_evictions("expired", 1);
            self.record_len(len);
            return None;
        }

        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        let value = entry.value.clone();
        inner.stats.hits += 1;
        drop(inner);

        self.record_lookup("hit");
        Some(value)
    }

    /// Store a value with the default TTL
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL; `None` or zero never expires.
    ///
    /// Inserting a new key into a full cache evicts the least recently used
    /// entry first.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut inner = self.lock();

        let mut evicted = 0;
        if !inner.entries.contains(&key) && inner.entries.len() >= inner.entries.cap().get() {
            if let Some((lru_key, _)) = inner.entries.pop_lru() {
                tracing::trace!(cache = %self.name, key = %lru_key, "Evicting least recently used entry");
                inner.stats.size_evictions += 1;
                inner.stats.evictions += 1;
                evicted = 1;
            }
        }

        let entry = CacheEntry::new(key.clone(), value, ttl, now);
        inner.entries.put(key, entry);
        let len = inner.entries.len();
        drop(inner);

        if evicted > 0 {
            self.record_evictions("size", evicted);
        }
        self.record_len(len);
    }

    /// Remove one key, returning whether it was present
    pub fn invalidate(&self, key: &K) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.pop(key).is_some();
        if removed {
            inner.stats.invalidations += 1;
        }
        let len = inner.entries.len();
        drop(inner);

        if removed {
            self.record_evictions("invalidated", 1);
            self.record_len(len);
        }
        removed
    }

    /// Remove every key matching a `*` wildcard pattern, returning the count
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let pattern = KeyPattern::new(pattern)?;
        let mut inner = self.lock();

        let matching: Vec<K> = inner
            .entries
            .iter()
            .filter(|(key, _)| pattern.matches(&key.to_string()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            inner.entries.pop(key);
        }
        let removed = matching.len();
        inner.stats.invalidations += removed as u64;
        let len = inner.entries.len();
        drop(inner);

        if removed > 0 {
            tracing::debug!(cache = %self.name, %pattern, removed, "Invalidated entries by pattern");
            self.record_evictions("invalidated", removed as u64);
            self.record_len(len);
        }
        Ok(removed)
    }

    /// Drop every entry; cumulative statistics are kept
    pub fn clear(&self) {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.stats.invalidations += removed as u64;
        drop(inner);

        tracing::debug!(cache = %self.name, removed, "Cache cleared");
        if removed > 0 {
            self.record_evictions("invalidated", removed as u64);
        }
        self.record_len(0);
    }

    /// Remove every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        let removed = expired.len();
        inner.stats.expired_evictions += removed as u64;
        inner.stats.evictions += removed as u64;
        let len = inner.entries.len();
        drop(inner);

        if removed > 0 {
            tracing::debug!(cache = %self.name, removed, "Removed expired entries");
            self.record_evictions("expired", removed as u64);
            self.record_len(len);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }

    /// Whether a live entry exists, without touching recency or stats
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Keys from most to least recently used, expired entries included
    pub fn keys(&self) -> Vec<K> {
        self.lock().entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Copy of an entry for inspection, without touching recency or stats
    pub fn peek_entry(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.lock().entries.peek(key).cloned()
    }

    /// Return the cached value, or run `fetch` and cache its result.
    ///
    /// `ttl` of `None` uses the default TTL. Failed loads are not cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: K,
        ttl: Option<Duration>,
        fetch: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set_with_ttl(key, value.clone(), ttl.or(self.default_ttl));
        Ok(value)
    }

    fn record_lookup(&self, result: &str) {
        self.metrics.incr_counter(
            names::CACHE_REQUESTS,
            &[("cache", &self.name), ("result", result)],
            1,
        );
    }

    fn record_evictions(&self, reason: &str, count: u64) {
        self.metrics.incr_counter(
            names::CACHE_EVICTIONS,
            &[("cache", &self.name), ("reason", reason)],
            count,
        );
    }

    fn record_len(&self, len: usize) {
        self.metrics
            .set_gauge(names::CACHE_ENTRIES, &[("cache", &self.name)], len as f64);
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Periodically sweep expired entries until `cancel` fires or the cache
    /// is dropped
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.cleanup_expired();
                    }
                }
            }
            tracing::debug!("Cache janitor stopped");
        })
    }
}
