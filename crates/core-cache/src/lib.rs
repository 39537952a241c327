//! Vigil Core Cache: a TTL-aware LRU cache for API responses
//!
//! - Fixed capacity with least-recently-used eviction
//! - Per-entry TTL with lazy expiry on read and an optional janitor sweep
//! - Hit/miss/eviction accounting ([`CacheStats`]) and metrics
//! - Bulk invalidation with `*` wildcard key patterns
//!
//! ```
//! use vigil_core_cache::{CacheConfig, LruCache};
//!
//! let cache: LruCache<String, String> = LruCache::new(CacheConfig::default())?;
//! cache.set("hosts:web-01".to_string(), "up".to_string());
//! cache.set("hosts:web-02".to_string(), "down".to_string());
//!
//! assert_eq!(cache.invalidate_pattern("hosts:*")?, 2);
//! # Ok::<(), vigil_core_cache::CacheError>(())
//! ```

pub mod cache;
pub mod error;
pub mod pattern;

pub use cache::{CacheConfig, CacheEntry, CacheStats, LruCache};
pub use error::{CacheError, Result};
pub use pattern::KeyPattern;
