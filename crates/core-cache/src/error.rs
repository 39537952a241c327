//! Error types for cache operations

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A cache must hold at least one entry
    #[error("Cache capacity must be at least 1")]
    ZeroCapacity,

    /// The invalidation pattern could not be compiled
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;
