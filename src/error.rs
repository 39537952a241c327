/*!
 * Error types for Vigil
 */

use std::io;
use thiserror::Error;
use vigil_core_batch::BatchError;
use vigil_core_cache::CacheError;
use vigil_core_resilience::ResilienceError;
use vigil_observability::ObservabilityError;

pub type Result<T> = std::result::Result<T, VigilError>;

#[derive(Debug, Error)]
pub enum VigilError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Breaker, retry, fallback or rate limiter failure
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Metrics(#[from] ObservabilityError),

    /// A cached or fetched value did not match the requested type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to write TOML: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

/// Error categories for logging and instrumentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    CircuitOpen,
    Transient,
    Permanent,
    Cache,
    Batch,
    Metrics,
    Serialization,
    IoError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Batch => "batch",
            ErrorCategory::Metrics => "metrics",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::IoError => "io",
        }
    }
}

impl VigilError {
    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            VigilError::Resilience(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if the call was rejected by an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, VigilError::Resilience(e) if e.is_circuit_open())
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            VigilError::Config(_) | VigilError::TomlParse(_) | VigilError::TomlWrite(_) => {
                ErrorCategory::Configuration
            }
            VigilError::Resilience(e) if e.is_circuit_open() => ErrorCategory::CircuitOpen,
            VigilError::Resilience(ResilienceError::InvalidConfig(_)) => {
                ErrorCategory::Configuration
            }
            VigilError::Resilience(e) if e.is_transient() => ErrorCategory::Transient,
            VigilError::Resilience(_) => ErrorCategory::Permanent,
            VigilError::Cache(_) => ErrorCategory::Cache,
            VigilError::Batch(BatchError::InvalidConfig(_)) => ErrorCategory::Configuration,
            VigilError::Batch(_) => ErrorCategory::Batch,
            VigilError::Metrics(_) => ErrorCategory::Metrics,
            VigilError::Serialization(_) => ErrorCategory::Serialization,
            VigilError::Io(_) => ErrorCategory::IoError,
        }
    }
}
