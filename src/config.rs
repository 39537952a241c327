/*!
 * Configuration types for Vigil
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VigilError};
use vigil_core_batch::{BatchConfig, PaginatorConfig};
use vigil_core_cache::CacheConfig;
use vigil_core_resilience::{BackoffStrategy, CircuitBreakerConfig, RetryPolicy};

/// Top-level configuration for a [`ResilientClient`](crate::ResilientClient)
///
/// Every section and field is optional in TOML; missing values take the
/// defaults below. Durations are given in (fractional) seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub pagination: PaginationSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Name used in logs and metric labels
    #[serde(default = "default_cache_name")]
    pub name: String,

    /// Maximum number of entries
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// TTL for entries stored without an explicit one (None or 0 = never expire)
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: Option<f64>,

    /// Interval of the background expiry sweep (None = no sweep)
    #[serde(default)]
    pub cleanup_interval_secs: Option<f64>,
}

/// Circuit breaker settings shared by every operation's breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive counted failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is allowed
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: f64,
}

/// Retry policy settings for single calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

/// Batch processor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Additional attempts per item after the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the linear delay between item retries
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,

    /// Maximum dispatches per second across one batch
    #[serde(default)]
    pub rate_limit: Option<f64>,

    /// Deadline for a whole batch
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

/// Stream paginator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Courtesy delay between page fetches
    #[serde(default = "default_page_delay_secs")]
    pub delay_secs: f64,

    #[serde(default)]
    pub max_batches: Option<usize>,
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            capacity: default_cache_capacity(),
            default_ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: None,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            strategy: BackoffStrategy::default(),
            jitter: true,
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            rate_limit: None,
            timeout_secs: None,
        }
    }
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_secs: default_page_delay_secs(),
            max_batches: None,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_cache_name() -> String {
    "responses".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl_secs() -> Option<f64> {
    Some(300.0)
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> f64 {
    60.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

fn default_max_concurrent() -> usize {
    10
}

fn default_retry_delay_secs() -> f64 {
    1.0
}

fn default_batch_size() -> usize {
    100
}

fn default_page_delay_secs() -> f64 {
    0.1
}

/// Convert a seconds field into a `Duration`, rejecting negative and non-finite values
fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        VigilError::Config(format!(
            "{field} must be a finite, non-negative number of seconds, got {value}"
        ))
    })
}

/// Like [`secs`], treating `None` and zero as "no duration"
fn optional_secs(field: &str, value: Option<f64>) -> Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(v) => secs(field, v).map(|d| (!d.is_zero()).then_some(d)),
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> Result<CacheConfig> {
        if self.capacity == 0 {
            return Err(VigilError::Config(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        Ok(CacheConfig {
            name: self.name.clone(),
            capacity: self.capacity,
            default_ttl: optional_secs("cache.default_ttl_secs", self.default_ttl_secs)?,
        })
    }

    pub fn cleanup_interval(&self) -> Result<Option<Duration>> {
        optional_secs("cache.cleanup_interval_secs", self.cleanup_interval_secs)
    }
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> Result<CircuitBreakerConfig> {
        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: secs(
                "circuit_breaker.recovery_timeout_secs",
                self.recovery_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl RetrySettings {
    pub fn to_retry_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::new(self.strategy)
            .with_max_retries(self.max_retries)
            .with_base_delay(secs("retry.base_delay_secs", self.base_delay_secs)?)
            .with_max_delay(secs("retry.max_delay_secs", self.max_delay_secs)?)
            .with_jitter(self.jitter);
        policy.validate()?;
        Ok(policy)
    }
}

impl BatchSettings {
    pub fn to_batch_config(&self) -> Result<BatchConfig> {
        let config = BatchConfig {
            max_concurrent: self.max_concurrent,
            max_retries: self.max_retries,
            retry_delay: secs("batch.retry_delay_secs", self.retry_delay_secs)?,
            rate_limit: self.rate_limit,
            timeout: optional_secs("batch.timeout_secs", self.timeout_secs)?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl PaginationSettings {
    pub fn to_paginator_config(&self) -> Result<PaginatorConfig> {
        if self.batch_size == 0 {
            return Err(VigilError::Config(
                "pagination.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(PaginatorConfig {
            batch_size: self.batch_size,
            delay: secs("pagination.delay_secs", self.delay_secs)?,
            max_batches: self.max_batches,
        })
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check every section by converting it into its component config
    pub fn validate(&self) -> Result<()> {
        self.cache.to_cache_config()?;
        self.cache.cleanup_interval()?;
        self.circuit_breaker.to_breaker_config()?;
        self.retry.to_retry_policy()?;
        self.batch.to_batch_config()?;
        self.pagination.to_paginator_config()?;
        Ok(())
    }

    /// Create a configuration for fragile or heavily rate-limited APIs
    pub fn conservative() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 3,
                recovery_timeout_secs: 120.0,
            },
            retry: RetrySettings {
                max_retries: 5,
                base_delay_secs: 2.0,
                max_delay_secs: 120.0,
                strategy: BackoffStrategy::JitteredExponential,
                jitter: true,
            },
            batch: BatchSettings {
                max_concurrent: 2,
                max_retries: 5,
                retry_delay_secs: 2.0,
                rate_limit: Some(2.0),
                timeout_secs: None,
            },
            pagination: PaginationSettings {
                batch_size: 50,
                delay_secs: 0.5,
                max_batches: None,
            },
            ..Default::default()
        }
    }

    /// Create a configuration optimized for maximum throughput
    pub fn throughput() -> Self {
        Self {
            cache: CacheSettings {
                capacity: 10_000,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 10,
                recovery_timeout_secs: 30.0,
            },
            retry: RetrySettings {
                max_retries: 2,
                base_delay_secs: 0.1,
                max_delay_secs: 5.0,
                ..Default::default()
            },
            batch: BatchSettings {
                max_concurrent: 50,
                max_retries: 1,
                retry_delay_secs: 0.1,
                rate_limit: None,
                timeout_secs: None,
            },
            pagination: PaginationSettings {
                batch_size: 500,
                delay_secs: 0.0,
                max_batches: None,
            },
            ..Default::default()
        }
    }
}
