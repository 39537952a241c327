//! Error types for resilience operations

use std::time::Duration;
use thiserror::Error;

/// Errors produced by, or passed through, the resilience primitives.
///
/// Wrapped operations report their own failures as [`ResilienceError::Transient`]
/// or [`ResilienceError::Permanent`]; the classification decides whether the
/// default retry policy tries again and whether the default breaker counts it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    /// Circuit breaker is open, the operation was never attempted
    #[error("Circuit '{name}' is open, rejecting requests")]
    CircuitOpen { name: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after cooldown")]
    RateLimitExceeded,

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),

    /// A resilience component was configured with unusable values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Shorthand for a transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        ResilienceError::Transient(message.into())
    }

    /// Shorthand for a permanent failure
    pub fn permanent(message: impl Into<String>) -> Self {
        ResilienceError::Permanent(message.into())
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::RateLimitExceeded
                | ResilienceError::Timeout(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen { .. }
                | ResilienceError::InvalidConfig(_)
        )
    }

    /// Check if this error should contribute to circuit breaker failure count
    pub fn should_trip_breaker(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_) | ResilienceError::Timeout(_)
        )
    }

    /// Check if this is a fail-fast rejection from an open circuit
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::transient("connection reset");
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());
        assert!(transient.should_trip_breaker());

        let permanent = ResilienceError::permanent("404 not found");
        assert!(!permanent.is_transient());
        assert!(permanent.is_permanent());
        assert!(!permanent.should_trip_breaker());

        let open = ResilienceError::CircuitOpen {
            name: "get_hosts".to_string(),
        };
        assert!(!open.is_transient());
        assert!(open.is_permanent());
        assert!(!open.should_trip_breaker());
        assert!(open.is_circuit_open());
    }

    #[test]
    fn test_timeout_counts_against_breaker() {
        let timeout = ResilienceError::Timeout(Duration::from_secs(30));
        assert!(timeout.is_transient());
        assert!(timeout.should_trip_breaker());
    }

    #[test]
    fn test_display_includes_circuit_name() {
        let open = ResilienceError::CircuitOpen {
            name: "acknowledge".to_string(),
        };
        assert_eq!(
            open.to_string(),
            "Circuit 'acknowledge' is open, rejecting requests"
        );
    }
}
