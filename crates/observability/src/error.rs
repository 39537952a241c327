//! Error types for metrics collection

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}
