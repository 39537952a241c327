//! Error types for batch processing and pagination
//!
//! Individual item failures never surface here; they are recorded on the
//! item. Only problems detected before any work starts escape as errors.

use thiserror::Error;
use vigil_core_resilience::ResilienceError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),

    /// A page fetch failed while collecting a whole result set
    #[error("Page fetch at offset {offset} failed: {message}")]
    PageFetch { offset: usize, message: String },
}

impl From<ResilienceError> for BatchError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::InvalidConfig(msg) => BatchError::InvalidConfig(msg),
            other => BatchError::InvalidConfig(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
