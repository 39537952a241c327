//! Vigil Core Batch: push large collections of work through a rate-limited API
//!
//! # Overview
//!
//! - **[`BatchProcessor`]**: runs one operation over many inputs with bounded
//!   concurrency, a global rate limit, per-item linear retry, optional
//!   validation, progress reporting and cancellation
//! - **[`StreamPaginator`]**: walks an offset/limit API lazily, one bounded
//!   [`StreamBatch`] at a time
//!
//! Per-item outcomes live on [`BatchItem`]; the live counters on
//! [`BatchProgress`]; the caller receives everything as a [`BatchResult`].

pub mod error;
pub mod item;
pub mod paginator;
pub mod processor;
pub mod progress;
pub mod result;

pub use error::{BatchError, Result};
pub use item::{BatchItem, ItemStatus};
pub use paginator::{BatchMetadata, Page, PaginatorConfig, StreamBatch, StreamPaginator};
pub use processor::{BatchConfig, BatchOptions, BatchProcessor, IdFn, ProgressFn, ValidateFn};
pub use progress::BatchProgress;
pub use result::BatchResult;
