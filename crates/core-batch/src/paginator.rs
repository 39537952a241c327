//! Lazy pagination over offset/limit APIs
//!
//! [`StreamPaginator::stream`] turns a page-fetch function into a stream of
//! [`StreamBatch`]es. Pages are requested strictly one at a time, in order,
//! and only as the consumer polls, so arbitrarily large result sets can be
//! walked without holding them in memory.

use crate::error::{BatchError, Result};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use vigil_observability::{names, MetricsCollector};

/// One page as returned by the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of records, if the API reports it
    pub total_count: Option<usize>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_count: None,
        }
    }

    pub fn with_total(items: Vec<T>, total_count: usize) -> Self {
        Self {
            items,
            total_count: Some(total_count),
        }
    }
}

/// Where a batch came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub offset: usize,
    pub batch_size: usize,
    /// Set when the fetch for this batch failed
    pub error: Option<String>,
}

/// One bounded batch of a paginated result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch<T> {
    pub items: Vec<T>,
    /// Zero-based
    pub batch_number: usize,
    /// Estimate derived from the first page's total count
    pub total_batches: Option<usize>,
    pub has_more: bool,
    pub metadata: BatchMetadata,
}

impl<T> StreamBatch<T> {
    pub fn is_error(&self) -> bool {
        self.metadata.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginatorConfig {
    /// Records requested per page (default: 100)
    pub batch_size: usize,
    /// Courtesy delay between successive fetches (default: 100ms)
    pub delay: Duration,
    /// Stop after this many batches (None = until exhausted)
    pub max_batches: Option<usize>,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delay: Duration::from_millis(100),
            max_batches: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamPaginator {
    config: PaginatorConfig,
    metrics: Arc<dyn MetricsCollector>,
}

struct PageCursor<F> {
    fetch: F,
    offset: usize,
    batch_number: usize,
    total_batches: Option<usize>,
    done: bool,
}

impl StreamPaginator {
    pub fn new(config: PaginatorConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(BatchError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            config,
            metrics: vigil_observability::noop(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &PaginatorConfig {
        &self.config
    }

    /// Lazily fetch pages with `fetch(limit, offset)`.
    ///
    /// A page shorter than the batch size (including an empty one) is the
    /// last. A failed fetch yields one empty batch carrying the error, then
    /// the stream ends; there is no retry here.
    pub fn stream<T, E, F, Fut>(&self, fetch: F) -> impl Stream<Item = StreamBatch<T>>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, E>>,
        E: fmt::Display,
    {
        let PaginatorConfig {
            batch_size,
            delay,
            max_batches,
        } = self.config.clone();
        let metrics = self.metrics.clone();

        let cursor = PageCursor {
            fetch,
            offset: 0,
            batch_number: 0,
            total_batches: None,
            done: false,
        };

        stream::unfold(cursor, move |mut cursor| {
            let metrics = metrics.clone();
            async move {
                if cursor.done || max_batches.is_some_and(|max| cursor.batch_number >= max) {
                    return None;
                }
                if cursor.batch_number > 0 && !delay.is_zero() {
                    sleep(delay).await;
                }

                let offset = cursor.offset;
                let batch_number = cursor.batch_number;
                let batch = match (cursor.fetch)(batch_size, offset).await {
                    Ok(page) => {
                        metrics.incr_counter(names::PAGES_FETCHED, &[("result", "success")], 1);
                        if batch_number == 0 {
                            cursor.total_batches =
                                page.total_count.map(|total| total.div_ceil(batch_size));
                        }
                        let has_more = page.items.len() >= batch_size;
                        tracing::debug!(
                            offset,
                            batch_number,
                            items = page.items.len(),
                            has_more,
                            "Fetched page"
                        );
                        cursor.done = !has_more;
                        StreamBatch {
                            items: page.items,
                            batch_number,
                            total_batches: cursor.total_batches,
                            has_more,
                            metadata: BatchMetadata {
                                offset,
                                batch_size,
                                error: None,
                            },
                        }
                    }
                    Err(e) => {
                        metrics.incr_counter(names::PAGES_FETCHED, &[("result", "error")], 1);
                        tracing::warn!(offset, batch_number, error = %e, "Page fetch failed");
                        cursor.done = true;
                        StreamBatch {
                            items: Vec::new(),
                            batch_number,
                            total_batches: cursor.total_batches,
                            has_more: false,
                            metadata: BatchMetadata {
                                offset,
                                batch_size,
                                error: Some(e.to_string()),
                            },
                        }
                    }
                };

                cursor.offset += batch_size;
                cursor.batch_number += 1;
                Some((batch, cursor))
            }
        })
    }

    /// Flatten the batches into individual records, dropping error batches
    pub fn items<T, E, F, Fut>(&self, fetch: F) -> impl Stream<Item = T>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, E>>,
        E: fmt::Display,
    {
        self.stream(fetch)
            .flat_map(|batch| stream::iter(batch.items))
    }

    /// Fetch everything into memory; a failed page fails the whole call
    pub async fn collect_all<T, E, F, Fut>(&self, fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(usize, usize) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, E>>,
        E: fmt::Display,
    {
        let batches = self.stream(fetch);
        futures::pin_mut!(batches);

        let mut all = Vec::new();
        while let Some(batch) = batches.next().await {
            if let Some(message) = batch.metadata.error {
                return Err(BatchError::PageFetch {
                    offset: batch.metadata.offset,
                    message,
                });
            }
            all.extend(batch.items);
        }
        Ok(all)
    }
}
