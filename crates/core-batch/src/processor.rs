//! Bounded-concurrency batch execution
//!
//! [`BatchProcessor::process`] runs one operation over every input of a
//! collection with:
//!
//! - **Concurrent Processing** - at most `max_concurrent` workers claim items
//! - **Rate Limiting** - a minimum interval between dispatches, global to the batch
//! - **Per-item Retry** - linear backoff (`retry_delay * k` after attempt k)
//! - **Validation** - invalid inputs are skipped before reaching the operation
//! - **Progress Tracking** - a callback after every item state transition
//! - **Cancellation** - an external token and/or an overall deadline
//!
//! Item failures (and panics) are recorded on the item and never abort the
//! rest of the batch. Only configuration errors are returned as `Err`.
//!
//! # Example
//!
//! ```no_run
//! use vigil_core_batch::{BatchConfig, BatchOptions, BatchProcessor};
//!
//! # async fn example() -> Result<(), vigil_core_batch::BatchError> {
//! let processor = BatchProcessor::new(BatchConfig {
//!     max_concurrent: 5,
//!     rate_limit: Some(20.0),
//!     ..Default::default()
//! })?;
//!
//! let hosts = vec!["web-01".to_string(), "web-02".to_string()];
//! let result = processor
//!     .process(
//!         hosts,
//!         |host: String| async move { Ok::<_, String>(format!("{host}: acknowledged")) },
//!         BatchOptions::new().on_progress(|p| println!("{:.0}%", p.progress_percent())),
//!     )
//!     .await?;
//!
//! println!("Succeeded: {}, Failed: {}", result.progress.success, result.progress.failed);
//! # Ok(())
//! # }
//! ```

use crate::error::{BatchError, Result};
use crate::item::{BatchItem, ItemStatus};
use crate::progress::BatchProgress;
use crate::result::BatchResult;
use futures::FutureExt;
use serde_json::{json, Map};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vigil_core_resilience::RateLimiter;
use vigil_observability::{names, MetricsCollector};

/// Decides whether an input may be processed; `Err(reason)` skips it
pub type ValidateFn<In> = Arc<dyn Fn(&In) -> std::result::Result<(), String> + Send + Sync>;
/// Receives a progress snapshot after every item state transition,
/// including each item settled when the batch stops early
pub type ProgressFn = Arc<dyn Fn(&BatchProgress) + Send + Sync>;
/// Derives an item id from its index and input
pub type IdFn<In> = Arc<dyn Fn(usize, &In) -> String + Send + Sync>;

/// Configuration for batch operations
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of concurrent operations (default: 10)
    pub max_concurrent: usize,

    /// Additional attempts per item after the first (default: 3)
    pub max_retries: u32,

    /// Base delay between retries, scaled by the attempt number (default: 1s)
    pub retry_delay: Duration,

    /// Maximum dispatches per second across the batch (None = no limit)
    pub rate_limit: Option<f64>,

    /// Overall deadline for the batch (None = no deadline)
    pub timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            rate_limit: None,
            timeout: None,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(BatchError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = self.rate_limit {
            RateLimiter::per_second(rate)?;
        }
        Ok(())
    }
}

/// Optional hooks for one batch run
pub struct BatchOptions<In> {
    validate: Option<ValidateFn<In>>,
    on_progress: Option<ProgressFn>,
    id_fn: Option<IdFn<In>>,
    cancel: Option<CancellationToken>,
}

impl<In> Default for BatchOptions<In> {
    fn default() -> Self {
        Self {
            validate: None,
            on_progress: None,
            id_fn: None,
            cancel: None,
        }
    }
}

impl<In> fmt::Debug for BatchOptions<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("validate", &self.validate.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("id_fn", &self.id_fn.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<In> BatchOptions<In> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate<V>(mut self, validate: V) -> Self
    where
        V: Fn(&In) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    pub fn on_progress<P>(mut self, on_progress: P) -> Self
    where
        P: Fn(&BatchProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Item ids default to the zero-based input index
    pub fn id_fn<I>(mut self, id_fn: I) -> Self
    where
        I: Fn(usize, &In) -> String + Send + Sync + 'static,
    {
        self.id_fn = Some(Arc::new(id_fn));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs operations over collections of inputs
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    config: BatchConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: vigil_observability::noop(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `operation` over every input
    pub async fn process<In, Out, E, F, Fut>(
        &self,
        inputs: Vec<In>,
        operation: F,
        options: BatchOptions<In>,
    ) -> Result<BatchResult<In, Out>>
    where
        In: Clone + Send + Sync + 'static,
        Out: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Out, E>> + Send + 'static,
    {
        self.config.validate()?;
        let limiter = self
            .config
            .rate_limit
            .map(RateLimiter::per_second)
            .transpose()?;

        let batch_id: Arc<str> = Arc::from(Uuid::new_v4().to_string());
        let started = Instant::now();
        let total = inputs.len();

        let items: Vec<BatchItem<In, Out>> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let id = match &options.id_fn {
                    Some(id_fn) => id_fn(index, &input),
                    None => index.to_string(),
                };
                BatchItem::new(id, input)
            })
            .collect();

        let cancel = match &options.cancel {
            Some(external) => external.child_token(),
            None => CancellationToken::new(),
        };
        let deadline_fired = Arc::new(AtomicBool::new(false));
        let deadline = self.config.timeout.map(|timeout| {
            let cancel = cancel.clone();
            let fired = deadline_fired.clone();
            tokio::spawn(async move {
                sleep(timeout).await;
                fired.store(true, Ordering::SeqCst);
                cancel.cancel();
            })
        });

        tracing::info!(
            batch_id = %batch_id,
            total,
            max_concurrent = self.config.max_concurrent,
            "Starting batch"
        );

        let worker = Arc::new(Worker {
            state: Mutex::new(BatchState {
                items,
                progress: BatchProgress::new(total),
                next: 0,
            }),
            operation,
            validate: options.validate,
            on_progress: options.on_progress,
            limiter,
            cancel: cancel.clone(),
            external_cancel: options.cancel,
            deadline_fired,
            max_retries: self.config.max_retries,
            retry_delay: self.config.retry_delay,
            metrics: self.metrics.clone(),
            batch_id: batch_id.clone(),
        });

        let mut workers = JoinSet::new();
        for _ in 0..self.config.max_concurrent.min(total) {
            let worker = worker.clone();
            workers.spawn(async move { worker.run().await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch worker terminated abnormally");
            }
        }
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let cancelled = cancel.is_cancelled();
        let (items, progress) = worker.finish();
        let elapsed = started.elapsed();

        let throughput = if elapsed.as_secs_f64() > 0.0 {
            progress.completed() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let mut metadata = Map::new();
        metadata.insert("duration_secs".to_string(), json!(elapsed.as_secs_f64()));
        metadata.insert("throughput_per_sec".to_string(), json!(throughput));
        metadata.insert("cancelled".to_string(), json!(cancelled));
        metadata.insert(
            "max_concurrent".to_string(),
            json!(self.config.max_concurrent),
        );
        metadata.insert("max_retries".to_string(), json!(self.config.max_retries));
        metadata.insert("rate_limit".to_string(), json!(self.config.rate_limit));
        metadata.insert(
            "started_at".to_string(),
            json!(progress.start_time.to_rfc3339()),
        );
        metadata.insert(
            "finished_at".to_string(),
            json!(progress.end_time.map(|t| t.to_rfc3339())),
        );

        self.metrics
            .observe(names::BATCH_DURATION, &[], elapsed.as_secs_f64());
        tracing::info!(
            batch_id = %batch_id,
            total,
            success = progress.success,
            failed = progress.failed,
            skipped = progress.skipped,
            cancelled,
            duration_ms = elapsed.as_millis() as u64,
            "Batch completed"
        );

        Ok(BatchResult {
            batch_id: batch_id.to_string(),
            items,
            progress,
            metadata,
        })
    }
}

struct BatchState<In, Out> {
    items: Vec<BatchItem<In, Out>>,
    progress: BatchProgress,
    /// Index of the next unclaimed item
    next: usize,
}

enum Outcome<Out> {
    Success { output: Out, retries: u32 },
    Failed { error: String, retries: u32 },
    Skipped { reason: String },
}

/// State and hooks shared by every worker task of one batch
struct Worker<In, Out, F> {
    state: Mutex<BatchState<In, Out>>,
    operation: F,
    validate: Option<ValidateFn<In>>,
    on_progress: Option<ProgressFn>,
    limiter: Option<RateLimiter>,
    cancel: CancellationToken,
    external_cancel: Option<CancellationToken>,
    /// Set by the deadline task before it cancels the batch
    deadline_fired: Arc<AtomicBool>,
    max_retries: u32,
    retry_delay: Duration,
    metrics: Arc<dyn MetricsCollector>,
    batch_id: Arc<str>,
}

impl<In, Out, E, F, Fut> Worker<In, Out, F>
where
    In: Clone,
    E: fmt::Display,
    F: Fn(In) -> Fut,
    Fut: Future<Output = std::result::Result<Out, E>>,
{
    async fn run(&self) {
        while let Some((index, input)) = self.claim() {
            let outcome = self.process_item(&input).await;
            self.complete(index, outcome);
        }
    }

    /// Claim the next pending item, moving it to Processing
    fn claim(&self) -> Option<(usize, In)> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let (index, input, snapshot) = {
            let mut state = self.lock();
            if state.next >= state.items.len() {
                return None;
            }
            let index = state.next;
            state.next += 1;

            let item = &mut state.items[index];
            item.start();
            let input = item.input.clone();
            state
                .progress
                .record(ItemStatus::Pending, ItemStatus::Processing);
            (index, input, state.progress.clone())
        };

        self.emit(&snapshot);
        Some((index, input))
    }

    async fn process_item(&self, input: &In) -> Outcome<Out> {
        if let Some(validate) = &self.validate {
            match panic::catch_unwind(AssertUnwindSafe(|| validate(input))) {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Outcome::Skipped { reason },
                Err(payload) => {
                    return Outcome::Failed {
                        error: format!("validation error: {}", panic_message(&*payload)),
                        retries: 0,
                    }
                }
            }
        }

        let mut retries = 0;
        loop {
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return self.cancelled(),
                    _ = limiter.acquire() => {}
                }
            }

            let attempt =
                AssertUnwindSafe(async { (self.operation)(input.clone()).await }).catch_unwind();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                result = attempt => result,
            };

            let error = match result {
                Ok(Ok(output)) => return Outcome::Success { output, retries },
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("operation panicked: {}", panic_message(&*payload)),
            };

            if retries >= self.max_retries {
                return Outcome::Failed { error, retries };
            }

            retries += 1;
            let delay = self
                .retry_delay
                .checked_mul(retries)
                .unwrap_or(Duration::MAX);
            tracing::debug!(
                batch_id = %self.batch_id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Item failed, retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self) -> Outcome<Out> {
        Outcome::Skipped {
            reason: self.cancel_reason().to_string(),
        }
    }

    fn cancel_reason(&self) -> &'static str {
        match &self.external_cancel {
            Some(external) if external.is_cancelled() => "cancelled",
            _ if self.deadline_fired.load(Ordering::SeqCst) => "deadline exceeded",
            _ => "batch stopped before the item was claimed",
        }
    }

    /// Move a claimed item to its terminal state
    fn complete(&self, index: usize, outcome: Outcome<Out>) {
        let (id, status, snapshot) = {
            let mut state = self.lock();
            let item = &mut state.items[index];
            let from = item.status;
            let changed = match outcome {
                Outcome::Success { output, retries } => item.succeed(output, retries),
                Outcome::Failed { error, retries } => item.fail(error, retries),
                Outcome::Skipped { reason } => item.skip(reason),
            };
            let status = item.status;
            let id = item.id.clone();
            let error = item.error.clone();
            let retries = item.retry_count;
            if changed {
                state.progress.record(from, status);
            }

            match status {
                ItemStatus::Failed => tracing::warn!(
                    batch_id = %self.batch_id,
                    item = %id,
                    retries,
                    error = error.as_deref().unwrap_or_default(),
                    "Item failed"
                ),
                _ => tracing::debug!(
                    batch_id = %self.batch_id,
                    item = %id,
                    %status,
                    retries,
                    "Item finished"
                ),
            }
            (id, status, state.progress.clone())
        };

        self.metrics
            .incr_counter(names::BATCH_ITEMS, &[("status", status.as_str())], 1);
        tracing::trace!(item = %id, "Reporting progress");
        self.emit(&snapshot);
    }

    /// Settle items left behind by cancellation and return the final state
    fn finish(&self) -> (Vec<BatchItem<In, Out>>, BatchProgress) {
        let reason = self.cancel_reason();
        let (items, progress, snapshots) = {
            let mut state = self.lock();
            let mut snapshots = Vec::new();
            for index in 0..state.items.len() {
                let item = &mut state.items[index];
                let from = item.status;
                let settled = match from {
                    ItemStatus::Pending => item.skip(reason.to_string()),
                    ItemStatus::Processing => item.fail(
                        "worker terminated before the item finished".to_string(),
                        item.retry_count,
                    ),
                    _ => false,
                };
                if settled {
                    let to = item.status;
                    self.metrics
                        .incr_counter(names::BATCH_ITEMS, &[("status", to.as_str())], 1);
                    state.progress.record(from, to);
                    snapshots.push(state.progress.clone());
                }
            }
            state.progress.finish();
            if let Some(last) = snapshots.last_mut() {
                *last = state.progress.clone();
            }
            (
                std::mem::take(&mut state.items),
                state.progress.clone(),
                snapshots,
            )
        };

        if !snapshots.is_empty() {
            tracing::warn!(
                batch_id = %self.batch_id,
                swept = snapshots.len(),
                reason,
                "Batch stopped early"
            );
        }
        for snapshot in &snapshots {
            self.emit(snapshot);
        }
        (items, progress)
    }

    fn emit(&self, snapshot: &BatchProgress) {
        let Some(on_progress) = &self.on_progress else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_progress(snapshot))) {
            tracing::error!(
                batch_id = %self.batch_id,
                panic = %panic_message(&*payload),
                "Progress callback panicked"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchState<In, Out>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};
    use vigil_observability::InMemoryCollector;

    fn processor(max_concurrent: usize, max_retries: u32) -> BatchProcessor {
        BatchProcessor::new(BatchConfig {
            max_concurrent,
            max_retries,
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero = assert_err!(BatchProcessor::new(BatchConfig {
            max_concurrent: 0,
            ..Default::default()
        }));
        assert!(matches!(zero, BatchError::InvalidConfig(_)));
        assert_err!(BatchProcessor::new(BatchConfig {
            rate_limit: Some(0.0),
            ..Default::default()
        }));
        let tiny = assert_err!(BatchProcessor::new(BatchConfig {
            rate_limit: Some(1e-30),
            ..Default::default()
        }));
        assert!(matches!(tiny, BatchError::InvalidConfig(_)));
        assert_ok!(BatchConfig::default().validate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_keep_input_order() {
        let result = processor(4, 0)
            .process(
                (0..20u64).collect(),
                |n: u64| async move {
                    // Later items finish first
                    sleep(Duration::from_millis(200 - n * 10)).await;
                    Ok::<_, String>(n * 2)
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = result.items.iter().map(|i| i.id.as_str()).collect();
        let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        assert_eq!(ids, expected);
        let outputs: Vec<u64> = result.outputs().into_iter().copied().collect();
        assert_eq!(outputs, (0..20).map(|n| n * 2).collect::<Vec<_>>());
        assert!(result.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        let result = processor(3, 0)
            .process(
                (0..12).collect::<Vec<u32>>(),
                move |_| {
                    let (running, peak) = (r.clone(), p.clone());
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    }
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.success, 12);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_items_never_reach_operation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = processor(2, 0)
            .process(
                vec![1, -1, 2, -5],
                move |n: i32| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, String>(n) }
                },
                BatchOptions::new().validate(|n: &i32| {
                    if *n < 0 {
                        Err(format!("negative value {n}"))
                    } else {
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.progress.skipped, 2);
        assert_eq!(result.items[1].status, ItemStatus::Skipped);
        assert_eq!(result.items[1].error.as_deref(), Some("negative value -1"));
        assert_eq!(result.items[1].retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_panic_fails_only_that_item() {
        let result = processor(2, 0)
            .process(
                vec![1, 2, 3],
                |n: i32| async move { Ok::<_, String>(n) },
                BatchOptions::new().validate(|n: &i32| {
                    if *n == 2 {
                        panic!("validator bug");
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.success, 2);
        assert_eq!(result.progress.failed, 1);
        assert_eq!(
            result.items[1].error.as_deref(),
            Some("validation error: validator bug")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let start = Instant::now();

        let result = processor(1, 3)
            .process(
                vec!["flaky"],
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(format!("attempt {n} failed"))
                        } else {
                            Ok("done")
                        }
                    }
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        let item = &result.items[0];
        assert_eq!(item.status, ItemStatus::Success);
        assert_eq!(item.retry_count, 2);
        // Linear backoff: 100ms then 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_item_records_last_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result = processor(1, 2)
            .process(
                vec![()],
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(format!("failure #{n}")) }
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        let item = &result.items[0];
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.error.as_deref(), Some("failure #2"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_panic_is_contained() {
        let result = processor(2, 0)
            .process(
                vec![1, 2, 3],
                |n: i32| async move {
                    if n == 2 {
                        panic!("boom on {n}");
                    }
                    Ok::<_, String>(n)
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.success, 2);
        assert_eq!(result.progress.failed, 1);
        assert_eq!(
            result.items[1].error.as_deref(),
            Some("operation panicked: boom on 2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_callback_sees_every_transition() {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();

        let result = processor(2, 0)
            .process(
                vec![1, 2, 3],
                |n: i32| async move { Ok::<_, String>(n) },
                BatchOptions::new().on_progress(move |p| {
                    sink.lock().unwrap().push(p.clone());
                }),
            )
            .await
            .unwrap();

        let snapshots = snapshots.lock().unwrap();
        // One claim and one completion per item
        assert_eq!(snapshots.len(), 6);
        for p in snapshots.iter() {
            assert_eq!(
                p.pending + p.processing + p.success + p.failed + p.skipped,
                3
            );
        }
        assert!(result.progress.end_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_callback_panic_is_swallowed() {
        let result = processor(2, 0)
            .process(
                vec![1, 2],
                |n: i32| async move { Ok::<_, String>(n) },
                BatchOptions::new().on_progress(|_| panic!("callback bug")),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.success, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spaces_dispatches() {
        let processor = BatchProcessor::new(BatchConfig {
            max_concurrent: 5,
            max_retries: 0,
            rate_limit: Some(10.0),
            ..Default::default()
        })
        .unwrap();
        let start = Instant::now();

        let result = processor
            .process(
                (0..5).collect::<Vec<u32>>(),
                |n| async move { Ok::<_, String>(n) },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.success, 5);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_ids() {
        let result = processor(2, 0)
            .process(
                vec!["web-01", "db-01"],
                |host: &'static str| async move { Ok::<_, String>(host.len()) },
                BatchOptions::new().id_fn(|_, host: &&'static str| format!("host:{host}")),
            )
            .await
            .unwrap();

        assert_eq!(result.item("host:db-01").unwrap().output, Some(5));
        assert!(result.item("0").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_yields_partial_result() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let result = processor(1, 0)
            .process(
                (0..10).collect::<Vec<u32>>(),
                |n| async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(n)
                },
                BatchOptions::new().cancel_token(cancel),
            )
            .await
            .unwrap();

        assert!(result.was_cancelled());
        assert_eq!(result.progress.success, 2);
        assert_eq!(result.progress.skipped, 8);
        assert_eq!(result.progress.completed(), 10);
        assert!(result
            .skipped()
            .all(|item| item.error.as_deref() == Some("cancelled")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_batch() {
        let processor = BatchProcessor::new(BatchConfig {
            max_concurrent: 2,
            max_retries: 0,
            timeout: Some(Duration::from_millis(150)),
            ..Default::default()
        })
        .unwrap();

        let result = processor
            .process(
                (0..6).collect::<Vec<u32>>(),
                |n| async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(n)
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert!(result.was_cancelled());
        assert_eq!(result.progress.success, 2);
        assert_eq!(result.progress.skipped, 4);
        assert_eq!(
            result.skipped().next().unwrap().error.as_deref(),
            Some("deadline exceeded")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_delay_saturates() {
        let processor = BatchProcessor::new(BatchConfig {
            max_concurrent: 1,
            max_retries: 2,
            retry_delay: Duration::from_secs(u64::MAX / 2 + 1),
            timeout: None,
            ..Default::default()
        })
        .unwrap();

        let result = processor
            .process(
                vec![1u32, 2, 3],
                |_| async move { Err::<u32, _>("boom") },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert!(!result.was_cancelled());
        assert_eq!(result.progress.failed, 3);
        assert_eq!(result.progress.skipped, 0);
        for item in &result.items {
            assert_eq!(item.status, ItemStatus::Failed);
            assert_eq!(item.retry_count, 2);
            assert_eq!(item.error.as_deref(), Some("boom"));
        }
    }

    #[tokio::test]
    async fn test_early_stop_reports_each_skipped_item() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();

        let result = processor(2, 0)
            .process(
                (0..5).collect::<Vec<u32>>(),
                |n| async move { Ok::<_, String>(n) },
                BatchOptions::new()
                    .cancel_token(cancel)
                    .on_progress(move |progress: &BatchProgress| {
                        sink.lock().unwrap().push(progress.clone())
                    }),
            )
            .await
            .unwrap();

        assert_eq!(result.progress.skipped, 5);
        assert!(result
            .skipped()
            .all(|item| item.error.as_deref() == Some("cancelled")));

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 5);
        let skipped: Vec<usize> = snapshots.iter().map(|p| p.skipped).collect();
        assert_eq!(skipped, vec![1, 2, 3, 4, 5]);
        assert!(snapshots.last().unwrap().end_time.is_some());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let result = processor(4, 0)
            .process(
                Vec::<u32>::new(),
                |n| async move { Ok::<_, String>(n) },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert!(result.progress.is_complete());
        assert!(result.progress.end_time.is_some());
        assert_eq!(result.success_rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_and_metadata() {
        let metrics = Arc::new(InMemoryCollector::new());
        let processor = processor(2, 0).with_metrics(metrics.clone());

        let result = processor
            .process(
                vec![1, 2, 3],
                |n: i32| async move {
                    if n == 3 {
                        Err("bad".to_string())
                    } else {
                        Ok(n)
                    }
                },
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            metrics.counter(names::BATCH_ITEMS, &[("status", "success")]),
            2
        );
        assert_eq!(
            metrics.counter(names::BATCH_ITEMS, &[("status", "failed")]),
            1
        );
        assert_eq!(metrics.observations(names::BATCH_DURATION, &[]).len(), 1);
        assert_eq!(result.metadata["max_concurrent"], json!(2));
        assert_eq!(result.metadata["cancelled"], json!(false));
        assert!(Uuid::parse_str(&result.batch_id).is_ok());
    }
}
