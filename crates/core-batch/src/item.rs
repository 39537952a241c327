//! Per-item state of a batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of one batch item
///
/// Transitions are monotonic: `Pending -> Processing -> {Success, Failed, Skipped}`,
/// or `Pending -> Skipped` for items never claimed before cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Success | ItemStatus::Failed | ItemStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input of a batch together with its outcome
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem<In, Out> {
    pub id: String,
    pub input: In,
    pub status: ItemStatus,
    pub output: Option<Out>,
    /// Failure text for `Failed`, reason for `Skipped`
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Attempts beyond the first
    pub retry_count: u32,
}

impl<In, Out> BatchItem<In, Out> {
    pub fn new(id: impl Into<String>, input: In) -> Self {
        Self {
            id: id.into(),
            input,
            status: ItemStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
            retry_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time spent processing, once the item has finished
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        (finished - started).to_std().ok()
    }

    /// Pending -> Processing. Returns false if the item was not pending.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != ItemStatus::Pending {
            return false;
        }
        self.status = ItemStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    pub(crate) fn succeed(&mut self, output: Out, retry_count: u32) -> bool {
        if !self.finish(ItemStatus::Success) {
            return false;
        }
        self.output = Some(output);
        self.retry_count = retry_count;
        true
    }

    pub(crate) fn fail(&mut self, error: String, retry_count: u32) -> bool {
        if !self.finish(ItemStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        self.retry_count = retry_count;
        true
    }

    pub(crate) fn skip(&mut self, reason: String) -> bool {
        if !self.finish(ItemStatus::Skipped) {
            return false;
        }
        self.error = Some(reason);
        true
    }

    fn finish(&mut self, status: ItemStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        true
    }
}
