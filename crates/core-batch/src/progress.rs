//! Live counters of a running batch

use crate::item::ItemStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress information for a batch
///
/// The five status counters always sum to `total_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_items: usize,
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub start_time: DateTime<Utc>,
    /// Set once when the batch completes
    pub end_time: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            pending: total_items,
            processing: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Items in a terminal state
    pub fn completed(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// Completion percentage (100.0 for an empty batch)
    pub fn progress_percent(&self) -> f64 {
        if self.total_items == 0 {
            100.0
        } else {
            (self.completed() as f64 / self.total_items as f64) * 100.0
        }
    }

    /// Time from start until completion, or until now while running
    pub fn duration(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }

    /// Completed items per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.completed() as f64 / secs
        }
    }

    /// Time left at the current throughput, `None` before anything completed
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let throughput = self.throughput();
        if throughput <= 0.0 {
            return None;
        }
        let remaining = self.total_items.saturating_sub(self.completed()) as f64;
        Duration::try_from_secs_f64(remaining / throughput).ok()
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.total_items
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Move one item between two counters
    pub(crate) fn record(&mut self, from: ItemStatus, to: ItemStatus) {
        let source = self.counter_mut(from);
        *source = source.saturating_sub(1);
        *self.counter_mut(to) += 1;
    }

    /// Set the end time; later calls keep the first value
    pub(crate) fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }

    fn counter_mut(&mut self, status: ItemStatus) -> &mut usize {
        match status {
            ItemStatus::Pending => &mut self.pending,
            ItemStatus::Processing => &mut self.processing,
            ItemStatus::Success => &mut self.success,
            ItemStatus::Failed => &mut self.failed,
            ItemStatus::Skipped => &mut self.skipped,
        }
    }
}
