//! Final outcome of a batch run

use crate::item::{BatchItem, ItemStatus};
use crate::progress::BatchProgress;
use serde::Serialize;
use serde_json::{Map, Value};

/// Result of a batch, owned by the caller once returned
///
/// `items` is in the same order as the input collection.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<In, Out> {
    pub batch_id: String,
    pub items: Vec<BatchItem<In, Out>>,
    pub progress: BatchProgress,
    /// Timing summary and the settings the batch ran with
    pub metadata: Map<String, Value>,
}

impl<In, Out> BatchResult<In, Out> {
    pub fn successes(&self) -> impl Iterator<Item = &BatchItem<In, Out>> {
        self.with_status(ItemStatus::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchItem<In, Out>> {
        self.with_status(ItemStatus::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &BatchItem<In, Out>> {
        self.with_status(ItemStatus::Skipped)
    }

    /// Outputs of successful items, in input order
    pub fn outputs(&self) -> Vec<&Out> {
        self.items
            .iter()
            .filter_map(|item| item.output.as_ref())
            .collect()
    }

    pub fn into_outputs(self) -> Vec<Out> {
        self.items
            .into_iter()
            .filter_map(|item| item.output)
            .collect()
    }

    /// Look up an item by id
    pub fn item(&self, id: &str) -> Option<&BatchItem<In, Out>> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Get success rate as percentage of all items
    pub fn success_rate(&self) -> f64 {
        if self.progress.total_items == 0 {
            0.0
        } else {
            (self.progress.success as f64 / self.progress.total_items as f64) * 100.0
        }
    }

    /// Check if all items succeeded
    pub fn all_succeeded(&self) -> bool {
        self.progress.success == self.progress.total_items
    }

    /// Whether the batch was stopped by cancellation or its deadline
    pub fn was_cancelled(&self) -> bool {
        self.metadata
            .get("cancelled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn with_status(&self, status: ItemStatus) -> impl Iterator<Item = &BatchItem<In, Out>> {
        self.items.iter().filter(move |item| item.status == status)
    }
}
