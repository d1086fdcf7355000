use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An item that reached `Failed` in this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: String,
    pub attempts: u32,
    pub reason: String,
}

/// Structured record produced when a batch run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    /// Items enumerated by the work source.
    pub total: usize,
    /// Items already done in the checkpoint before this run.
    pub skipped: usize,
    /// Items completed in this run.
    pub done: usize,
    pub failed: Vec<FailedItem>,
    /// Items never submitted because the run was stopped.
    pub not_started: usize,
    pub final_workers: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Items with a terminal state, counting checkpointed ones.
    pub fn accounted(&self) -> usize {
        self.skipped + self.done + self.failed.len()
    }

    /// Every item is done, either now or in an earlier run.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_started == 0 && self.accounted() == self.total
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
