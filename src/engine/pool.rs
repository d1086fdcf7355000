//! Adaptive worker pool.
//!
//! A slot gate caps concurrent calls at the monitor's current worker count.
//! Each execution paces, calls the translate callback under a deadline,
//! classifies the result and reports it to the monitor before the slot is
//! released, so a resize applies to the very next acquisition.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::debug;

use super::item::{Outcome, WorkItem};
use super::monitor::{Adjustment, PoolState, RateMonitor};
use super::pacer::Pacer;
use crate::llm::ApiError;

/// The "translate one unit of work" collaborator.
pub trait Translate: Send + Sync + 'static {
    fn translate(&self, item: &WorkItem) -> impl Future<Output = Result<String, ApiError>> + Send;
}

/// Map a translate result to an [`Outcome`].
pub fn classify(result: Result<String, ApiError>) -> Outcome {
    match result {
        Ok(text) => Outcome::Success(text),
        Err(e) if e.is_rate_limit() => Outcome::Throttled {
            retry_after: e.retry_after(),
        },
        Err(e) if e.is_retryable() => Outcome::TransientError(e.to_string()),
        Err(e) => Outcome::FatalError(e.to_string()),
    }
}

struct SlotGate {
    active: Mutex<usize>,
    released: Notify,
}

/// Held for the duration of one call; frees the slot on drop.
struct Slot<'a> {
    gate: &'a SlotGate,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut active = self.gate.active.lock().unwrap_or_else(|p| p.into_inner());
        *active -= 1;
        drop(active);
        self.gate.released.notify_waiters();
    }
}

pub struct WorkerPool<T> {
    translator: Arc<T>,
    monitor: Mutex<RateMonitor>,
    pacer: Pacer,
    gate: SlotGate,
    call_timeout: Duration,
}

impl<T: Translate> WorkerPool<T> {
    pub fn new(translator: Arc<T>, monitor: RateMonitor, call_timeout: Duration) -> Self {
        let rpm = monitor.state().target_rpm;
        Self {
            translator,
            monitor: Mutex::new(monitor),
            pacer: Pacer::new(rpm, None),
            gate: SlotGate {
                active: Mutex::new(0),
                released: Notify::new(),
            },
            call_timeout,
        }
    }

    /// Also pace on estimated tokens per minute. `None` leaves only the
    /// request ceiling.
    pub fn with_token_budget(mut self, tpm: Option<u32>) -> Self {
        let rpm = self.state().target_rpm;
        self.pacer = Pacer::new(rpm, tpm);
        self
    }

    /// Current worker-slot budget.
    pub fn workers(&self) -> usize {
        self.lock_monitor().workers()
    }

    pub fn state(&self) -> PoolState {
        self.lock_monitor().state()
    }

    /// Calls currently holding a slot.
    #[cfg(test)]
    pub fn active(&self) -> usize {
        *self.gate.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run one attempt for `item` and return its classified outcome.
    pub async fn execute(&self, item: &WorkItem) -> Outcome {
        let _slot = self.acquire().await;
        self.pacer.admit(item.payload.estimated_tokens()).await;

        let result = match timeout(self.call_timeout, self.translator.translate(item)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };
        let outcome = classify(result);
        debug!(item = %item.id, attempt = item.attempts, %outcome, "call finished");

        let adjustment = self.lock_monitor().observe(outcome.kind());
        if matches!(adjustment, Adjustment::Grow { .. }) {
            self.gate.released.notify_waiters();
        }
        outcome
    }

    async fn acquire(&self) -> Slot<'_> {
        loop {
            // Register before checking so a release between check and await is not lost.
            let released = self.gate.released.notified();
            {
                let limit = self.workers();
                let mut active = self.gate.active.lock().unwrap_or_else(|p| p.into_inner());
                if *active < limit {
                    *active += 1;
                    return Slot { gate: &self.gate };
                }
            }
            released.await;
        }
    }

    fn lock_monitor(&self) -> std::sync::MutexGuard<'_, RateMonitor> {
        self.monitor.lock().unwrap_or_else(|p| p.into_inner())
    }
}
