//! Batch dispatcher: `Loading → Dispatching → Draining → Complete`.
//!
//! The dispatcher owns every item transition. Worker tasks only return
//! `(item, outcome)`; settling them (sink, checkpoint, retry schedule,
//! failure record) happens on the dispatcher's own loop, which also drives
//! the periodic checkpoint flush and reacts to stop requests.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::item::{ItemStatus, Lifecycle, Outcome, RetryPolicy, Transition, WorkItem};
use super::pool::{Translate, WorkerPool};
use super::summary::{BatchSummary, FailedItem};
use crate::error::LocflowError;

/// Durable destination for finished translations.
///
/// A row must be durable when `write` returns: the checkpoint records the
/// item as done right after. `write` must also be idempotent for repeated
/// `(id, result)` pairs because a resumed run may deliver an item the sink
/// already holds.
pub trait ResultSink {
    fn write(&mut self, item_id: &str, result: &str) -> Result<(), LocflowError>;

    fn flush(&mut self) -> Result<(), LocflowError> {
        Ok(())
    }
}

/// Progress hooks for presentation layers. All methods default to no-ops.
pub trait BatchObserver {
    fn started(&self, _pending: usize, _skipped: usize) {}
    fn item_done(&self, _item: &WorkItem) {}
    fn item_retrying(&self, _item: &WorkItem, _reason: &Outcome, _delay: Duration) {}
    fn item_failed(&self, _item: &WorkItem, _reason: &str) {}
    fn workers_changed(&self, _workers: usize) {}
    fn phase_changed(&self, _phase: BatchPhase) {}
}

#[cfg(test)]
pub struct NoopObserver;

#[cfg(test)]
impl BatchObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Loading,
    Dispatching,
    Draining,
    Complete,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPhase::Loading => write!(f, "LOADING"),
            BatchPhase::Dispatching => write!(f, "DISPATCHING"),
            BatchPhase::Draining => write!(f, "DRAINING"),
            BatchPhase::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Default)]
struct RunState {
    queue: VecDeque<WorkItem>,
    retrying: Vec<(Instant, WorkItem)>,
    done: usize,
    failed: Vec<FailedItem>,
}

impl RunState {
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.retrying.len() {
            if self.retrying[i].0 <= now {
                let (_, item) = self.retrying.swap_remove(i);
                self.queue.push_back(item);
            } else {
                i += 1;
            }
        }
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.retrying.iter().map(|(at, _)| *at).min()
    }

    fn fail(&mut self, item: &WorkItem, reason: String) {
        self.failed.push(FailedItem {
            item_id: item.id.clone(),
            attempts: item.attempts,
            reason,
        });
    }
}

pub struct Dispatcher<T> {
    pool: Arc<WorkerPool<T>>,
    checkpoint: Arc<CheckpointStore>,
    retry: RetryPolicy,
    flush_interval: Duration,
    phase: BatchPhase,
}

impl<T: Translate> Dispatcher<T> {
    pub fn new(
        pool: Arc<WorkerPool<T>>,
        checkpoint: Arc<CheckpointStore>,
        retry: RetryPolicy,
        flush_interval: Duration,
    ) -> Self {
        Self {
            pool,
            checkpoint,
            retry,
            flush_interval: flush_interval.max(Duration::from_millis(1)),
            phase: BatchPhase::Loading,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn pool(&self) -> &WorkerPool<T> {
        &self.pool
    }

    fn enter<O: BatchObserver>(&mut self, phase: BatchPhase, observer: &O) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "batch phase");
            self.phase = phase;
            observer.phase_changed(phase);
        }
    }

    /// Split the enumerated items into the pending queue, dropping ids
    /// already checkpointed and duplicate ids. Returns `(queue, skipped)`.
    pub fn pending(&self, items: Vec<WorkItem>) -> (VecDeque<WorkItem>, usize) {
        let completed = self.checkpoint.load_all();
        let mut seen = std::collections::HashSet::new();
        let mut skipped = 0;
        let mut queue = VecDeque::with_capacity(items.len());
        for item in items {
            if !seen.insert(item.id.clone()) {
                warn!(item = %item.id, "duplicate item id in work source, ignoring");
                continue;
            }
            if completed.contains_key(&item.id) {
                skipped += 1;
            } else {
                queue.push_back(item);
            }
        }
        (queue, skipped)
    }

    /// Run the batch until every pending item is terminal or a stop is
    /// requested. Only checkpoint failures abort the run.
    pub async fn run<S, O>(
        &mut self,
        items: Vec<WorkItem>,
        sink: &mut S,
        observer: &O,
        mut stop: watch::Receiver<bool>,
    ) -> Result<BatchSummary, LocflowError>
    where
        S: ResultSink,
        O: BatchObserver,
    {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        self.phase = BatchPhase::Loading;
        observer.phase_changed(BatchPhase::Loading);
        let (queue, skipped) = self.pending(items);
        // Duplicate ids collapse into one item.
        let total = queue.len() + skipped;
        info!(%run_id, total, skipped, pending = queue.len(), "batch loaded");
        observer.started(queue.len(), skipped);

        let mut state = RunState {
            queue,
            ..Default::default()
        };
        let mut in_flight: JoinSet<(WorkItem, Outcome)> = JoinSet::new();
        let mut in_flight_ids: HashMap<tokio::task::Id, (String, u32)> = HashMap::new();

        let mut stopping = false;
        let mut watching_stop = true;
        let mut flush_tick = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_workers = self.pool.workers();

        self.enter(BatchPhase::Dispatching, observer);

        loop {
            if !stopping && *stop.borrow() {
                stopping = true;
                self.enter(BatchPhase::Draining, observer);
                info!(in_flight = in_flight.len(), "stop requested, draining");
            }

            state.promote_due(Instant::now());

            if !stopping {
                let limit = self.pool.workers();
                while in_flight.len() < limit {
                    let Some(mut item) = state.queue.pop_front() else {
                        break;
                    };
                    Lifecycle::start(&mut item);
                    debug!(item = %item.id, attempt = item.attempts, "submitting");
                    let pool = Arc::clone(&self.pool);
                    let meta = (item.id.clone(), item.attempts);
                    let handle = in_flight.spawn(async move {
                        let outcome = pool.execute(&item).await;
                        (item, outcome)
                    });
                    in_flight_ids.insert(handle.id(), meta);
                }
                // Only in-flight calls left; a retry scheduled from them
                // moves the run back to dispatching.
                let phase = if state.queue.is_empty() && state.retrying.is_empty() {
                    BatchPhase::Draining
                } else {
                    BatchPhase::Dispatching
                };
                self.enter(phase, observer);
            }

            if in_flight.is_empty()
                && (stopping || (state.queue.is_empty() && state.retrying.is_empty()))
            {
                break;
            }

            let next_retry = state.next_retry_at();

            tokio::select! {
                joined = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    match joined {
                        Some(Ok((task_id, (item, outcome)))) => {
                            in_flight_ids.remove(&task_id);
                            self.settle(item, outcome, sink, observer, &mut state)?;
                        }
                        Some(Err(join_err)) => {
                            if let Some((item_id, attempts)) = in_flight_ids.remove(&join_err.id()) {
                                let mut item = WorkItem::text(item_id, "");
                                item.attempts = attempts;
                                item.status = ItemStatus::Failed;
                                let reason = format!("worker task failed: {join_err}");
                                warn!(item = %item.id, %reason, "item failed");
                                observer.item_failed(&item, &reason);
                                state.fail(&item, reason);
                            }
                        }
                        None => {}
                    }
                }
                _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() && !stopping => {}
                _ = flush_tick.tick() => {
                    self.checkpoint.flush()?;
                    sink.flush()?;
                }
                changed = stop.changed(), if watching_stop && !stopping => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask us to stop anymore.
                        watching_stop = false;
                    }
                }
            }

            let workers = self.pool.workers();
            if workers != last_workers {
                observer.workers_changed(workers);
                last_workers = workers;
            }
        }

        // Completion is only reported once every result of this run is durable.
        self.checkpoint.flush()?;
        sink.flush()?;
        self.enter(BatchPhase::Complete, observer);

        let unfinished = state.queue.len() + state.retrying.len();
        let summary = BatchSummary {
            run_id,
            total,
            skipped,
            done: state.done,
            failed: state.failed,
            not_started: unfinished,
            final_workers: self.pool.workers(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        info!(
            run_id = %summary.run_id,
            done = summary.done,
            failed = summary.failed_count(),
            skipped = summary.skipped,
            unfinished,
            workers = summary.final_workers,
            "batch finished"
        );
        Ok(summary)
    }

    fn settle<S, O>(
        &self,
        mut item: WorkItem,
        outcome: Outcome,
        sink: &mut S,
        observer: &O,
        state: &mut RunState,
    ) -> Result<(), LocflowError>
    where
        S: ResultSink,
        O: BatchObserver,
    {
        match Lifecycle::next(&mut item, outcome, &self.retry) {
            Transition::Done(result) => {
                // Sink first: a crash before the append re-sends this row on resume.
                if let Err(e) = sink.write(&item.id, &result) {
                    item.status = ItemStatus::Failed;
                    let reason = format!("sink write failed: {e}");
                    warn!(item = %item.id, %reason, "item failed");
                    observer.item_failed(&item, &reason);
                    state.fail(&item, reason);
                    return Ok(());
                }
                self.checkpoint.append(&item.id, &result)?;
                state.done += 1;
                debug!(item = %item.id, attempts = item.attempts, "item done");
                observer.item_done(&item);
            }
            Transition::Retry { delay, reason } => {
                debug!(item = %item.id, %reason, delay_ms = delay.as_millis() as u64, "retry scheduled");
                observer.item_retrying(&item, &reason, delay);
                state.retrying.push((Instant::now() + delay, item));
            }
            Transition::Failed(reason) => {
                warn!(item = %item.id, attempts = item.attempts, %reason, "item failed");
                observer.item_failed(&item, &reason);
                state.fail(&item, reason);
            }
        }
        Ok(())
    }
}
