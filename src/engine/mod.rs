//! Bounded-concurrency, rate-adaptive batch engine.

pub mod checkpoint;
pub mod dispatcher;
pub mod item;
pub mod monitor;
pub mod pacer;
pub mod pool;
pub mod summary;

pub use checkpoint::CheckpointStore;
pub use dispatcher::{BatchObserver, BatchPhase, Dispatcher, ResultSink};
pub use item::{Outcome, Payload, RetryPolicy, WorkItem};
pub use monitor::{MonitorConfig, RateMonitor};
pub use pool::{Translate, WorkerPool};
pub use summary::BatchSummary;
