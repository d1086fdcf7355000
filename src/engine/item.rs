use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Everything the translate callback needs for one line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Primary source text.
    pub text: String,
    /// Same line in a second source language, used for tone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Neighbouring lines of the same scene.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Payload {
    /// Rough token cost of one request for this payload, used by the pacer's
    /// per-minute token budget. Clamped to `200..=800`.
    pub fn estimated_tokens(&self) -> u32 {
        let alt = self.alt_text.as_deref().map_or(0, |a| a.chars().count());
        let estimate = self.text.chars().count() + alt / 2;
        estimate.clamp(200, 800) as u32
    }
}

/// Lifecycle status of a work item within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    InFlight,
    Retrying,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "PENDING"),
            ItemStatus::InFlight => write!(f, "IN_FLIGHT"),
            ItemStatus::Retrying => write!(f, "RETRYING"),
            ItemStatus::Done => write!(f, "DONE"),
            ItemStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One line to translate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub payload: Payload,
    pub status: ItemStatus,
    /// Calls made so far in this run.
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            status: ItemStatus::Pending,
            attempts: 0,
        }
    }

    /// Shorthand for items that only carry text.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            Payload {
                text: text.into(),
                ..Default::default()
            },
        )
    }

    /// Retries already spent (attempts beyond the first call).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Classified result of a single API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Throttled { retry_after: Option<Duration> },
    TransientError(String),
    FatalError(String),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Throttled { .. } => OutcomeKind::Throttled,
            Outcome::TransientError(_) => OutcomeKind::Transient,
            Outcome::FatalError(_) => OutcomeKind::Fatal,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(_) => write!(f, "success"),
            Outcome::Throttled {
                retry_after: Some(d),
            } => write!(f, "throttled (retry after {}ms)", d.as_millis()),
            Outcome::Throttled { retry_after: None } => write!(f, "throttled"),
            Outcome::TransientError(msg) => write!(f, "transient error: {msg}"),
            Outcome::FatalError(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

/// Payload-free tag of an [`Outcome`], kept in the monitor's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Throttled,
    Transient,
    Fatal,
}

/// Backoff schedule for throttled and transient items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first call before an item is failed.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound of the uniform random delay added to each backoff.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 20_000,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay for a given retry number (1-based).
    /// delay = base * 2^(retry - 1), capped at `backoff_max_ms`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Full delay including jitter. A server-provided `retry_after` is a floor.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        let delay = self.base_delay(retry) + Duration::from_millis(jitter);
        match retry_after {
            Some(floor) => delay.max(floor),
            None => delay,
        }
    }
}

/// What the dispatcher must do with an item after an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Done(String),
    Retry { delay: Duration, reason: Outcome },
    Failed(String),
}

/// Drives a [`WorkItem`] through `Pending → InFlight → {Done | Retrying → InFlight | Failed}`.
pub struct Lifecycle;

impl Lifecycle {
    /// Mark the item as submitted and count the attempt.
    pub fn start(item: &mut WorkItem) {
        debug_assert!(!item.status.is_terminal(), "terminal item resubmitted");
        item.status = ItemStatus::InFlight;
        item.attempts += 1;
    }

    /// Apply an outcome to an in-flight item.
    ///
    /// - `Success` is terminal `Done`.
    /// - `Throttled` and `TransientError` retry while retries remain, otherwise
    ///   the item fails with the last reason.
    /// - `FatalError` fails immediately.
    pub fn next(item: &mut WorkItem, outcome: Outcome, policy: &RetryPolicy) -> Transition {
        let transition = match outcome {
            Outcome::Success(result) => Transition::Done(result),
            Outcome::FatalError(reason) => Transition::Failed(reason),
            retryable => {
                if item.retries() < policy.max_retries {
                    let retry_after = match &retryable {
                        Outcome::Throttled { retry_after } => *retry_after,
                        _ => None,
                    };
                    Transition::Retry {
                        delay: policy.delay_for(item.attempts, retry_after),
                        reason: retryable,
                    }
                } else {
                    Transition::Failed(format!(
                        "gave up after {} attempts: {retryable}",
                        item.attempts
                    ))
                }
            }
        };

        item.status = match &transition {
            Transition::Done(_) => ItemStatus::Done,
            Transition::Retry { .. } => ItemStatus::Retrying,
            Transition::Failed(_) => ItemStatus::Failed,
        };

        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
            jitter_ms: 0,
        }
    }

    #[test]
    fn new_item_defaults() {
        let item = WorkItem::text("line-1", "Hello");
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.retries(), 0);
        assert_eq!(item.payload.text, "Hello");
        assert!(item.payload.speaker.is_none());
    }

    #[test]
    fn token_estimate_weights_alt_text_by_half_and_clamps() {
        let mut item = WorkItem::text("line-1", "a".repeat(300));
        assert_eq!(item.payload.estimated_tokens(), 300);

        item.payload.alt_text = Some("б".repeat(100));
        assert_eq!(item.payload.estimated_tokens(), 350);

        assert_eq!(WorkItem::text("short", "hi").payload.estimated_tokens(), 200);
        assert_eq!(WorkItem::text("long", "x".repeat(5000)).payload.estimated_tokens(), 800);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(400));
        assert_eq!(p.base_delay(4), Duration::from_millis(800));
        assert_eq!(p.base_delay(5), Duration::from_millis(1000));
        assert_eq!(p.base_delay(60), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let p = RetryPolicy {
            jitter_ms: 50,
            ..policy(3)
        };
        for _ in 0..100 {
            let d = p.delay_for(1, None);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn retry_after_is_a_floor() {
        let p = policy(3);
        let d = p.delay_for(1, Some(Duration::from_secs(3)));
        assert_eq!(d, Duration::from_secs(3));
        let d = p.delay_for(3, Some(Duration::from_millis(10)));
        assert_eq!(d, Duration::from_millis(400));
    }

    #[test]
    fn success_is_done() {
        let mut item = WorkItem::text("a", "x");
        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::Success("y".into()), &policy(3));
        assert_eq!(t, Transition::Done("y".into()));
        assert_eq!(item.status, ItemStatus::Done);
    }

    #[test]
    fn transient_retries_then_fails_once() {
        let p = policy(2);
        let mut item = WorkItem::text("a", "x");

        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::TransientError("timeout".into()), &p);
        assert!(matches!(t, Transition::Retry { .. }));
        assert_eq!(item.status, ItemStatus::Retrying);

        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::TransientError("timeout".into()), &p);
        assert!(matches!(t, Transition::Retry { .. }));

        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::TransientError("timeout".into()), &p);
        assert_eq!(
            t,
            Transition::Failed("gave up after 3 attempts: transient error: timeout".into())
        );
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempts, 3);
    }

    #[test]
    fn throttled_retry_honors_server_delay() {
        let mut item = WorkItem::text("a", "x");
        Lifecycle::start(&mut item);
        let t = Lifecycle::next(
            &mut item,
            Outcome::Throttled {
                retry_after: Some(Duration::from_secs(7)),
            },
            &policy(1),
        );
        match t {
            Transition::Retry { delay, reason } => {
                assert_eq!(delay, Duration::from_secs(7));
                assert!(matches!(reason, Outcome::Throttled { .. }));
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn fatal_fails_immediately() {
        let mut item = WorkItem::text("a", "x");
        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::FatalError("401".into()), &policy(5));
        assert_eq!(t, Transition::Failed("401".into()));
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn zero_retries_fails_on_first_transient() {
        let mut item = WorkItem::text("a", "x");
        Lifecycle::start(&mut item);
        let t = Lifecycle::next(&mut item, Outcome::Throttled { retry_after: None }, &policy(0));
        assert!(matches!(t, Transition::Failed(_)));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(
            Outcome::Throttled {
                retry_after: Some(Duration::from_millis(1500))
            }
            .to_string(),
            "throttled (retry after 1500ms)"
        );
        assert_eq!(
            Outcome::FatalError("bad request".into()).to_string(),
            "fatal error: bad request"
        );
        assert_eq!(ItemStatus::InFlight.to_string(), "IN_FLIGHT");
    }
}
