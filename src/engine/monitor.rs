//! Rate feedback: turns a stream of call outcomes into worker-count changes.
//!
//! The policy is additive-increase / multiplicative-decrease. A throttle
//! signal cuts the pool immediately, a streak of transient errors removes one
//! slot, and a streak of successes adds one back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::item::OutcomeKind;

/// Tuning knobs for the monitor. Validated by [`crate::config::LocflowConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub initial_workers: usize,
    pub target_rpm: u32,
    /// Consecutive successes needed before growing by one slot.
    pub grow_after_successes: u32,
    /// Consecutive transient errors needed before shrinking by one slot.
    pub shrink_after_failures: u32,
    /// Multiplier applied to the worker count on a throttle signal.
    pub throttle_factor: f64,
    /// Number of recent outcomes kept for reporting.
    pub window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 12,
            initial_workers: 6,
            target_rpm: 60,
            grow_after_successes: 10,
            shrink_after_failures: 3,
            throttle_factor: 0.5,
            window: 50,
        }
    }
}

/// Live pool sizing state. Only [`RateMonitor::observe`] writes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub workers: usize,
    pub target_rpm: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

/// Result of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Grow { from: usize, to: usize },
    Shrink { from: usize, to: usize },
    Hold,
}

pub struct RateMonitor {
    config: MonitorConfig,
    state: PoolState,
    recent: VecDeque<OutcomeKind>,
}

impl RateMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let workers = config
            .initial_workers
            .clamp(config.min_workers, config.max_workers);
        let state = PoolState {
            workers,
            target_rpm: config.target_rpm,
            consecutive_successes: 0,
            consecutive_failures: 0,
        };
        Self {
            recent: VecDeque::with_capacity(config.window),
            config,
            state,
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn workers(&self) -> usize {
        self.state.workers
    }

    /// Share of throttled calls among the recent window, in `[0, 1]`.
    pub fn throttle_ratio(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let throttled = self
            .recent
            .iter()
            .filter(|k| **k == OutcomeKind::Throttled)
            .count();
        throttled as f64 / self.recent.len() as f64
    }

    /// Feed one outcome and apply the resulting resize, if any.
    pub fn observe(&mut self, kind: OutcomeKind) -> Adjustment {
        if self.config.window > 0 {
            if self.recent.len() == self.config.window {
                self.recent.pop_front();
            }
            self.recent.push_back(kind);
        }

        let from = self.state.workers;
        let adjustment = match kind {
            OutcomeKind::Success => {
                self.state.consecutive_failures = 0;
                self.state.consecutive_successes += 1;
                if self.state.consecutive_successes >= self.config.grow_after_successes {
                    self.state.consecutive_successes = 0;
                    self.resize(from + 1)
                } else {
                    Adjustment::Hold
                }
            }
            OutcomeKind::Throttled => {
                self.state.consecutive_successes = 0;
                self.state.consecutive_failures += 1;
                let scaled = (from as f64 * self.config.throttle_factor).floor() as usize;
                // Always at least one step down while above the floor.
                self.resize(scaled.min(from.saturating_sub(1)))
            }
            OutcomeKind::Transient => {
                self.state.consecutive_successes = 0;
                self.state.consecutive_failures += 1;
                if self.state.consecutive_failures >= self.config.shrink_after_failures {
                    self.state.consecutive_failures = 0;
                    self.resize(from.saturating_sub(1))
                } else {
                    Adjustment::Hold
                }
            }
            OutcomeKind::Fatal => Adjustment::Hold,
        };

        match adjustment {
            Adjustment::Grow { from, to } => {
                info!(from, to, "growing worker pool");
            }
            Adjustment::Shrink { from, to } => {
                warn!(
                    from,
                    to,
                    throttle_ratio = self.throttle_ratio(),
                    "shrinking worker pool"
                );
            }
            Adjustment::Hold => {
                debug!(workers = from, ?kind, "holding worker pool");
            }
        }

        adjustment
    }

    fn resize(&mut self, wanted: usize) -> Adjustment {
        let from = self.state.workers;
        let to = wanted.clamp(self.config.min_workers, self.config.max_workers);
        self.state.workers = to;
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Adjustment::Grow { from, to },
            std::cmp::Ordering::Less => Adjustment::Shrink { from, to },
            std::cmp::Ordering::Equal => Adjustment::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(min: usize, max: usize, initial: usize) -> RateMonitor {
        RateMonitor::new(MonitorConfig {
            min_workers: min,
            max_workers: max,
            initial_workers: initial,
            grow_after_successes: 10,
            shrink_after_failures: 3,
            ..Default::default()
        })
    }

    #[test]
    fn throttle_halves_immediately() {
        let mut m = monitor(2, 12, 8);
        assert_eq!(
            m.observe(OutcomeKind::Throttled),
            Adjustment::Shrink { from: 8, to: 4 }
        );
        assert_eq!(m.workers(), 4);
        assert_eq!(
            m.observe(OutcomeKind::Throttled),
            Adjustment::Shrink { from: 4, to: 2 }
        );
        assert_eq!(m.observe(OutcomeKind::Throttled), Adjustment::Hold);
        assert_eq!(m.workers(), 2);
    }

    #[test]
    fn throttle_steps_down_even_when_factor_rounds_up() {
        let mut m = RateMonitor::new(MonitorConfig {
            min_workers: 1,
            max_workers: 10,
            initial_workers: 3,
            throttle_factor: 0.9,
            ..Default::default()
        });
        assert_eq!(
            m.observe(OutcomeKind::Throttled),
            Adjustment::Shrink { from: 3, to: 2 }
        );
    }

    #[test]
    fn throttle_blocks_growth_until_new_streak() {
        let mut m = monitor(2, 12, 8);
        for _ in 0..9 {
            m.observe(OutcomeKind::Success);
        }
        m.observe(OutcomeKind::Throttled);
        assert_eq!(m.workers(), 4);

        for _ in 0..9 {
            assert_eq!(m.observe(OutcomeKind::Success), Adjustment::Hold);
            assert_eq!(m.workers(), 4);
        }
        assert_eq!(
            m.observe(OutcomeKind::Success),
            Adjustment::Grow { from: 4, to: 5 }
        );
    }

    #[test]
    fn transient_streak_shrinks_by_one() {
        let mut m = monitor(2, 12, 6);
        assert_eq!(m.observe(OutcomeKind::Transient), Adjustment::Hold);
        assert_eq!(m.observe(OutcomeKind::Transient), Adjustment::Hold);
        assert_eq!(
            m.observe(OutcomeKind::Transient),
            Adjustment::Shrink { from: 6, to: 5 }
        );
        assert_eq!(m.state().consecutive_failures, 0);
    }

    #[test]
    fn success_interrupts_failure_streak() {
        let mut m = monitor(2, 12, 6);
        m.observe(OutcomeKind::Transient);
        m.observe(OutcomeKind::Transient);
        m.observe(OutcomeKind::Success);
        assert_eq!(m.observe(OutcomeKind::Transient), Adjustment::Hold);
        assert_eq!(m.workers(), 6);
    }

    #[test]
    fn fatal_is_neutral() {
        let mut m = monitor(2, 12, 6);
        for _ in 0..5 {
            m.observe(OutcomeKind::Success);
        }
        assert_eq!(m.observe(OutcomeKind::Fatal), Adjustment::Hold);
        assert_eq!(m.state().consecutive_successes, 5);
    }

    #[test]
    fn growth_stops_at_max() {
        let mut m = monitor(1, 3, 3);
        for _ in 0..100 {
            m.observe(OutcomeKind::Success);
        }
        assert_eq!(m.workers(), 3);
    }

    #[test]
    fn initial_workers_are_clamped() {
        let m = monitor(2, 4, 10);
        assert_eq!(m.workers(), 4);
    }

    #[test]
    fn workers_stay_in_bounds_for_any_sequence() {
        let kinds = [
            OutcomeKind::Success,
            OutcomeKind::Throttled,
            OutcomeKind::Transient,
            OutcomeKind::Fatal,
        ];
        // Deterministic pseudo-random walk over many sequences.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for (min, max, initial) in [(1, 1, 1), (2, 12, 8), (1, 4, 2), (3, 30, 3)] {
            let mut m = RateMonitor::new(MonitorConfig {
                min_workers: min,
                max_workers: max,
                initial_workers: initial,
                grow_after_successes: 2,
                shrink_after_failures: 2,
                ..Default::default()
            });
            for _ in 0..5_000 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                m.observe(kinds[(seed % 4) as usize]);
                assert!((min..=max).contains(&m.workers()));
            }
        }
    }

    #[test]
    fn throttle_ratio_tracks_window() {
        let mut m = RateMonitor::new(MonitorConfig {
            window: 4,
            ..Default::default()
        });
        assert_eq!(m.throttle_ratio(), 0.0);
        m.observe(OutcomeKind::Throttled);
        m.observe(OutcomeKind::Success);
        assert_eq!(m.throttle_ratio(), 0.5);
        for _ in 0..4 {
            m.observe(OutcomeKind::Success);
        }
        assert_eq!(m.throttle_ratio(), 0.0);
    }
}
