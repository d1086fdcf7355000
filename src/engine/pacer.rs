use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(60);

/// Rolling-window request pacer: at most `rpm` admissions in any 60 s span,
/// and, when a token budget is set, at most `tpm` estimated tokens.
pub struct Pacer {
    rpm: usize,
    tpm: Option<u64>,
    admitted: Mutex<VecDeque<(Instant, u32)>>,
}

impl Pacer {
    pub fn new(rpm: u32, tpm: Option<u32>) -> Self {
        let rpm = rpm.max(1) as usize;
        Self {
            rpm,
            tpm: tpm.map(|t| u64::from(t.max(1))),
            admitted: Mutex::new(VecDeque::with_capacity(rpm)),
        }
    }

    /// Wait until a request costing `cost` tokens may be sent, then record it.
    ///
    /// A cost larger than the whole token budget is admitted once the window
    /// is empty.
    pub async fn admit(&self, cost: u32) {
        loop {
            let wait_until = {
                let mut admitted = self.admitted.lock().unwrap_or_else(|p| p.into_inner());
                let now = Instant::now();
                while admitted.front().is_some_and(|(t, _)| now.duration_since(*t) >= WINDOW) {
                    admitted.pop_front();
                }
                let tokens: u64 = admitted.iter().map(|(_, c)| u64::from(*c)).sum();
                let under_tpm = self
                    .tpm
                    .is_none_or(|limit| admitted.is_empty() || tokens + u64::from(cost) <= limit);
                if admitted.len() < self.rpm && under_tpm {
                    admitted.push_back((now, cost));
                    return;
                }
                trace!(rpm = self.rpm, tokens, cost, "budget reached, pacing");
                // Oldest admission leaving the window frees requests and tokens.
                match admitted.front() {
                    Some((oldest, _)) => *oldest + WINDOW,
                    None => now,
                }
            };
            sleep_until(wait_until).await;
        }
    }

    /// Admissions recorded in the current window.
    #[cfg(test)]
    pub fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        admitted
            .iter()
            .filter(|(t, _)| now.duration_since(*t) < WINDOW)
            .count()
    }
}
