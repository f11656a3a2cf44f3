//! Poll backoff for convergence waits.

use std::time::Duration;

/// Exponential poll schedule without jitter: `initial * 2^attempt`, capped
/// at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl PollBackoff {
    /// Create a schedule. `max` is raised to `initial` if smaller.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay before the next poll; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Restart the schedule from `initial` (after an observed transition).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
