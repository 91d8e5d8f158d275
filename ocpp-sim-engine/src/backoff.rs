//! Reconnect backoff schedule

use std::time::Duration;

/// Exponential backoff: `base * 2^(n-1)` for the n-th consecutive failure,
/// capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a failed attempt. Returns the delay to sleep before the next
    /// one, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            return None;
        }
        Some(self.delay_for(self.attempts))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.max)
    }

    /// Back to the base delay after a session that completed its start-up
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failures so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
