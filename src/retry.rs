//! Retry schedule for throttled backend calls.
//!
//! The schedule is a bounded budget of exponentially growing delays
//! (1s, 2s, 4s by default). Unlike a reconnection backoff there is no
//! reset: each sandbox call gets a fresh budget and gives up for good
//! once it is spent.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `attempt` (1-based), or `None`
    /// once the retry budget is exhausted.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        Some(self.initial_delay * self.multiplier.pow(attempt - 1))
    }

    /// The full schedule, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).filter_map(|attempt| self.delay_before(attempt))
    }

    /// Total time spent sleeping if every retry is used.
    pub fn total_delay(&self) -> Duration {
        self.delays().sum()
    }
}
