//! Retry policy and backoff calculation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after which a failed item is permanently failed.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(86_400),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-indexed).
    ///
    /// Doubles from the base delay and saturates at the cap: once the delay
    /// reaches at least half the cap it jumps to the cap and stays there.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs().max(1);
        let max = match self.max_delay.as_secs() {
            0 => base,
            m => m,
        };

        let mut delay = base;
        for _ in 1..attempt {
            if delay >= max / 2 {
                delay = max;
                break;
            }
            delay *= 2;
        }
        Duration::from_secs(delay.min(max))
    }

    /// Absolute time of the next retry after the `attempt`-th failure.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempt))
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `attempts` failures used up the retry budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
