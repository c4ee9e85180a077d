//! Exponential backoff policy for failed deliveries

use std::time::Duration;

use crate::config::QueueConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total deliveries allowed, the first one included
    pub max_attempts: u32,
    /// Delay before the second delivery; doubles for each one after
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Backoff before redelivering a message that just failed having already
    /// failed `retry_count` times, or `None` once the attempts are used up.
    pub fn next_delay(&self, retry_count: u32) -> Option<Duration> {
        if retry_count.saturating_add(1) >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }

    /// Every redelivery of the same entry stands for an attempt that died
    /// without reporting back, so it counts against the budget like a retry.
    pub fn is_exhausted(&self, retry_count: u32, delivery_count: u32) -> bool {
        retry_count.saturating_add(delivery_count) > self.max_attempts
    }
}
