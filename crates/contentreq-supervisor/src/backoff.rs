//! Reconnect delays.

use std::time::Duration;

use contentreq_core::config::SupervisorConfig;

/// Exponential backoff with a fixed number of attempts.
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`. Past
/// `max_attempts` no automatic retry is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before retry `attempt`, or `None` once attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

impl From<&SupervisorConfig> for BackoffPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_base_delay_ms),
            config.max_retries,
        )
    }
}
