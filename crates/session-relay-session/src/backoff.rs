//! Reconnect backoff policy.

use std::time::Duration;

use session_relay_core::config::ReconnectConfig;

/// Linear backoff with a hard cap on the number of attempts.
///
/// The delay for attempt `n` is `min(base_delay * n, max_delay)`. Once
/// `attempt_count` reaches `max_attempts` no further delay is handed out
/// until [`ReconnectPolicy::reset`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt_count: u32,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    #[must_use]
    pub const fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Delay for the given 1-based attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }

    /// Consume one attempt and return its delay, or `None` once exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.delay_for_attempt(self.attempt_count))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
