//! Exponential backoff for stream reconnection.

use std::time::Duration;

/// Decides how long to wait before reopening a failed stream, and when to stop.
///
/// The delay after a failure is `min(base * 2^n, max_delay)` where `n` is the
/// number of reconnect attempts already made since the last successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Create a policy with the default base (1s) and cap (30s).
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Reconnect attempts allowed between two successful opens
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate exponential backoff delay.
    pub fn exponential_delay(&self, n_attempts: u32) -> Duration {
        2u32.checked_pow(n_attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// The wait before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&self, n_past_attempts: u32) -> Option<Duration> {
        if n_past_attempts >= self.max_attempts {
            None
        } else {
            Some(self.exponential_delay(n_past_attempts))
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}
