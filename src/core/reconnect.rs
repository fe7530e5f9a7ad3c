// Reconnect backoff for long-lived subscriptions

use std::time::Duration;

use crate::config::StreamConfig;

/// Delay schedule between subscription attempts.
///
/// Retries are unbounded; only the delay is capped. With a multiplier of 1.0
/// the delay is flat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    /// Fixed delay between every attempt
    pub fn flat(delay: Duration) -> Self {
        Self::new(delay, delay, 1.0)
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_secs),
            Duration::from_secs(config.max_backoff_secs),
            config.backoff_multiplier,
        )
    }

    pub fn initial_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to use after `current` has been waited out
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = Duration::from_millis((current.as_millis() as f64 * self.backoff_multiplier) as u64);
        std::cmp::min(grown, self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::flat(Duration::from_secs(10))
    }
}
