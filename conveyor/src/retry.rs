//! Backoff between commit attempts that lost an optimistic version check.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often, and how patiently, a conflicting commit is re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRetryConfig {
    /// Attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Randomise half of each delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    10
}

const fn default_max_delay_ms() -> u64 {
    200
}

const fn default_jitter() -> bool {
    true
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl CommitRetryConfig {
    /// Sets the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` failed ones.
    #[must_use]
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (0 for the first retry).
    ///
    /// Exponential in `retry`, capped at `max_delay_ms`. With jitter the
    /// delay is drawn from `[delay / 2, delay]`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_delay_ms);
        if !self.jitter {
            return Duration::from_millis(delay);
        }
        let half = delay / 2;
        if half == 0 {
            return Duration::from_millis(delay);
        }
        Duration::from_millis(half + rand::thread_rng().gen_range(0..=delay - half))
    }
}
