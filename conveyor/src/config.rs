//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConveyorError;
use crate::events::EventTrigger;
pub use crate::retry::CommitRetryConfig;

/// Policy values for the orchestrator and its dispatch loop.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between dispatch ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Age after which an in-progress action is reported as stale, in seconds.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Silence after which a worker is pruned, in seconds.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Retry policy for conflicting commits.
    #[serde(default)]
    pub commit_retry: CommitRetryConfig,
    /// Rewind stale actions whose worker is gone.
    #[serde(default = "default_reset_stale_actions")]
    pub reset_stale_actions: bool,
    /// Notification rules.
    #[serde(default)]
    pub triggers: Vec<EventTrigger>,
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_staleness_threshold_secs() -> u64 {
    300
}

const fn default_heartbeat_timeout_secs() -> u64 {
    60
}

const fn default_reset_stale_actions() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            commit_retry: CommitRetryConfig::default(),
            reset_stale_actions: default_reset_stale_actions(),
            triggers: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConveyorError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConveyorError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects values that would stall the loop or disable recovery.
    pub fn validate(&self) -> Result<(), ConveyorError> {
        if self.tick_interval_ms == 0 {
            return Err(ConveyorError::Config("tick_interval_ms must be positive".to_string()));
        }
        if self.staleness_threshold_secs == 0 {
            return Err(ConveyorError::Config(
                "staleness_threshold_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(ConveyorError::Config("heartbeat_timeout_secs must be positive".to_string()));
        }
        if self.commit_retry.max_attempts == 0 {
            return Err(ConveyorError::Config(
                "commit_retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the staleness threshold.
    #[must_use]
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold_secs = threshold.as_secs();
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the commit retry policy.
    #[must_use]
    pub fn with_commit_retry(mut self, retry: CommitRetryConfig) -> Self {
        self.commit_retry = retry;
        self
    }

    /// Enables or disables rewinding of stale actions.
    #[must_use]
    pub fn with_reset_stale_actions(mut self, enabled: bool) -> Self {
        self.reset_stale_actions = enabled;
        self
    }

    /// Adds a notification rule.
    #[must_use]
    pub fn with_trigger(mut self, trigger: EventTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Tick interval as a `Duration`.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Staleness threshold as a `Duration`.
    #[must_use]
    pub const fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    /// Heartbeat timeout as a `Duration`.
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}
