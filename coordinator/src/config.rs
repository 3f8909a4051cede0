//! Coordinator configuration with TOML file support.

use polity_voting::{TallyPolicy, DEFAULT_TIME_LIMIT_SECS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::CoordinatorError;

/// Runtime settings for a [`SessionCoordinator`](crate::SessionCoordinator).
///
/// Can be loaded from a TOML file via [`CoordinatorConfig::from_toml_file`]
/// or built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Voting time limit for sessions that do not set their own. Counted in
    /// whole seconds from the second voting started in.
    #[serde(default = "default_time_limit_secs")]
    pub default_time_limit_secs: u64,

    /// How often each session timer re-evaluates auto-close.
    #[serde(default = "default_timer_tick_ms")]
    pub timer_tick_ms: u64,

    /// Events buffered per observer of [`subscribe`](crate::SessionCoordinator::subscribe).
    /// Observers that fall further behind lose the oldest events. Downstream
    /// delivery does not go through this buffer.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Attempts per downstream call (notification, timeline, workflow).
    #[serde(default = "default_notification_max_attempts")]
    pub notification_max_attempts: u32,

    /// Delay before the first retry; doubled on each further attempt.
    #[serde(default = "default_notification_backoff_ms")]
    pub notification_backoff_ms: u64,

    /// Zero-eligible outcome and majority denominator.
    #[serde(default)]
    pub tally_policy: TallyPolicy,
}

fn default_time_limit_secs() -> u64 {
    DEFAULT_TIME_LIMIT_SECS
}

fn default_timer_tick_ms() -> u64 {
    1_000
}

fn default_event_channel_capacity() -> usize {
    1_024
}

fn default_notification_max_attempts() -> u32 {
    3
}

fn default_notification_backoff_ms() -> u64 {
    200
}

// ── Impl ───────────────────────────────────────────────────────────────

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CoordinatorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, CoordinatorError> {
        let config: Self = toml::from_str(s).map_err(|e| CoordinatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, CoordinatorError> {
        toml::to_string_pretty(self).map_err(|e| CoordinatorError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.timer_tick_ms == 0 {
            return Err(CoordinatorError::Config("timer_tick_ms must be > 0".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(CoordinatorError::Config(
                "event_channel_capacity must be > 0".into(),
            ));
        }
        if self.notification_max_attempts == 0 {
            return Err(CoordinatorError::Config(
                "notification_max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms)
    }

    pub fn notification_backoff(&self) -> Duration {
        Duration::from_millis(self.notification_backoff_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_time_limit_secs: default_time_limit_secs(),
            timer_tick_ms: default_timer_tick_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            notification_max_attempts: default_notification_max_attempts(),
            notification_backoff_ms: default_notification_backoff_ms(),
            tally_policy: TallyPolicy::default(),
        }
    }
}
