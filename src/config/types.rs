//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::session::{LiveSessionConfig, RetentionPolicy};
use crate::watcher::default_projects_dir;

/// Settings for the session watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Root of the per-project session directories.
    pub base_dir: PathBuf,
    /// Delay between poll cycles.
    pub poll_interval_ms: u64,
    /// Inactivity after which a session becomes idle.
    pub idle_timeout_secs: u64,
    /// Time spent idle after which a session ends.
    pub end_timeout_secs: u64,
    /// Replay files that already exist at startup.
    pub process_existing: bool,
    /// Publish session start/idle/resume/end events.
    pub emit_session_events: bool,
    /// Shorten oversized strings in tool inputs and results.
    pub truncate_inputs: bool,
    pub max_input_length: usize,
    /// Where read positions are persisted. No persistence when unset.
    pub state_file: Option<PathBuf>,
    pub state_save_interval_secs: u64,
    /// Saved positions older than this are discarded on load.
    pub state_max_age_days: u32,
    /// Use OS file notifications to prioritize reads.
    pub use_notify: bool,
    pub live: LiveConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            base_dir: default_projects_dir().unwrap_or_else(|| PathBuf::from(".claude/projects")),
            poll_interval_ms: 500,
            idle_timeout_secs: 120,
            end_timeout_secs: 300,
            process_existing: true,
            emit_session_events: true,
            truncate_inputs: true,
            max_input_length: 1024,
            state_file: None,
            state_save_interval_secs: 30,
            state_max_age_days: 7,
            use_notify: true,
            live: LiveConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Default settings watching `base_dir`.
    #[must_use]
    pub fn for_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn end_timeout(&self) -> Duration {
        Duration::from_secs(self.end_timeout_secs)
    }

    #[must_use]
    pub fn state_save_interval(&self) -> Duration {
        Duration::from_secs(self.state_save_interval_secs)
    }

    #[must_use]
    pub fn state_max_age(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.state_max_age_days))
    }

    /// Check that the values can drive a watcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("poll_interval_ms", "must be positive"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid("idle_timeout_secs", "must be positive"));
        }
        if self.end_timeout_secs == 0 {
            return Err(ConfigError::invalid("end_timeout_secs", "must be positive"));
        }
        if self.truncate_inputs && self.max_input_length == 0 {
            return Err(ConfigError::invalid(
                "max_input_length",
                "must be positive when truncation is enabled",
            ));
        }
        if self.state_file.is_some() && self.state_save_interval_secs == 0 {
            return Err(ConfigError::invalid("state_save_interval_secs", "must be positive"));
        }
        if self.live.retention == RetentionPolicy::Sliding && self.live.max_messages == 0 {
            return Err(ConfigError::invalid(
                "live.max_messages",
                "must be positive with sliding retention",
            ));
        }
        Ok(())
    }
}

/// Settings for in-memory live sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Maintain live sessions alongside the event stream.
    pub enabled: bool,
    pub retention: RetentionPolicy,
    /// Window size for sliding retention.
    pub max_messages: usize,
    pub idle_threshold_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention: RetentionPolicy::Full,
            max_messages: 1000,
            idle_threshold_secs: 120,
        }
    }
}

impl LiveConfig {
    #[must_use]
    pub fn session_config(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            retention: self.retention,
            max_messages: self.max_messages,
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
        }
    }
}
