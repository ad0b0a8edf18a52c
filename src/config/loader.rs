//! Locating and reading the TOML config file.

use std::path::{Path, PathBuf};

use super::WatcherConfig;

/// Environment variable naming a config file that takes precedence over
/// the default locations.
pub const CONFIG_ENV_VAR: &str = "CLAUDE_SESSION_WATCH_CONFIG";

/// Finds the watcher config file and reads it.
///
/// Candidates are tried in order: `$CLAUDE_SESSION_WATCH_CONFIG`,
/// `./.claude-session-watch.toml`, then
/// `<config_dir>/claude-session-watch/config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    candidates: Vec<PathBuf>,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let mut candidates = Vec::with_capacity(3);
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            candidates.push(PathBuf::from(path));
        }
        candidates.push(PathBuf::from(".claude-session-watch.toml"));
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("claude-session-watch").join("config.toml"));
        }
        Self { candidates }
    }

    /// Only consider `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
        }
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// The first candidate that exists.
    #[must_use]
    pub fn locate(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|p| p.is_file())
    }

    /// Read and validate the located file. Defaults are returned when no
    /// candidate exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read,
    /// is not valid TOML for [`WatcherConfig`], or fails validation.
    pub fn load(&self) -> Result<WatcherConfig, ConfigError> {
        let Some(path) = self.locate() else {
            tracing::debug!(candidates = self.candidates.len(), "No config file, using defaults");
            return Ok(WatcherConfig::default());
        };

        tracing::debug!(path = %path.display(), "Reading config file");
        let config = read_config(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_config(path: &Path) -> Result<WatcherConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Config file problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
