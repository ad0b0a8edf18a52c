//! Watcher error types.

use std::path::{Path, PathBuf};

/// Errors raised while discovering or reading session logs.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// A tracked log file disappeared.
    #[error("Session log removed: {0}")]
    FileDeleted(PathBuf),

    #[error("Permission denied reading {0}")]
    PermissionDenied(PathBuf),

    /// The projects directory cannot be listed. Fatal at startup.
    #[error("Projects directory unavailable: {path}")]
    BaseDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Change notifier failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("Read position persistence failed: {0}")]
    State(#[from] crate::state::StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// The file or directory the error is about, when known.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::FileDeleted(path) | Self::PermissionDenied(path) => Some(path),
            Self::BaseDirUnavailable { path, .. } => Some(path),
            Self::Notify(_) | Self::State(_) | Self::Io(_) => None,
        }
    }
}
