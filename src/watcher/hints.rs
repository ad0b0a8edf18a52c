//! Change hints that let the poll loop visit recently written files first.
//!
//! Hints never replace polling: every tracked file is still checked each
//! cycle, so a lost or late notification only costs latency.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use super::error::WatcherError;

/// A source of "this file probably changed" notifications.
pub trait ChangeHintSource: Send {
    /// Paths reported as changed since the previous call.
    fn drain(&mut self) -> Vec<PathBuf>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// No hints; rely on polling alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollOnly;

impl ChangeHintSource for PollOnly {
    fn drain(&mut self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

/// Hints from filesystem notifications on the projects directory.
pub struct NotifyHints {
    pending: Arc<Mutex<Vec<PathBuf>>>,
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl std::fmt::Debug for NotifyHints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHints").finish_non_exhaustive()
    }
}

impl NotifyHints {
    /// Watch `root` recursively for created or modified `.jsonl` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created or
    /// `root` cannot be watched.
    pub fn new(root: &Path, debounce: Duration) -> Result<Self, WatcherError> {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pending);

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let mut pending = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    for event in &events {
                        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            continue;
                        }
                        pending.extend(
                            event
                                .paths
                                .iter()
                                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                                .cloned(),
                        );
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(error = %error, "File watcher error");
                    }
                }
            }
        })?;
        debouncer.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            pending,
            _debouncer: debouncer,
        })
    }
}

impl ChangeHintSource for NotifyHints {
    fn drain(&mut self) -> Vec<PathBuf> {
        let mut paths =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        paths.sort();
        paths.dedup();
        paths
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

/// Notification hints for `root`, or poll-only when they are unavailable.
#[must_use]
pub fn hint_source_for(root: &Path, use_notify: bool) -> Box<dyn ChangeHintSource> {
    if !use_notify {
        return Box::new(PollOnly);
    }
    match NotifyHints::new(root, Duration::from_millis(100)) {
        Ok(hints) => Box::new(hints),
        Err(e) => {
            tracing::warn!(path = %root.display(), error = %e, "File notifications unavailable, polling only");
            Box::new(PollOnly)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_poll_only_has_no_hints() {
        let mut hints = PollOnly;
        assert!(hints.drain().is_empty());
        assert_eq!(hints.name(), "poll");
    }

    #[test]
    fn test_missing_root_falls_back_to_polling() {
        let dir = TempDir::new().unwrap();
        let hints = hint_source_for(&dir.path().join("missing"), true);
        assert_eq!(hints.name(), "poll");
    }

    #[test]
    fn test_disabled_notify_polls() {
        let dir = TempDir::new().unwrap();
        assert_eq!(hint_source_for(dir.path(), false).name(), "poll");
    }
}
