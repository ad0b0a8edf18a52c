//! Thread-safe watcher state with periodic background saving.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::TimeDelta;

use super::error::StateError;
use super::position::WatcherState;
use crate::threads::{join_within, JOIN_TIMEOUT};
use crate::watcher::JsonlTailer;

#[derive(Debug)]
struct Inner {
    state: WatcherState,
    dirty: bool,
}

#[derive(Debug)]
struct Shared {
    state_file: PathBuf,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self) -> Result<(), StateError> {
        let mut inner = self.lock();
        inner.state.save(&self.state_file)?;
        inner.dirty = false;
        tracing::trace!(path = %self.state_file.display(), positions = inner.state.len(), "Watcher state saved");
        Ok(())
    }

    fn save_if_dirty(&self) {
        if !self.lock().dirty {
            return;
        }
        if let Err(e) = self.save() {
            tracing::warn!(path = %self.state_file.display(), error = %e, "Failed to save watcher state");
        }
    }
}

#[derive(Debug)]
struct Saver {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Watcher state shared between the poll loop and a background saver.
///
/// Updates only mark the state dirty; the saver thread writes it every
/// `save_interval`, and [`stop`](Self::stop) writes it one final time.
#[derive(Debug)]
pub struct StatePersistence {
    shared: Arc<Shared>,
    save_interval: Duration,
    saver: Mutex<Option<Saver>>,
}

impl StatePersistence {
    /// Load state from `state_file` (empty if missing or unusable).
    #[must_use]
    pub fn new(state_file: PathBuf, save_interval: Duration) -> Self {
        let state = WatcherState::load(&state_file);
        tracing::debug!(path = %state_file.display(), positions = state.len(), "Watcher state loaded");
        Self::with_state(state_file, save_interval, state)
    }

    #[must_use]
    pub fn with_state(state_file: PathBuf, save_interval: Duration, state: WatcherState) -> Self {
        Self {
            shared: Arc::new(Shared {
                state_file,
                inner: Mutex::new(Inner {
                    state,
                    dirty: false,
                }),
            }),
            save_interval,
            saver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.shared.state_file
    }

    /// Start the background saver. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(&self) -> Result<(), StateError> {
        let mut saver = self.saver.lock().unwrap_or_else(PoisonError::into_inner);
        if saver.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let interval = self.save_interval;
        let handle = thread::Builder::new()
            .name("state-saver".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => shared.save_if_dirty(),
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })?;

        *saver = Some(Saver { stop_tx, handle });
        Ok(())
    }

    /// Stop the background saver and write the state one last time.
    ///
    /// # Errors
    ///
    /// Returns an error if the final save fails.
    pub fn stop(&self) -> Result<(), StateError> {
        let saver = self
            .saver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(saver) = saver {
            let _ = saver.stop_tx.send(());
            join_within(saver.handle, JOIN_TIMEOUT, "state-saver");
        }
        self.shared.save()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.saver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Record the position of `tailer` and mark the state dirty.
    pub fn update(&self, tailer: &JsonlTailer) {
        let mut inner = self.shared.lock();
        inner.state.update(tailer);
        inner.dirty = true;
    }

    /// Restore `tailer` from its saved position, if still valid.
    pub fn apply(&self, tailer: &mut JsonlTailer) -> bool {
        self.shared.lock().state.apply(tailer)
    }

    /// Write the state now.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_now(&self) -> Result<(), StateError> {
        self.shared.save()
    }

    /// See [`WatcherState::prune_stale`].
    pub fn prune_stale(&self, max_age: TimeDelta) -> usize {
        let mut inner = self.shared.lock();
        let removed = inner.state.prune_stale(max_age);
        if removed > 0 {
            inner.dirty = true;
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.shared.lock();
        inner.state.clear();
        inner.dirty = true;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.lock().dirty
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().state.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().state.is_empty()
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> WatcherState {
        self.shared.lock().state.clone()
    }
}

impl Drop for StatePersistence {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Failed to save watcher state on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn tailer_with_lines(dir: &TempDir, lines: usize) -> JsonlTailer {
        let path = dir.path().join("s.jsonl");
        let mut f = fs::File::create(&path).unwrap();
        for i in 0..lines {
            writeln!(f, r#"{{"type":"user","uuid":"u{i}"}}"#).unwrap();
        }
        let mut tailer = JsonlTailer::new(path);
        tailer.read_new().unwrap();
        tailer
    }

    #[test]
    fn test_update_marks_dirty_and_save_clears() {
        let dir = TempDir::new().unwrap();
        let persistence =
            StatePersistence::new(dir.path().join("state.json"), Duration::from_secs(30));
        assert!(!persistence.is_dirty());

        persistence.update(&tailer_with_lines(&dir, 1));
        assert!(persistence.is_dirty());
        assert_eq!(persistence.len(), 1);

        persistence.save_now().unwrap();
        assert!(!persistence.is_dirty());
        assert!(persistence.state_file().exists());
    }

    #[test]
    fn test_background_saver_writes_dirty_state() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let persistence = StatePersistence::new(state_file.clone(), Duration::from_millis(20));
        persistence.start().unwrap();
        persistence.start().unwrap();
        assert!(persistence.is_running());

        persistence.update(&tailer_with_lines(&dir, 2));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !state_file.exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(state_file.exists());

        persistence.stop().unwrap();
        assert!(!persistence.is_running());
    }

    #[test]
    fn test_stop_flushes_and_reload_restores() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let tailer = tailer_with_lines(&dir, 3);

        let persistence = StatePersistence::new(state_file.clone(), Duration::from_secs(3600));
        persistence.start().unwrap();
        persistence.update(&tailer);
        persistence.stop().unwrap();

        let reloaded = StatePersistence::new(state_file, Duration::from_secs(3600));
        let mut resumed = JsonlTailer::new(tailer.path().to_path_buf());
        assert!(reloaded.apply(&mut resumed));
        assert_eq!(resumed.offset(), tailer.offset());
    }

    #[test]
    fn test_clear_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let persistence =
            StatePersistence::new(dir.path().join("state.json"), Duration::from_secs(30));
        persistence.update(&tailer_with_lines(&dir, 1));
        assert_eq!(persistence.snapshot().len(), 1);
        persistence.clear();
        assert!(persistence.is_empty());
        assert_eq!(persistence.prune_stale(TimeDelta::days(7)), 0);
    }
}
