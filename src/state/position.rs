//! On-disk record of how far each session file has been read.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::error::StateError;
use crate::watcher::{inode_of, JsonlTailer};

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Read position of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePosition {
    pub file_path: PathBuf,
    pub position: u64,
    pub inode: u64,
    pub last_modified: DateTime<Utc>,
}

impl FilePosition {
    /// Capture the current position of a tailer. A buffered partial line
    /// is left out so it is read again in full after a restart.
    #[must_use]
    pub fn from_tailer(tailer: &JsonlTailer) -> Self {
        Self {
            file_path: absolute(tailer.path()),
            position: tailer.committed_offset(),
            inode: tailer.inode(),
            last_modified: Utc::now(),
        }
    }

    /// Move `tailer` to this position if the file on disk still matches.
    ///
    /// Refuses (returns `false`) when the inode differs or the file is now
    /// shorter than the recorded position.
    pub fn apply_to(&self, tailer: &mut JsonlTailer) -> bool {
        let metadata = match fs::metadata(tailer.path()) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %self.file_path.display(), error = %e, "Cannot stat file for saved position");
                return false;
            }
        };

        let inode = inode_of(&metadata);
        if inode != self.inode {
            tracing::debug!(
                path = %self.file_path.display(),
                saved_inode = self.inode,
                inode,
                "File replaced since position was saved"
            );
            return false;
        }
        if metadata.len() < self.position {
            tracing::debug!(
                path = %self.file_path.display(),
                saved_position = self.position,
                len = metadata.len(),
                "File shrank since position was saved"
            );
            return false;
        }

        tailer.restore(self.position, inode);
        true
    }
}

/// All saved positions plus format metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherState {
    pub version: u32,
    pub last_saved: Option<DateTime<Utc>>,
    pub file_positions: BTreeMap<PathBuf, FilePosition>,
}

impl Default for WatcherState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_saved: None,
            file_positions: BTreeMap::new(),
        }
    }
}

impl WatcherState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state, falling back to an empty state when the file is missing,
    /// unreadable, corrupt or from a newer version.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring saved watcher state");
                Self::new()
            }
        }
    }

    /// Load state from a file. A missing file yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if its
    /// version is newer than [`STATE_VERSION`].
    pub fn try_load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(StateError::IncompatibleVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }
        Ok(state)
    }

    /// Save state to a file atomically, creating parent directories.
    ///
    /// Writes to a temporary file first, then renames it into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        self.last_saved = Some(Utc::now());
        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        if let Err(e) = fs::write(&temp_path, content).and_then(|()| fs::rename(&temp_path, path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Record the current position of `tailer`.
    pub fn update(&mut self, tailer: &JsonlTailer) {
        let position = FilePosition::from_tailer(tailer);
        self.file_positions.insert(position.file_path.clone(), position);
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&FilePosition> {
        self.file_positions.get(&absolute(path))
    }

    /// Restore `tailer` from its saved position, if one exists and the file
    /// still matches.
    pub fn apply(&self, tailer: &mut JsonlTailer) -> bool {
        self.get(tailer.path())
            .is_some_and(|position| position.apply_to(tailer))
    }

    /// Drop positions for files that no longer exist or were not updated
    /// within `max_age`. Returns how many were removed.
    pub fn prune_stale(&mut self, max_age: TimeDelta) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };
        let before = self.file_positions.len();
        self.file_positions
            .retain(|path, position| path.exists() && position.last_modified >= cutoff);
        before - self.file_positions.len()
    }

    pub fn clear(&mut self) {
        self.file_positions.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.file_positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_positions.is_empty()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const LINE: &str = r#"{"type":"user","uuid":"u1","sessionId":"s","message":{"content":"hi"}}"#;

    fn tailed_file(dir: &TempDir, lines: usize) -> (PathBuf, JsonlTailer) {
        let path = dir.path().join("s.jsonl");
        let mut f = fs::File::create(&path).unwrap();
        for _ in 0..lines {
            writeln!(f, "{LINE}").unwrap();
        }
        let mut tailer = JsonlTailer::new(path.clone());
        tailer.read_new().unwrap();
        (path, tailer)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let (path, tailer) = tailed_file(&dir, 2);
        let state_path = dir.path().join("nested").join("state.json");

        let mut state = WatcherState::new();
        state.update(&tailer);
        state.save(&state_path).unwrap();
        assert!(!state_path.with_extension("tmp").exists());

        let loaded = WatcherState::try_load(&state_path).unwrap();
        assert_eq!(loaded.version, STATE_VERSION);
        assert!(loaded.last_saved.is_some());
        let position = loaded.get(&path).unwrap();
        assert_eq!(position.position, tailer.offset());
        assert_eq!(position.inode, tailer.inode());
    }

    #[test]
    fn test_apply_resumes_tailer() {
        let dir = TempDir::new().unwrap();
        let (path, tailer) = tailed_file(&dir, 2);
        let mut state = WatcherState::new();
        state.update(&tailer);

        let mut resumed = JsonlTailer::new(path);
        assert!(state.apply(&mut resumed));
        assert_eq!(resumed.offset(), tailer.offset());
        assert!(resumed.read_new().unwrap().is_empty());
    }

    #[test]
    fn test_apply_refused_when_file_shrank() {
        let dir = TempDir::new().unwrap();
        let (path, tailer) = tailed_file(&dir, 3);
        let mut state = WatcherState::new();
        state.update(&tailer);

        fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(10).unwrap();

        let mut resumed = JsonlTailer::new(path);
        assert!(!state.apply(&mut resumed));
        assert_eq!(resumed.offset(), 0);
    }

    #[test]
    fn test_apply_refused_on_inode_mismatch() {
        let dir = TempDir::new().unwrap();
        let (path, tailer) = tailed_file(&dir, 1);
        let mut position = FilePosition::from_tailer(&tailer);
        position.inode = position.inode.wrapping_add(1);

        let mut resumed = JsonlTailer::new(path);
        assert!(!position.apply_to(&mut resumed));
    }

    #[test]
    fn test_missing_and_corrupt_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(WatcherState::load(&missing).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(WatcherState::try_load(&corrupt).is_err());
        assert!(WatcherState::load(&corrupt).is_empty());
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"version": 99, "last_saved": null, "file_positions": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            WatcherState::try_load(&path),
            Err(StateError::IncompatibleVersion { found: 99, .. })
        ));
        assert_eq!(WatcherState::load(&path).version, STATE_VERSION);
    }

    #[test]
    fn test_prune_stale() {
        let dir = TempDir::new().unwrap();
        let (_path, tailer) = tailed_file(&dir, 1);
        let mut state = WatcherState::new();
        state.update(&tailer);

        let gone = dir.path().join("gone.jsonl");
        state.file_positions.insert(
            gone.clone(),
            FilePosition {
                file_path: gone,
                position: 10,
                inode: 1,
                last_modified: Utc::now(),
            },
        );
        assert_eq!(state.prune_stale(TimeDelta::days(7)), 1);
        assert_eq!(state.len(), 1);

        for position in state.file_positions.values_mut() {
            position.last_modified = Utc::now() - TimeDelta::days(8);
        }
        assert_eq!(state.prune_stale(TimeDelta::days(7)), 1);
        assert!(state.is_empty());
    }

    #[test]
    fn test_prune_with_huge_max_age_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let (_path, tailer) = tailed_file(&dir, 1);
        let mut state = WatcherState::new();
        state.update(&tailer);

        assert_eq!(state.prune_stale(TimeDelta::days(100_000_000)), 0);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_partial_line_not_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(&path, format!("{LINE}\n{}", &LINE[..30])).unwrap();
        let mut tailer = JsonlTailer::new(path);
        tailer.read_new().unwrap();
        assert!(tailer.has_pending_data());

        let position = FilePosition::from_tailer(&tailer);
        assert_eq!(position.position, LINE.len() as u64 + 1);
    }
}
