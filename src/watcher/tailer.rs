//! Incremental JSONL file tailer.
//!
//! Reads records appended to a session log since the previous read,
//! buffering a trailing partial line until its newline arrives.

use std::fs::{self, File, Metadata};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::WatcherError;

/// One complete line read from the file.
#[derive(Debug, Clone, PartialEq)]
pub enum TailedLine {
    Record(Value),
    /// A line that is not valid JSON.
    Malformed { line: String, error: String },
}

/// Incremental JSONL reader that tracks byte offset and file identity.
///
/// Rotation is detected when the file's inode changes or its size drops
/// below the current offset; reading then restarts from the beginning and
/// any buffered partial line is discarded.
#[derive(Debug)]
pub struct JsonlTailer {
    path: PathBuf,
    offset: u64,
    inode: u64,
    partial: Vec<u8>,
}

impl JsonlTailer {
    /// Tail `path` from the beginning.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self::with_offset(path, 0)
    }

    /// Tail `path` starting at `offset`.
    #[must_use]
    pub fn with_offset(path: PathBuf, offset: u64) -> Self {
        let inode = fs::metadata(&path).map(|m| inode_of(&m)).unwrap_or(0);
        Self {
            path,
            offset,
            inode,
            partial: Vec::new(),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset just past the last complete line. Bytes of a buffered
    /// partial line are not counted, so resuming here re-reads them.
    #[must_use]
    pub fn committed_offset(&self) -> u64 {
        self.offset.saturating_sub(self.partial.len() as u64)
    }

    #[must_use]
    pub fn inode(&self) -> u64 {
        self.inode
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an incomplete trailing line is buffered.
    #[must_use]
    pub fn has_pending_data(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Resume from a previously recorded position.
    pub fn restore(&mut self, offset: u64, inode: u64) {
        self.offset = offset;
        self.inode = inode;
        self.partial.clear();
    }

    /// Read the complete lines appended since the last read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or an I/O error
    /// occurs while reading. The offset is unchanged on error.
    pub fn read_new(&mut self) -> Result<Vec<TailedLine>, WatcherError> {
        let metadata = fs::metadata(&self.path).map_err(|e| self.classify(e))?;
        self.check_rotation(&metadata);

        if metadata.len() == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).map_err(|e| self.classify(e))?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }

        self.offset += data.len() as u64;
        Ok(self.split_lines(&data))
    }

    /// Rewind to the beginning and read the whole file.
    ///
    /// # Errors
    ///
    /// Same as [`read_new`](Self::read_new).
    pub fn read_all(&mut self) -> Result<Vec<TailedLine>, WatcherError> {
        self.reset();
        self.read_new()
    }

    /// Rewind to the beginning, dropping buffered data.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
        if let Ok(metadata) = fs::metadata(&self.path) {
            self.inode = inode_of(&metadata);
        }
    }

    fn check_rotation(&mut self, metadata: &Metadata) {
        let inode = inode_of(metadata);
        if inode != self.inode {
            tracing::debug!(
                path = %self.path.display(),
                old_inode = self.inode,
                new_inode = inode,
                "File replaced, reading from start"
            );
            self.offset = 0;
            self.partial.clear();
        } else if metadata.len() < self.offset {
            tracing::debug!(
                path = %self.path.display(),
                old_offset = self.offset,
                new_len = metadata.len(),
                "File truncated, reading from start"
            );
            self.offset = 0;
            self.partial.clear();
        }
        self.inode = inode;
    }

    fn split_lines(&mut self, data: &[u8]) -> Vec<TailedLine> {
        self.partial.extend_from_slice(data);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let remainder = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, remainder);

        complete
            .split(|&b| b == b'\n')
            .filter_map(|raw| {
                let text = String::from_utf8_lossy(raw);
                let line = text.trim();
                if line.is_empty() {
                    return None;
                }
                Some(match serde_json::from_str::<Value>(line) {
                    Ok(record) => TailedLine::Record(record),
                    Err(e) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "Malformed JSONL line"
                        );
                        TailedLine::Malformed {
                            line: line.to_string(),
                            error: e.to_string(),
                        }
                    }
                })
            })
            .collect()
    }

    fn classify(&self, e: std::io::Error) -> WatcherError {
        match e.kind() {
            ErrorKind::NotFound => WatcherError::FileDeleted(self.path.clone()),
            ErrorKind::PermissionDenied => WatcherError::PermissionDenied(self.path.clone()),
            _ => WatcherError::Io(e),
        }
    }
}

/// Inode number of a file, or 0 where the platform has none.
#[must_use]
pub fn inode_of(metadata: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn entry(uuid: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{uuid}","sessionId":"sess-1","timestamp":"2026-01-29T10:00:00Z","message":{{"role":"user","content":"Hello"}}}}"#
        )
    }

    fn uuids(lines: &[TailedLine]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| match line {
                TailedLine::Record(v) => v["uuid"].as_str().map(str::to_string),
                TailedLine::Malformed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_reads_only_new_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", entry("u1")).unwrap();
        file.flush().unwrap();

        let mut tailer = JsonlTailer::new(file.path().to_path_buf());
        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u1"]);
        let after_first = tailer.offset();

        assert!(tailer.read_new().unwrap().is_empty());
        assert_eq!(tailer.offset(), after_first);

        writeln!(file, "{}", entry("u2")).unwrap();
        writeln!(file, "{}", entry("u3")).unwrap();
        file.flush().unwrap();

        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u2", "u3"]);
        assert_eq!(tailer.offset(), file.as_file().metadata().unwrap().len());
    }

    #[test]
    fn test_partial_line_buffered_until_newline() {
        let mut file = NamedTempFile::new().unwrap();
        let line = entry("u1");
        let (head, tail) = line.split_at(20);
        write!(file, "{head}").unwrap();
        file.flush().unwrap();

        let mut tailer = JsonlTailer::new(file.path().to_path_buf());
        assert!(tailer.read_new().unwrap().is_empty());
        assert!(tailer.has_pending_data());
        assert_eq!(tailer.offset(), head.len() as u64);

        writeln!(file, "{tail}").unwrap();
        file.flush().unwrap();

        let lines = tailer.read_new().unwrap();
        assert_eq!(uuids(&lines), vec!["u1"]);
        assert!(!tailer.has_pending_data());
    }

    #[test]
    fn test_malformed_lines_surfaced_in_order() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", entry("u1")).unwrap();
        writeln!(file, "not valid json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", entry("u2")).unwrap();
        file.flush().unwrap();

        let lines = JsonlTailer::new(file.path().to_path_buf()).read_new().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[1], TailedLine::Malformed { line, .. } if line == "not valid json"));
        assert_eq!(uuids(&lines), vec!["u1", "u2"]);
    }

    #[test]
    fn test_crlf_and_invalid_utf8_tolerated() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}\r\n", entry("u1")).unwrap();
        file.write_all(b"{\"type\":\"user\",\"uuid\":\"u2\",\"x\":\"\xff\"}\n").unwrap();
        file.flush().unwrap();

        let lines = JsonlTailer::new(file.path().to_path_buf()).read_new().unwrap();
        assert_eq!(uuids(&lines), vec!["u1", "u2"]);
    }

    #[test]
    fn test_truncation_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(&path, format!("{}\n{}\n", entry("u1"), entry("u2"))).unwrap();

        let mut tailer = JsonlTailer::new(path.clone());
        assert_eq!(tailer.read_new().unwrap().len(), 2);

        let mut f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        writeln!(f, "{}", entry("u3")).unwrap();
        drop(f);

        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u3"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(&path, format!("{}\n", entry("u1"))).unwrap();

        let mut tailer = JsonlTailer::new(path.clone());
        tailer.read_new().unwrap();
        let old_inode = tailer.inode();

        // Write the replacement first so the old inode stays allocated.
        let replacement = dir.path().join("s.jsonl.new");
        fs::write(
            &replacement,
            format!("{}\n{}\n{}\n", entry("n1"), entry("n2"), entry("n3")),
        )
        .unwrap();
        fs::rename(&replacement, &path).unwrap();

        let lines = tailer.read_new().unwrap();
        assert_eq!(uuids(&lines), vec!["n1", "n2", "n3"]);
        assert_ne!(tailer.inode(), old_inode);
    }

    #[test]
    fn test_committed_offset_excludes_partial_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", entry("u1")).unwrap();
        write!(file, "{{\"type\":\"us").unwrap();
        file.flush().unwrap();

        let mut tailer = JsonlTailer::new(file.path().to_path_buf());
        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u1"]);
        let complete = entry("u1").len() as u64 + 1;
        assert_eq!(tailer.committed_offset(), complete);
        assert_eq!(tailer.offset(), complete + 11);
    }

    #[cfg(unix)]
    #[test]
    fn test_offset_into_missing_file_resets_when_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.jsonl");
        let mut tailer = JsonlTailer::with_offset(path.clone(), 5);
        assert_eq!(tailer.inode(), 0);

        fs::write(&path, format!("{}\n{}\n", entry("u1"), entry("u2"))).unwrap();
        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u1", "u2"]);
        assert_ne!(tailer.inode(), 0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let mut tailer = JsonlTailer::new(dir.path().join("gone.jsonl"));
        assert!(matches!(tailer.read_new(), Err(WatcherError::FileDeleted(_))));
        assert_eq!(tailer.offset(), 0);
    }

    #[test]
    fn test_read_all_and_reset() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", entry("u1")).unwrap();
        file.flush().unwrap();

        let mut tailer = JsonlTailer::new(file.path().to_path_buf());
        tailer.read_new().unwrap();
        assert_eq!(uuids(&tailer.read_all().unwrap()), vec!["u1"]);

        tailer.reset();
        assert_eq!(tailer.offset(), 0);
    }

    #[test]
    fn test_with_offset_skips_existing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", entry("u1")).unwrap();
        file.flush().unwrap();
        let len = file.as_file().metadata().unwrap().len();

        let mut tailer = JsonlTailer::with_offset(file.path().to_path_buf(), len);
        assert!(tailer.read_new().unwrap().is_empty());

        writeln!(file, "{}", entry("u2")).unwrap();
        file.flush().unwrap();
        assert_eq!(uuids(&tailer.read_new().unwrap()), vec!["u2"]);
    }
}
