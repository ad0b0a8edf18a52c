//! Session file discovery.
//!
//! Claude Code writes each session to
//! `<projects>/<project-slug>/<session-id>.jsonl`. Subagent conversations
//! live in `agent-<id>.jsonl` files, either beside the session file or in
//! `<projects>/<project-slug>/<session-id>/subagents/`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::error::WatcherError;

/// `~/.claude/projects`, if the home directory is known.
#[must_use]
pub fn default_projects_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// A log file found under the projects directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFile {
    /// A main session log named after its session id.
    Main {
        session_id: String,
        project_slug: String,
        path: PathBuf,
    },
    /// A subagent log. Its session is only known from its first record.
    Agent {
        agent_id: String,
        project_slug: String,
        path: PathBuf,
    },
}

impl SessionFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Main { path, .. } | Self::Agent { path, .. } => path,
        }
    }

    #[must_use]
    pub fn project_slug(&self) -> &str {
        match self {
            Self::Main { project_slug, .. } | Self::Agent { project_slug, .. } => project_slug,
        }
    }
}

/// Extract agent ID from a subagent filename.
///
/// Subagent files are named `agent-<id>.jsonl`. This function extracts
/// the `<id>` portion.
///
/// # Examples
///
/// ```
/// use claude_session_watch::watcher::extract_agent_id;
///
/// assert_eq!(extract_agent_id("agent-abc1234.jsonl"), Some("abc1234".to_string()));
/// assert_eq!(extract_agent_id("session.jsonl"), None);
/// ```
#[must_use]
pub fn extract_agent_id(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".jsonl")?;
    let id = stem.strip_prefix("agent-")?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Session id of a main session log filename (`<session-id>.jsonl`).
#[must_use]
pub fn session_id_from_filename(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".jsonl")?;
    if stem.is_empty() || stem.starts_with("agent-") {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Find the subagents directory for a session.
///
/// Returns `None` if `<session_dir>/subagents/` doesn't exist.
#[must_use]
pub fn find_subagents_dir(session_dir: &Path) -> Option<PathBuf> {
    let subagents_dir = session_dir.join("subagents");
    if subagents_dir.is_dir() {
        Some(subagents_dir)
    } else {
        None
    }
}

/// Discover all subagent files in a directory.
///
/// Returns a list of (`agent_id`, path) tuples for each valid subagent file.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn discover_subagent_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, WatcherError> {
    let entries = std::fs::read_dir(dir)?;

    let mut agents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(agent_id) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(extract_agent_id)
        {
            if path.is_file() {
                agents.push((agent_id, path));
            }
        }
    }
    agents.sort_by(|a, b| a.1.cmp(&b.1));

    Ok(agents)
}

/// List every session and subagent log under `base_dir`, sorted by path.
///
/// Project directories that cannot be read are skipped with a warning.
///
/// # Errors
///
/// Returns [`WatcherError::BaseDirUnavailable`] if `base_dir` itself
/// cannot be read.
pub fn scan_projects(base_dir: &Path) -> Result<Vec<SessionFile>, WatcherError> {
    let projects = std::fs::read_dir(base_dir).map_err(|source| WatcherError::BaseDirUnavailable {
        path: base_dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for project in projects.flatten() {
        let project_dir = project.path();
        if !project_dir.is_dir() {
            continue;
        }
        let project_slug = project.file_name().to_string_lossy().into_owned();
        if let Err(e) = scan_project(&project_dir, &project_slug, &mut files) {
            tracing::warn!(path = %project_dir.display(), error = %e, "Skipping unreadable project directory");
        }
    }
    files.sort_by(|a, b| a.path().cmp(b.path()));

    Ok(files)
}

fn scan_project(
    project_dir: &Path,
    project_slug: &str,
    files: &mut Vec<SessionFile>,
) -> Result<(), WatcherError> {
    for entry in std::fs::read_dir(project_dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let Some(subagents_dir) = find_subagents_dir(&path) else {
                continue;
            };
            match discover_subagent_files(&subagents_dir) {
                Ok(agents) => files.extend(agents.into_iter().map(|(agent_id, path)| {
                    SessionFile::Agent {
                        agent_id,
                        project_slug: project_slug.to_string(),
                        path,
                    }
                })),
                Err(e) => {
                    tracing::warn!(path = %subagents_dir.display(), error = %e, "Skipping unreadable subagents directory");
                }
            }
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(agent_id) = extract_agent_id(filename) {
            files.push(SessionFile::Agent {
                agent_id,
                project_slug: project_slug.to_string(),
                path,
            });
        } else if let Some(session_id) = session_id_from_filename(filename) {
            files.push(SessionFile::Main {
                session_id,
                project_slug: project_slug.to_string(),
                path,
            });
        }
    }
    Ok(())
}

/// The `sessionId` of the first record in a log file.
///
/// Returns `None` when the file is empty, unreadable, or its first record
/// has no session id.
#[must_use]
pub fn read_session_id(path: &Path) -> Option<String> {
    let reader = BufReader::new(File::open(path).ok()?);
    let first = reader
        .lines()
        .map_while(Result::ok)
        .find(|line| !line.trim().is_empty())?;
    let record: Value = serde_json::from_str(first.trim()).ok()?;
    record
        .get("sessionId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
