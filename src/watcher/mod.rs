//! Watching Claude Code session logs.
//!
//! Provides file discovery, incremental tailing, the poll-driven
//! [`SessionWatcher`] and its async adapter.

mod bridge;
mod discovery;
mod error;
mod hints;
mod session_watcher;
mod tailer;
mod tracked;

pub use bridge::{AsyncSessionWatcher, EventChannel, DEFAULT_QUEUE_SIZE};
pub use discovery::{
    default_projects_dir, discover_subagent_files, extract_agent_id, find_subagents_dir,
    read_session_id, scan_projects, session_id_from_filename, SessionFile,
};
pub use error::WatcherError;
pub use hints::{hint_source_for, ChangeHintSource, NotifyHints, PollOnly};
pub use session_watcher::{SessionWatcher, WatcherHandle};
pub use tailer::{inode_of, JsonlTailer, TailedLine};
pub use tracked::{LifecycleState, SessionStats, TrackedSession, Transition};
