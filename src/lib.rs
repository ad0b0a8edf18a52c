//! Claude Session Watch - realtime monitoring of Claude Code session logs.
//!
//! Tails the JSONL logs under `~/.claude/projects`, turns each record into
//! typed [`Event`]s, tracks the lifecycle of every session and optionally
//! maintains live in-memory views of them.

pub mod config;
pub mod display;
pub mod events;
pub mod parser;
pub mod session;
pub mod state;
mod threads;
pub mod watcher;

pub use config::{ConfigLoader, WatcherConfig};
pub use events::{Event, EventBus, EventFilter, EventKind};
pub use session::{LiveSession, LiveSessionManager, RetentionPolicy};
pub use watcher::{AsyncSessionWatcher, SessionWatcher, WatcherError, WatcherHandle};
