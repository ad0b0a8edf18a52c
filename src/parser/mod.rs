//! Session log record parsing.
//!
//! Claude Code appends one JSON record per line to
//! `~/.claude/projects/<project-slug>/<session-id>.jsonl`. This module
//! normalizes user and assistant records into [`Message`]s and turns them
//! into [`Event`](crate::events::Event)s.

mod incremental;
mod message;
mod record;
mod truncate;

pub use incremental::{RecordParser, RAW_ENTRY_LIMIT};
pub use message::{
    parse_timestamp, ContentBlock, Message, Role, ToolCategory, UnknownToolCategory, MIN_TIMESTAMP,
};
pub use record::{MessagePayload, MessageRecord, RecordBlock, RecordContent, RecordKind, ResultContent};
pub use truncate::{truncate_str, truncate_value, DEFAULT_MAX_LENGTH, TRUNCATION_MARKER};
