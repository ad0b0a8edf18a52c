//! Event variants emitted by the watcher.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::parser::{Message, ToolCategory};
use crate::session::ToolCallPair;

/// Discriminant of an [`Event`], used as a subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    ToolUse,
    ToolResult,
    Error,
    SessionStart,
    SessionEnd,
    SessionIdle,
    SessionResume,
    ToolCallCompleted,
}

impl EventKind {
    pub const ALL: [Self; 9] = [
        Self::Message,
        Self::ToolUse,
        Self::ToolResult,
        Self::Error,
        Self::SessionStart,
        Self::SessionEnd,
        Self::SessionIdle,
        Self::SessionResume,
        Self::ToolCallCompleted,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::SessionIdle => "session_idle",
            Self::SessionResume => "session_resume",
            Self::ToolCallCompleted => "tool_call_completed",
        }
    }

    /// Lifecycle kinds are produced by the watcher, not parsed from records.
    #[must_use]
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Self::SessionStart | Self::SessionEnd | Self::SessionIdle | Self::SessionResume
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event kind name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

fn duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn optional_duration_secs<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

/// A user or assistant message was appended.
#[derive(Debug, Clone, Serialize)]
pub struct MessageEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub message: Arc<Message>,
}

/// The assistant requested a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUseEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_name: String,
    pub tool_category: ToolCategory,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub message: Arc<Message>,
}

/// A tool result came back in a user message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResultEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
    pub message: Arc<Message>,
}

/// A record or file could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub error_message: String,
    pub raw_entry: Option<String>,
}

/// A session file was discovered.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStartEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub project_slug: String,
    pub file_path: PathBuf,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    IdleTimeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdleTimeout => f.write_str("idle_timeout"),
        }
    }
}

/// A session stayed idle past the end timeout.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEndEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub reason: EndReason,
    #[serde(serialize_with = "optional_duration_secs")]
    pub idle_duration: Option<Duration>,
    pub message_count: u64,
    pub tool_count: u64,
}

/// A session saw no activity for the idle timeout.
#[derive(Debug, Clone, Serialize)]
pub struct SessionIdleEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub idle_since: DateTime<Utc>,
}

/// An idle session received new activity.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResumeEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    #[serde(serialize_with = "duration_secs")]
    pub idle_duration: Duration,
}

/// A tool use was paired with its result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallCompletedEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub tool_call: ToolCallPair,
}

/// Everything the watcher can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    ToolUse(ToolUseEvent),
    ToolResult(ToolResultEvent),
    Error(ErrorEvent),
    SessionStart(SessionStartEvent),
    SessionEnd(SessionEndEvent),
    SessionIdle(SessionIdleEvent),
    SessionResume(SessionResumeEvent),
    ToolCallCompleted(ToolCallCompletedEvent),
}

macro_rules! common_field {
    ($self:ident, $field:ident) => {
        match $self {
            Event::Message(e) => &e.$field,
            Event::ToolUse(e) => &e.$field,
            Event::ToolResult(e) => &e.$field,
            Event::Error(e) => &e.$field,
            Event::SessionStart(e) => &e.$field,
            Event::SessionEnd(e) => &e.$field,
            Event::SessionIdle(e) => &e.$field,
            Event::SessionResume(e) => &e.$field,
            Event::ToolCallCompleted(e) => &e.$field,
        }
    };
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::ToolUse(_) => EventKind::ToolUse,
            Self::ToolResult(_) => EventKind::ToolResult,
            Self::Error(_) => EventKind::Error,
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::SessionEnd(_) => EventKind::SessionEnd,
            Self::SessionIdle(_) => EventKind::SessionIdle,
            Self::SessionResume(_) => EventKind::SessionResume,
            Self::ToolCallCompleted(_) => EventKind::ToolCallCompleted,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        *common_field!(self, timestamp)
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        common_field!(self, session_id)
    }

    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        common_field!(self, agent_id).as_deref()
    }

    /// Tool name for tool-use and completed tool-call events.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolUse(e) => Some(&e.tool_name),
            Self::ToolCallCompleted(e) => Some(e.tool_call.tool_name()),
            _ => None,
        }
    }

    #[must_use]
    pub fn tool_category(&self) -> Option<ToolCategory> {
        match self {
            Self::ToolUse(e) => Some(e.tool_category),
            Self::ToolCallCompleted(e) => Some(e.tool_call.category()),
            _ => None,
        }
    }

    /// The message this event was derived from, if any.
    #[must_use]
    pub fn message(&self) -> Option<&Arc<Message>> {
        match self {
            Self::Message(e) => Some(&e.message),
            Self::ToolUse(e) => Some(&e.message),
            Self::ToolResult(e) => Some(&e.message),
            _ => None,
        }
    }
}
