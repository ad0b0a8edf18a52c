//! Serde schema for Claude Code session log records.
//!
//! Only the fields the event model consumes are typed. Everything else in a
//! record is ignored, so newer Claude Code versions keep parsing.

use serde::Deserialize;
use serde_json::Value;

/// The kinds of record that carry a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    User,
    Assistant,
}

impl RecordKind {
    /// Read the `type` discriminant of a raw record.
    ///
    /// Returns `None` for auxiliary entries (summaries, snapshots, progress
    /// updates) and for records without a string `type`.
    #[must_use]
    pub fn of(record: &Value) -> Option<Self> {
        match record.get("type").and_then(Value::as_str)? {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A user or assistant record as written to the session log.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub uuid: Option<String>,
    pub parent_uuid: Option<String>,
    pub timestamp: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub is_sidechain: Option<bool>,
    pub is_meta: Option<bool>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub version: Option<String>,
    pub request_id: Option<String>,
    pub slug: Option<String>,
    #[serde(default)]
    pub message: MessagePayload,
}

/// The `message` object nested inside a record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    pub role: Option<String>,
    pub content: Option<RecordContent>,
    pub model: Option<String>,
    pub usage: Option<Value>,
}

/// Message content: either a bare string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordContent {
    Text(String),
    Blocks(Vec<RecordBlock>),
}

/// A content block as it appears on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ResultContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    /// Images, documents and block types added after this schema was written.
    #[serde(other)]
    Unknown,
}

/// The `content` of a tool result: a string or a list of parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResultContent {
    Text(String),
    Parts(Vec<Value>),
}

impl ResultContent {
    /// Flatten to text. Parts contribute their `text` field (or themselves,
    /// when a part is a bare string) and are joined with newlines.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    Value::String(s) => s.as_str(),
                    Value::Object(map) => map.get("text").and_then(Value::as_str).unwrap_or(""),
                    _ => "",
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
