//! Normalized conversation messages.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{MessageRecord, RecordBlock, RecordContent, RecordKind};

/// Timestamp assigned to records whose `timestamp` is missing or unparseable.
pub const MIN_TIMESTAMP: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Parse a record timestamp.
///
/// Accepts RFC 3339 (a trailing `Z` means UTC) and naive ISO-8601 date-times,
/// which are taken to be UTC. Anything else yields [`MIN_TIMESTAMP`].
#[must_use]
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return MIN_TIMESTAMP;
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    MIN_TIMESTAMP
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn resolve(declared: Option<&str>, kind: RecordKind) -> Self {
        match (declared, kind) {
            (Some("assistant"), _) => Self::Assistant,
            (Some("user"), _) => Self::User,
            (_, RecordKind::Assistant) => Self::Assistant,
            (_, RecordKind::User) => Self::User,
        }
    }
}

/// A content block of a normalized message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

impl ContentBlock {
    fn from_record(block: RecordBlock) -> Option<Self> {
        Some(match block {
            RecordBlock::Text { text } => Self::Text { text },
            RecordBlock::ToolUse { id, name, input } => Self::ToolUse { id, name, input },
            RecordBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id,
                content: content.map(|c| c.into_text()).unwrap_or_default(),
                is_error: is_error.unwrap_or(false),
            },
            RecordBlock::Thinking { thinking } => Self::Thinking { thinking },
            RecordBlock::Unknown => return None,
        })
    }
}

/// A user or assistant message lifted out of a session log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub session_id: String,
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub is_meta: bool,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub version: Option<String>,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl Message {
    /// Normalize a deserialized record.
    #[must_use]
    pub fn from_record(record: MessageRecord) -> Self {
        let payload = record.message;
        let content = match payload.content {
            Some(RecordContent::Text(text)) => vec![ContentBlock::Text { text }],
            Some(RecordContent::Blocks(blocks)) => {
                blocks.into_iter().filter_map(ContentBlock::from_record).collect()
            }
            None => Vec::new(),
        };

        Self {
            uuid: record.uuid.unwrap_or_default(),
            parent_uuid: record.parent_uuid,
            timestamp: parse_timestamp(record.timestamp.as_deref()),
            role: Role::resolve(payload.role.as_deref(), record.kind),
            content,
            session_id: record.session_id.unwrap_or_default(),
            agent_id: record.agent_id,
            is_sidechain: record.is_sidechain.unwrap_or(false),
            is_meta: record.is_meta.unwrap_or(false),
            cwd: record.cwd,
            git_branch: record.git_branch,
            version: record.version,
            model: payload.model,
            request_id: record.request_id,
            slug: record.slug,
            usage: payload.usage,
        }
    }

    /// Concatenated text blocks, separated by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    #[must_use]
    pub fn has_tool_result(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolResult { .. }))
    }

    /// True for records written by a subagent into its own sidechain.
    #[must_use]
    pub fn is_agent_message(&self) -> bool {
        self.agent_id.is_some() && self.is_sidechain
    }
}

/// Coarse grouping of tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileRead,
    FileWrite,
    Bash,
    Search,
    Agent,
    Planning,
    Web,
    Interaction,
    Other,
}

impl ToolCategory {
    pub const ALL: [Self; 9] = [
        Self::FileRead,
        Self::FileWrite,
        Self::Bash,
        Self::Search,
        Self::Agent,
        Self::Planning,
        Self::Web,
        Self::Interaction,
        Self::Other,
    ];

    /// Categorize a tool by name. Unknown tools (including MCP tools) are `Other`.
    #[must_use]
    pub fn for_tool(name: &str) -> Self {
        match name {
            "Read" => Self::FileRead,
            "Write" | "Edit" | "NotebookEdit" => Self::FileWrite,
            "Bash" | "KillShell" => Self::Bash,
            "Glob" | "Grep" => Self::Search,
            "Task" | "TaskOutput" => Self::Agent,
            "TodoWrite" | "EnterPlanMode" | "ExitPlanMode" => Self::Planning,
            "WebFetch" | "WebSearch" => Self::Web,
            "AskUserQuestion" => Self::Interaction,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::Bash => "bash",
            Self::Search => "search",
            Self::Agent => "agent",
            Self::Planning => "planning",
            Self::Web => "web",
            Self::Interaction => "interaction",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tool category name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown tool category: {0}")]
pub struct UnknownToolCategory(pub String);

impl FromStr for ToolCategory {
    type Err = UnknownToolCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownToolCategory(s.to_string()))
    }
}
