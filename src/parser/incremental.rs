//! Turns raw session log records into events.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::message::{ContentBlock, Message, ToolCategory};
use super::record::{MessageRecord, RecordKind};
use super::truncate::{truncate_str, truncate_value, DEFAULT_MAX_LENGTH};
use crate::events::{ErrorEvent, Event, MessageEvent, ToolResultEvent, ToolUseEvent};

/// Limit applied to the raw text attached to error events.
pub const RAW_ENTRY_LIMIT: usize = 1024;

/// Stateless record-to-event converter.
///
/// Each user or assistant record yields one `Message` event followed by a
/// `ToolUse` event per tool-use block and a `ToolResult` event per
/// tool-result block, in block order. Other record types yield nothing.
#[derive(Debug, Clone)]
pub struct RecordParser {
    truncate: bool,
    max_length: usize,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(true, DEFAULT_MAX_LENGTH)
    }
}

impl RecordParser {
    #[must_use]
    pub fn new(truncate: bool, max_length: usize) -> Self {
        Self {
            truncate,
            max_length,
        }
    }

    /// Convert one decoded record into events.
    ///
    /// A user or assistant record that does not fit the expected shape
    /// yields a single `Error` event carrying the truncated raw record.
    #[must_use]
    pub fn parse(&self, record: &Value) -> Vec<Event> {
        if RecordKind::of(record).is_none() {
            return Vec::new();
        }

        match serde_json::from_value::<MessageRecord>(record.clone()) {
            Ok(parsed) => self.events_for(Message::from_record(parsed)),
            Err(e) => {
                tracing::debug!(error = %e, "Record does not match message schema");
                let session_id = record
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let agent_id = record.get("agentId").and_then(Value::as_str);
                vec![error_event(
                    session_id,
                    agent_id,
                    format!("Parse error: {e}"),
                    &record.to_string(),
                )]
            }
        }
    }

    /// Decode and convert a single line of text.
    #[must_use]
    pub fn parse_line(&self, line: &str) -> Vec<Event> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(line) {
            Ok(record) => self.parse(&record),
            Err(e) => vec![error_event("", None, format!("Invalid JSON: {e}"), line)],
        }
    }

    /// Error event for a line that is not valid JSON, attributed to the
    /// session and agent whose file contained it.
    #[must_use]
    pub fn malformed_line(
        session_id: &str,
        agent_id: Option<&str>,
        line: &str,
        error: &str,
    ) -> Event {
        error_event(session_id, agent_id, format!("Invalid JSON: {error}"), line)
    }

    fn events_for(&self, message: Message) -> Vec<Event> {
        let message = Arc::new(message);
        let mut events = Vec::with_capacity(1 + message.content.len());

        events.push(Event::Message(MessageEvent {
            timestamp: message.timestamp,
            session_id: message.session_id.clone(),
            agent_id: message.agent_id.clone(),
            message: Arc::clone(&message),
        }));

        for block in &message.content {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    events.push(Event::ToolUse(ToolUseEvent {
                        timestamp: message.timestamp,
                        session_id: message.session_id.clone(),
                        agent_id: message.agent_id.clone(),
                        tool_name: name.clone(),
                        tool_category: ToolCategory::for_tool(name),
                        tool_input: self.bound_value(input),
                        tool_use_id: id.clone(),
                        message: Arc::clone(&message),
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    events.push(Event::ToolResult(ToolResultEvent {
                        timestamp: message.timestamp,
                        session_id: message.session_id.clone(),
                        agent_id: message.agent_id.clone(),
                        tool_use_id: tool_use_id.clone(),
                        content: self.bound_str(content),
                        is_error: *is_error,
                        message: Arc::clone(&message),
                    }));
                }
                ContentBlock::Text { .. } | ContentBlock::Thinking { .. } => {}
            }
        }

        events
    }

    fn bound_value(&self, value: &Value) -> Value {
        if self.truncate {
            truncate_value(value, self.max_length)
        } else {
            value.clone()
        }
    }

    fn bound_str(&self, s: &str) -> String {
        if self.truncate {
            truncate_str(s, self.max_length).into_owned()
        } else {
            s.to_string()
        }
    }
}

fn error_event(session_id: &str, agent_id: Option<&str>, error_message: String, raw: &str) -> Event {
    Event::Error(ErrorEvent {
        timestamp: Utc::now(),
        session_id: session_id.to_string(),
        agent_id: agent_id.map(str::to_string),
        error_message,
        raw_entry: Some(truncate_str(raw, RAW_ENTRY_LIMIT).into_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::parser::TRUNCATION_MARKER;
    use serde_json::json;

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(Event::kind).collect()
    }

    #[test]
    fn test_user_text_record_yields_one_message() {
        let events = RecordParser::default().parse(&json!({
            "type": "user",
            "uuid": "u-1",
            "sessionId": "sess-1",
            "timestamp": "2026-01-29T10:00:00Z",
            "message": {"role": "user", "content": "Hello"}
        }));
        assert_eq!(kinds(&events), vec![EventKind::Message]);
        assert_eq!(events[0].session_id(), "sess-1");
    }

    #[test]
    fn test_events_follow_block_order() {
        let events = RecordParser::default().parse(&json!({
            "type": "assistant",
            "uuid": "a-1",
            "sessionId": "sess-1",
            "message": {"role": "assistant", "content": [
                {"type": "text", "text": "Let me look"},
                {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "/a"}},
                {"type": "tool_use", "id": "toolu_2", "name": "Bash", "input": {"command": "ls"}}
            ]}
        }));
        assert_eq!(
            kinds(&events),
            vec![EventKind::Message, EventKind::ToolUse, EventKind::ToolUse]
        );
        let Event::ToolUse(first) = &events[1] else {
            panic!("expected tool use");
        };
        assert_eq!(first.tool_use_id, "toolu_1");
        assert_eq!(first.tool_category, ToolCategory::FileRead);
        let Event::ToolUse(second) = &events[2] else {
            panic!("expected tool use");
        };
        assert_eq!(second.tool_category, ToolCategory::Bash);
        assert!(Arc::ptr_eq(&first.message, &second.message));
    }

    #[test]
    fn test_tool_result_event() {
        let events = RecordParser::default().parse(&json!({
            "type": "user",
            "sessionId": "sess-1",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": [{"type": "text", "text": "ok"}], "is_error": true}
            ]}
        }));
        assert_eq!(kinds(&events), vec![EventKind::Message, EventKind::ToolResult]);
        let Event::ToolResult(result) = &events[1] else {
            panic!("expected tool result");
        };
        assert_eq!(result.content, "ok");
        assert!(result.is_error);
    }

    #[test]
    fn test_input_truncated_when_enabled() {
        let record = json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "tool_use", "id": "t", "name": "Write", "input": {"content": "z".repeat(50)}}
            ]}
        });

        let events = RecordParser::new(true, 10).parse(&record);
        let Event::ToolUse(tool_use) = &events[1] else {
            panic!("expected tool use");
        };
        let content = tool_use.tool_input["content"].as_str().unwrap();
        assert!(content.ends_with(TRUNCATION_MARKER));
        assert_eq!(content.len(), 10 + TRUNCATION_MARKER.len());
        // The message keeps the full input.
        assert!(matches!(
            &tool_use.message.content[0],
            ContentBlock::ToolUse { input, .. } if input["content"].as_str().unwrap().len() == 50
        ));

        let events = RecordParser::new(false, 10).parse(&record);
        let Event::ToolUse(tool_use) = &events[1] else {
            panic!("expected tool use");
        };
        assert_eq!(tool_use.tool_input["content"].as_str().unwrap().len(), 50);
    }

    #[test]
    fn test_auxiliary_records_ignored() {
        let parser = RecordParser::default();
        assert!(parser.parse(&json!({"type": "summary", "summary": "x"})).is_empty());
        assert!(parser.parse(&json!({"type": "file-history-snapshot"})).is_empty());
        assert!(parser.parse(&json!([1, 2, 3])).is_empty());
    }

    #[test]
    fn test_schema_mismatch_becomes_error_event() {
        let events = RecordParser::default().parse(&json!({
            "type": "assistant",
            "sessionId": "sess-9",
            "message": {"content": [{"type": "tool_use", "name": "Bash"}]}
        }));
        assert_eq!(kinds(&events), vec![EventKind::Error]);
        let Event::Error(error) = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(error.session_id, "sess-9");
        assert!(error.error_message.starts_with("Parse error"));
        assert!(error.raw_entry.as_deref().unwrap().contains("Bash"));
    }

    #[test]
    fn test_parse_line_invalid_json() {
        let parser = RecordParser::default();
        assert!(parser.parse_line("   ").is_empty());
        let events = parser.parse_line("{not json");
        assert_eq!(kinds(&events), vec![EventKind::Error]);
    }

    #[test]
    fn test_malformed_line_raw_entry_bounded() {
        let line = "x".repeat(RAW_ENTRY_LIMIT * 2);
        let event = RecordParser::malformed_line("sess-1", Some("a1"), &line, "bad");
        let Event::Error(error) = event else {
            panic!("expected error");
        };
        assert_eq!(error.session_id, "sess-1");
        assert_eq!(error.agent_id.as_deref(), Some("a1"));
        assert_eq!(
            error.raw_entry.unwrap().len(),
            RAW_ENTRY_LIMIT + TRUNCATION_MARKER.len()
        );
    }
}
