//! Colored CLI display utilities for watcher output.
//!
//! One line per event, prefixed with the event timestamp and a colored
//! tag, or one JSON object per line in `--json` mode.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::events::Event;
use crate::parser::Role;
use crate::session::LiveSessionSummary;

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Characters of a session id shown in the prefix.
const SESSION_ID_LEN: usize = 8;

/// Truncate a string to a maximum length in characters, adding an ellipsis
/// if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Format tool input for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value, raw_mode: bool) -> String {
    match input {
        serde_json::Value::Object(map) => {
            let pairs: Vec<String> = map
                .iter()
                .map(|(k, v)| {
                    let value_str = match v {
                        serde_json::Value::String(s) => truncate(s, 50, raw_mode),
                        other => truncate(&other.to_string(), 50, raw_mode),
                    };
                    format!("{k}={value_str}")
                })
                .collect();
            pairs.join(", ")
        }
        other => truncate(&other.to_string(), DEFAULT_MAX_LEN, raw_mode),
    }
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn prefix(event: &Event) -> String {
    let session: String = event.session_id().chars().take(SESSION_ID_LEN).collect();
    let mut out = format!(
        "{} {}",
        event.timestamp().format("%H:%M:%S%.3f").dimmed(),
        session.dimmed()
    );
    if let Some(agent_id) = event.agent_id() {
        out.push_str(&format!(" {}", format!("agent:{agent_id}").magenta()));
    }
    out
}

/// Render an event as a single colored line.
#[must_use]
pub fn format_event(event: &Event, raw_mode: bool) -> String {
    let body = match event {
        Event::Message(e) => {
            let tag = match e.message.role {
                Role::User => "[USER]".green().bold().to_string(),
                Role::Assistant => "[ASSISTANT]".blue().bold().to_string(),
            };
            let text = single_line(&e.message.text());
            if text.is_empty() {
                tag
            } else {
                format!("{tag} {}", truncate(&text, 120, raw_mode))
            }
        }
        Event::ToolUse(e) => format!(
            "{} {} [{}] ({})",
            "[TOOL]".cyan().bold(),
            e.tool_name.bold(),
            e.tool_category,
            format_tool_input(&e.tool_input, raw_mode).dimmed()
        ),
        Event::ToolResult(e) => {
            let tag = if e.is_error {
                "[RESULT]".red().bold().to_string()
            } else {
                "[RESULT]".green().bold().to_string()
            };
            format!(
                "{tag} {} {}",
                truncate(&e.tool_use_id, 12, raw_mode).dimmed(),
                truncate(&single_line(&e.content), 150, raw_mode)
            )
        }
        Event::ToolCallCompleted(e) => {
            let millis = e
                .tool_call
                .duration()
                .map_or_else(|| "?".to_string(), |d| d.num_milliseconds().to_string());
            format!(
                "{} {} in {millis}ms{}",
                "[DONE]".cyan(),
                e.tool_call.tool_name().bold(),
                if e.tool_call.is_error() { " (error)" } else { "" }
            )
        }
        Event::Error(e) => format!(
            "{} {}",
            "[ERROR]".red().bold(),
            truncate(&e.error_message, 200, raw_mode).red()
        ),
        Event::SessionStart(e) => format!(
            "{} {} {}",
            "[SESSION]".blue().bold(),
            "started".green(),
            e.project_slug.dimmed()
        ),
        Event::SessionIdle(e) => format!(
            "{} {} since {}",
            "[SESSION]".blue().bold(),
            "idle".yellow(),
            e.idle_since.format("%H:%M:%S")
        ),
        Event::SessionResume(e) => format!(
            "{} {} after {}s",
            "[SESSION]".blue().bold(),
            "resumed".green(),
            e.idle_duration.as_secs()
        ),
        Event::SessionEnd(e) => format!(
            "{} {} ({}) messages={}, tools={}",
            "[SESSION]".blue().bold(),
            "ended".red(),
            e.reason,
            e.message_count,
            e.tool_count
        ),
    };
    format!("{} {body}", prefix(event))
}

/// Print an event as a single colored line.
pub fn print_event(event: &Event, raw_mode: bool) {
    println!("{}", format_event(event, raw_mode));
    let _ = io::stdout().flush();
}

/// Print an event as one line of JSON.
pub fn print_event_json(event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, event_type = %event.kind(), "Failed to serialize event"),
    }
    let _ = io::stdout().flush();
}

/// Render the counters of a live session.
#[must_use]
pub fn format_summary(summary: &LiveSessionSummary) -> String {
    format!(
        "{} {} {} messages={}, tool_calls={}, completed={}, pending={}, agents={}",
        "[LIVE]".magenta().bold(),
        summary.session_id,
        summary.project_slug.dimmed(),
        summary.message_count,
        summary.tool_call_count,
        summary.completed_tool_calls,
        summary.pending_tool_calls,
        summary.agent_count
    )
}

/// Print the counters of a live session.
pub fn print_summary(summary: &LiveSessionSummary) {
    println!("{}", format_summary(summary));
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
