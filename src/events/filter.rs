//! Composable event predicates.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::types::{Event, EventKind};
use crate::parser::ToolCategory;

/// A cloneable predicate over events.
///
/// Filters combine with [`and`](Self::and), [`or`](Self::or) and
/// [`not`](Self::not):
///
/// ```
/// use claude_session_watch::events::{EventFilter, EventKind};
///
/// let filter = EventFilter::session("abc")
///     .and(EventFilter::kinds([EventKind::ToolUse]))
///     .and(EventFilter::main_thread());
/// # let _ = filter;
/// ```
#[derive(Clone)]
pub struct EventFilter(Arc<dyn Fn(&Event) -> bool + Send + Sync>);

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter(..)")
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl EventFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Accepts every event.
    #[must_use]
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.0)(event)
    }

    /// Events of exactly one session.
    pub fn session(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self::new(move |event| event.session_id() == session_id)
    }

    /// Events whose session id starts with `prefix`.
    pub fn session_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |event| event.session_id().starts_with(&prefix))
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        let kinds: HashSet<EventKind> = kinds.into_iter().collect();
        Self::new(move |event| kinds.contains(&event.kind()))
    }

    /// Tool-use and completed tool-call events for any of `names`.
    pub fn tool_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        Self::new(move |event| event.tool_name().is_some_and(|name| names.contains(name)))
    }

    /// Tool-use and completed tool-call events in any of `categories`.
    pub fn tool_categories(categories: impl IntoIterator<Item = ToolCategory>) -> Self {
        let categories: HashSet<ToolCategory> = categories.into_iter().collect();
        Self::new(move |event| {
            event
                .tool_category()
                .is_some_and(|category| categories.contains(&category))
        })
    }

    /// Events produced by one subagent.
    pub fn agent(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self::new(move |event| event.agent_id() == Some(agent_id.as_str()))
    }

    /// Events not attributed to any subagent.
    #[must_use]
    pub fn main_thread() -> Self {
        Self::new(|event| event.agent_id().is_none())
    }

    #[must_use]
    pub fn errors() -> Self {
        Self::kinds([EventKind::Error])
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::new(move |event| self.matches(event) && other.matches(event))
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::new(move |event| self.matches(event) || other.matches(event))
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::new(move |event| !self.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorEvent, ToolUseEvent};
    use crate::parser::{RecordParser, ToolCategory};
    use chrono::Utc;
    use serde_json::json;

    fn tool_use(session_id: &str, agent_id: Option<&str>, name: &str) -> Event {
        let events = RecordParser::default().parse(&json!({
            "type": "assistant",
            "sessionId": session_id,
            "agentId": agent_id,
            "message": {"content": [{"type": "tool_use", "id": "t1", "name": name, "input": {}}]}
        }));
        let Some(Event::ToolUse(ToolUseEvent { .. })) = events.get(1) else {
            panic!("expected tool use");
        };
        events[1].clone()
    }

    fn error(session_id: &str) -> Event {
        Event::Error(ErrorEvent {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            agent_id: None,
            error_message: "bad".into(),
            raw_entry: None,
        })
    }

    #[test]
    fn test_session_filters() {
        let event = tool_use("abc-123", None, "Read");
        assert!(EventFilter::session("abc-123").matches(&event));
        assert!(!EventFilter::session("abc").matches(&event));
        assert!(EventFilter::session_prefix("abc").matches(&event));
    }

    #[test]
    fn test_tool_filters() {
        let event = tool_use("s", None, "Grep");
        assert!(EventFilter::tool_names(["Grep", "Glob"]).matches(&event));
        assert!(!EventFilter::tool_names(["Read"]).matches(&event));
        assert!(EventFilter::tool_categories([ToolCategory::Search]).matches(&event));
        assert!(!EventFilter::tool_categories([ToolCategory::Search]).matches(&error("s")));
    }

    #[test]
    fn test_agent_filters() {
        let main = tool_use("s", None, "Read");
        let sub = tool_use("s", Some("a1"), "Read");
        assert!(EventFilter::main_thread().matches(&main));
        assert!(!EventFilter::main_thread().matches(&sub));
        assert!(EventFilter::agent("a1").matches(&sub));
        assert!(!EventFilter::agent("a1").matches(&main));
    }

    #[test]
    fn test_combinators() {
        let event = error("s");
        let errors = EventFilter::errors();
        let other = EventFilter::session("t");
        assert!(errors.clone().or(other.clone()).matches(&event));
        assert!(!errors.clone().and(other.clone()).matches(&event));
        assert!(other.not().matches(&event));
        assert!(EventFilter::default().matches(&event));
        assert!(!errors.not().matches(&event));
    }
}
