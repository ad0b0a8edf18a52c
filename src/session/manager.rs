//! Registry of live sessions keyed by session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::live::{LiveSession, LiveSessionConfig};
use super::thread::ToolCallPair;
use crate::events::Event;

#[derive(Debug, Default)]
struct Registry {
    active: HashMap<String, Arc<LiveSession>>,
    ended: HashMap<String, Arc<LiveSession>>,
}

/// Creates, routes to and archives [`LiveSession`]s.
///
/// `SessionStart` creates a session, `SessionEnd` moves it to the ended
/// set, and content events for an unknown session create it on the fly.
#[derive(Debug, Default)]
pub struct LiveSessionManager {
    config: LiveSessionConfig,
    registry: Mutex<Registry>,
}

impl LiveSessionManager {
    #[must_use]
    pub fn new(config: LiveSessionConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Route one event. Returns the completed tool call it produced, if any.
    pub fn handle_event(&self, event: &Event) -> Option<ToolCallPair> {
        let session_id = event.session_id();
        if session_id.is_empty() {
            return None;
        }

        match event {
            Event::SessionStart(start) => {
                self.get_or_create(session_id, &start.project_slug);
                None
            }
            Event::SessionEnd(_) => {
                self.end_session(session_id);
                None
            }
            _ => self.session_for(session_id)?.handle_event(event),
        }
    }

    /// Active session for `session_id`, created if absent.
    pub fn get_or_create(&self, session_id: &str, project_slug: &str) -> Arc<LiveSession> {
        let mut registry = self.lock();
        let session = registry
            .active
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Live session created");
                Arc::new(LiveSession::new(session_id, project_slug, self.config.clone()))
            });
        Arc::clone(session)
    }

    /// Move a session to the ended set. Returns `false` if it was not active.
    pub fn end_session(&self, session_id: &str) -> bool {
        let mut registry = self.lock();
        match registry.active.remove(session_id) {
            Some(session) => {
                tracing::debug!(session_id, "Live session archived");
                registry.ended.insert(session_id.to_string(), session);
                true
            }
            None => false,
        }
    }

    /// An active session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.lock().active.get(session_id).cloned()
    }

    /// An ended session by id.
    #[must_use]
    pub fn get_ended(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.lock().ended.get(session_id).cloned()
    }

    #[must_use]
    pub fn active_sessions(&self) -> Vec<Arc<LiveSession>> {
        self.lock().active.values().cloned().collect()
    }

    #[must_use]
    pub fn ended_sessions(&self) -> Vec<Arc<LiveSession>> {
        self.lock().ended.values().cloned().collect()
    }

    /// Active sessions past their idle threshold.
    #[must_use]
    pub fn idle_sessions(&self) -> Vec<Arc<LiveSession>> {
        self.lock()
            .active
            .values()
            .filter(|s| s.is_idle())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    #[must_use]
    pub fn ended_count(&self) -> usize {
        self.lock().ended.len()
    }

    /// Archive active sessions whose idle threshold has passed.
    /// Returns their ids.
    pub fn prune_idle(&self) -> Vec<String> {
        let mut registry = self.lock();
        let idle: Vec<String> = registry
            .active
            .iter()
            .filter(|(_, session)| session.is_idle())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &idle {
            if let Some(session) = registry.active.remove(id) {
                registry.ended.insert(id.clone(), session);
            }
        }
        idle
    }

    /// Drop every ended session. Returns how many were dropped.
    pub fn clear_ended(&self) -> usize {
        let mut registry = self.lock();
        let count = registry.ended.len();
        registry.ended.clear();
        count
    }

    /// Messages across active sessions.
    #[must_use]
    pub fn total_messages(&self) -> u64 {
        self.lock().active.values().map(|s| s.message_count()).sum()
    }

    /// Tool uses across active sessions.
    #[must_use]
    pub fn total_tool_calls(&self) -> u64 {
        self.lock().active.values().map(|s| s.tool_call_count()).sum()
    }

    fn session_for(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        let mut registry = self.lock();
        if registry.ended.contains_key(session_id) {
            return None;
        }
        let session = registry
            .active
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Live session created for late joiner");
                Arc::new(LiveSession::new(session_id, "", self.config.clone()))
            });
        Some(Arc::clone(session))
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EndReason, SessionEndEvent, SessionStartEvent};
    use crate::parser::RecordParser;
    use chrono::Utc;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn start(session_id: &str) -> Event {
        Event::SessionStart(SessionStartEvent {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            agent_id: None,
            project_slug: "-work".into(),
            file_path: PathBuf::from(format!("/p/-work/{session_id}.jsonl")),
        })
    }

    fn end(session_id: &str) -> Event {
        Event::SessionEnd(SessionEndEvent {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            agent_id: None,
            reason: EndReason::IdleTimeout,
            idle_duration: Some(Duration::from_secs(300)),
            message_count: 0,
            tool_count: 0,
        })
    }

    fn message(session_id: &str) -> Vec<Event> {
        RecordParser::default().parse(&json!({
            "type": "user", "sessionId": session_id, "message": {"content": "hi"}
        }))
    }

    #[test]
    fn test_start_creates_and_end_archives() {
        let manager = LiveSessionManager::default();
        manager.handle_event(&start("s1"));
        let session = manager.get("s1").unwrap();
        assert_eq!(session.project_slug(), "-work");

        manager.handle_event(&end("s1"));
        assert!(manager.get("s1").is_none());
        assert!(manager.get_ended("s1").is_some());
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.ended_count(), 1);
    }

    #[test]
    fn test_late_joiner_created() {
        let manager = LiveSessionManager::default();
        for event in message("s2") {
            manager.handle_event(&event);
        }
        assert_eq!(manager.get("s2").unwrap().message_count(), 1);
        assert_eq!(manager.total_messages(), 1);
    }

    #[test]
    fn test_ended_session_not_revived() {
        let manager = LiveSessionManager::default();
        manager.handle_event(&start("s1"));
        manager.handle_event(&end("s1"));
        for event in message("s1") {
            manager.handle_event(&event);
        }
        assert!(manager.get("s1").is_none());
        assert_eq!(manager.get_ended("s1").unwrap().message_count(), 0);
    }

    #[test]
    fn test_prune_idle_and_clear_ended() {
        let manager = LiveSessionManager::new(LiveSessionConfig {
            idle_threshold: Duration::ZERO,
            ..LiveSessionConfig::default()
        });
        manager.get_or_create("s1", "-work");
        manager.get_or_create("s2", "-work");
        assert_eq!(manager.idle_sessions().len(), 2);

        let mut pruned = manager.prune_idle();
        pruned.sort();
        assert_eq!(pruned, vec!["s1", "s2"]);
        assert_eq!(manager.ended_sessions().len(), 2);
        assert_eq!(manager.clear_ended(), 2);
        assert!(manager.ended_sessions().is_empty());
    }

    #[test]
    fn test_events_without_session_ignored() {
        let manager = LiveSessionManager::default();
        for event in RecordParser::default().parse(&json!({"type": "user", "message": {"content": "x"}})) {
            assert!(manager.handle_event(&event).is_none());
        }
        assert_eq!(manager.active_count(), 0);
    }
}
