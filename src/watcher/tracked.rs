//! Per-session tracking state and the idle/end lifecycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::WatcherError;
use super::tailer::{JsonlTailer, TailedLine};
use crate::events::Event;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Active,
    Idle,
    Ended,
}

/// Result of a timeout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameIdle { idle_since: DateTime<Utc> },
    Ended { idle_duration: Duration },
}

/// A tailer plus the last read error reported for it.
#[derive(Debug)]
pub(crate) struct TailSlot {
    pub(crate) tailer: JsonlTailer,
    last_error: Option<String>,
}

impl TailSlot {
    pub(crate) fn new(tailer: JsonlTailer) -> Self {
        Self {
            tailer,
            last_error: None,
        }
    }

    /// Read new lines. Returns the error only the first time it occurs in a
    /// row, so a missing file is reported once rather than every cycle.
    pub(crate) fn read(&mut self) -> (Vec<TailedLine>, Option<WatcherError>) {
        match self.tailer.read_new() {
            Ok(lines) => {
                self.last_error = None;
                (lines, None)
            }
            Err(e) => {
                let message = e.to_string();
                if self.last_error.as_deref() == Some(message.as_str()) {
                    (Vec::new(), None)
                } else {
                    self.last_error = Some(message);
                    (Vec::new(), Some(e))
                }
            }
        }
    }
}

/// Counters and status of a tracked session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub project_slug: String,
    pub file_path: PathBuf,
    pub state: LifecycleState,
    pub message_count: u64,
    pub tool_count: u64,
    pub agent_files: usize,
    pub discovered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: Option<String>,
}

/// A session the watcher follows: its main file, its agent files and its
/// lifecycle state.
///
/// Time is passed in explicitly so the lifecycle can be driven
/// deterministically.
#[derive(Debug)]
pub struct TrackedSession {
    session_id: String,
    project_slug: String,
    pub(crate) main: TailSlot,
    pub(crate) agents: BTreeMap<String, TailSlot>,
    state: LifecycleState,
    discovered_at: DateTime<Utc>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    idle_entered: Option<Instant>,
    message_count: u64,
    tool_count: u64,
    cwd: Option<String>,
}

impl TrackedSession {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        project_slug: impl Into<String>,
        tailer: JsonlTailer,
        now: Instant,
    ) -> Self {
        let wall = Utc::now();
        Self {
            session_id: session_id.into(),
            project_slug: project_slug.into(),
            main: TailSlot::new(tailer),
            agents: BTreeMap::new(),
            state: LifecycleState::Active,
            discovered_at: wall,
            last_activity: now,
            last_activity_at: wall,
            idle_entered: None,
            message_count: 0,
            tool_count: 0,
            cwd: None,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn project_slug(&self) -> &str {
        &self.project_slug
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        self.main.tailer.path()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == LifecycleState::Ended
    }

    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    #[must_use]
    pub fn tool_count(&self) -> u64 {
        self.tool_count
    }

    #[must_use]
    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub(crate) fn attach_agent(&mut self, agent_id: String, tailer: JsonlTailer) {
        self.agents.insert(agent_id, TailSlot::new(tailer));
    }

    /// Note new lines at `now`. Returns how long the session had been
    /// inactive when this activity ends an idle period.
    pub fn record_activity(&mut self, now: Instant) -> Option<Duration> {
        let resumed = (self.state == LifecycleState::Idle)
            .then(|| now.saturating_duration_since(self.last_activity));
        if resumed.is_some() {
            self.transition(LifecycleState::Active);
            self.idle_entered = None;
        }
        self.last_activity = now;
        self.last_activity_at = Utc::now();
        resumed
    }

    /// Update counters from an event produced for this session.
    pub fn count_event(&mut self, event: &Event) {
        match event {
            Event::Message(e) => {
                self.message_count = self.message_count.saturating_add(1);
                if self.cwd.is_none() {
                    self.cwd.clone_from(&e.message.cwd);
                }
            }
            Event::ToolUse(_) => self.tool_count = self.tool_count.saturating_add(1),
            _ => {}
        }
    }

    /// Advance the lifecycle at `now`.
    ///
    /// An active session becomes idle once `idle_timeout` has passed since
    /// its last activity. An idle session ends once `end_timeout` has passed
    /// since it became idle. At most one transition happens per call.
    pub fn check_timeouts(
        &mut self,
        now: Instant,
        idle_timeout: Duration,
        end_timeout: Duration,
    ) -> Transition {
        match self.state {
            LifecycleState::Active => {
                if now.saturating_duration_since(self.last_activity) > idle_timeout {
                    self.transition(LifecycleState::Idle);
                    self.idle_entered = Some(now);
                    Transition::BecameIdle {
                        idle_since: self.last_activity_at,
                    }
                } else {
                    Transition::None
                }
            }
            LifecycleState::Idle => {
                let entered = self.idle_entered.unwrap_or(now);
                if now.saturating_duration_since(entered) > end_timeout {
                    self.transition(LifecycleState::Ended);
                    Transition::Ended {
                        idle_duration: now.saturating_duration_since(self.last_activity),
                    }
                } else {
                    Transition::None
                }
            }
            LifecycleState::Ended => Transition::None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            project_slug: self.project_slug.clone(),
            file_path: self.file_path().to_path_buf(),
            state: self.state,
            message_count: self.message_count,
            tool_count: self.tool_count,
            agent_files: self.agents.len(),
            discovered_at: self.discovered_at,
            last_activity: self.last_activity_at,
            cwd: self.cwd.clone(),
        }
    }

    fn transition(&mut self, to: LifecycleState) {
        tracing::debug!(session_id = %self.session_id, from = ?self.state, to = ?to, "State transition");
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RecordParser;
    use serde_json::json;

    const IDLE: Duration = Duration::from_secs(1);
    const END: Duration = Duration::from_secs(2);

    fn tracked(now: Instant) -> TrackedSession {
        TrackedSession::new("sess-1", "-work", JsonlTailer::new(PathBuf::from("/nonexistent.jsonl")), now)
    }

    #[test]
    fn test_idle_then_end() {
        let t0 = Instant::now();
        let mut session = tracked(t0);

        assert_eq!(session.check_timeouts(t0 + Duration::from_millis(900), IDLE, END), Transition::None);
        assert!(matches!(
            session.check_timeouts(t0 + Duration::from_millis(1100), IDLE, END),
            Transition::BecameIdle { .. }
        ));
        assert_eq!(session.state(), LifecycleState::Idle);

        // End is measured from when the session went idle.
        assert_eq!(session.check_timeouts(t0 + Duration::from_millis(3000), IDLE, END), Transition::None);
        let transition = session.check_timeouts(t0 + Duration::from_millis(3200), IDLE, END);
        assert_eq!(
            transition,
            Transition::Ended {
                idle_duration: Duration::from_millis(3200)
            }
        );
        assert!(session.is_ended());
        assert_eq!(session.check_timeouts(t0 + Duration::from_secs(60), IDLE, END), Transition::None);
    }

    #[test]
    fn test_activity_resumes_idle_session() {
        let t0 = Instant::now();
        let mut session = tracked(t0);
        assert_eq!(session.record_activity(t0 + Duration::from_millis(500)), None);

        session.check_timeouts(t0 + Duration::from_millis(1600), IDLE, END);
        assert_eq!(session.state(), LifecycleState::Idle);

        let resumed = session.record_activity(t0 + Duration::from_millis(2000));
        assert_eq!(resumed, Some(Duration::from_millis(1500)));
        assert_eq!(session.state(), LifecycleState::Active);

        // The idle clock restarts from the new activity.
        assert_eq!(session.check_timeouts(t0 + Duration::from_millis(2900), IDLE, END), Transition::None);
    }

    #[test]
    fn test_count_event() {
        let mut session = tracked(Instant::now());
        let events = RecordParser::default().parse(&json!({
            "type": "assistant", "sessionId": "sess-1", "cwd": "/work",
            "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {}},
                {"type": "tool_use", "id": "t2", "name": "Read", "input": {}}
            ]}
        }));
        for event in &events {
            session.count_event(event);
        }
        let stats = session.stats();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.tool_count, 2);
        assert_eq!(stats.cwd.as_deref(), Some("/work"));
    }

    #[test]
    fn test_slot_reports_repeated_error_once() {
        let mut slot = TailSlot::new(JsonlTailer::new(PathBuf::from("/nonexistent/s.jsonl")));
        assert!(slot.read().1.is_some());
        assert!(slot.read().1.is_none());
    }
}
