//! In-memory view of a session that grows as events arrive.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::LiveSessionError;
use super::thread::{AgentThread, SessionSnapshot, Thread, ToolCallPair, ToolResult, ToolUse};
use crate::events::{Event, ToolResultEvent, ToolUseEvent};
use crate::parser::Message;

/// How many messages a live session keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep every message.
    #[default]
    Full,
    /// Keep the most recent `max_messages` per thread.
    Sliding,
    /// Keep counters only.
    None,
}

/// Settings for one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionConfig {
    pub retention: RetentionPolicy,
    pub max_messages: usize,
    pub idle_threshold: Duration,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::Full,
            max_messages: 1000,
            idle_threshold: Duration::from_secs(120),
        }
    }
}

impl LiveSessionConfig {
    /// How many tool-use ids are remembered for pairing and duplicate
    /// detection. Unbounded under full retention.
    fn tool_id_window(&self) -> Option<usize> {
        match self.retention {
            RetentionPolicy::Full => None,
            RetentionPolicy::Sliding | RetentionPolicy::None => Some(self.max_messages.max(1)),
        }
    }
}

/// Metadata captured from the first message of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetadata {
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub version: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug)]
struct PendingToolCall {
    tool_use: ToolUse,
    request_message: Arc<Message>,
}

#[derive(Debug)]
struct LiveState {
    main: VecDeque<Arc<Message>>,
    agents: BTreeMap<String, VecDeque<Arc<Message>>>,
    pending: HashMap<String, PendingToolCall>,
    seen_tool_use_ids: HashSet<String>,
    /// Seen ids in arrival order, for bounded retention.
    seen_order: VecDeque<String>,
    completed: VecDeque<ToolCallPair>,
    metadata: SessionMetadata,
    message_count: u64,
    tool_call_count: u64,
    completed_count: u64,
    last_activity: DateTime<Utc>,
}

/// Point-in-time counters of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSessionSummary {
    pub session_id: String,
    pub project_slug: String,
    pub message_count: u64,
    pub tool_call_count: u64,
    pub pending_tool_calls: usize,
    pub completed_tool_calls: u64,
    pub agent_count: usize,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_idle: bool,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
}

/// A session's messages and tool calls, updated from events.
///
/// All methods take `&self`; readers on other threads see a consistent
/// state because every update happens under one lock.
#[derive(Debug)]
pub struct LiveSession {
    session_id: String,
    project_slug: String,
    config: LiveSessionConfig,
    started_at: DateTime<Utc>,
    state: Mutex<LiveState>,
}

impl LiveSession {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        project_slug: impl Into<String>,
        config: LiveSessionConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            project_slug: project_slug.into(),
            config,
            started_at: now,
            state: Mutex::new(LiveState {
                main: VecDeque::new(),
                agents: BTreeMap::new(),
                pending: HashMap::new(),
                seen_tool_use_ids: HashSet::new(),
                seen_order: VecDeque::new(),
                completed: VecDeque::new(),
                metadata: SessionMetadata::default(),
                message_count: 0,
                tool_call_count: 0,
                completed_count: 0,
                last_activity: now,
            }),
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
    pub fn config(&self) -> &LiveSessionConfig {
        &self.config
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Apply one event. Returns the completed pair when a tool result
    /// matches a pending tool use.
    pub fn handle_event(&self, event: &Event) -> Option<ToolCallPair> {
        let mut state = self.lock();
        state.last_activity = Utc::now();
        match event {
            Event::Message(e) => {
                state.record_message(&e.message, &self.config);
                None
            }
            Event::ToolUse(e) => {
                state.record_tool_use(e, &self.config);
                None
            }
            Event::ToolResult(e) => state.complete_tool_call(e, &self.config),
            _ => None,
        }
    }

    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.lock().message_count
    }

    /// Number of tool-use events seen, duplicates included.
    #[must_use]
    pub fn tool_call_count(&self) -> u64 {
        self.lock().tool_call_count
    }

    #[must_use]
    pub fn completed_tool_call_count(&self) -> u64 {
        self.lock().completed_count
    }

    #[must_use]
    pub fn pending_tool_call_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Tool uses still waiting for a result, as incomplete pairs ordered by
    /// request time.
    #[must_use]
    pub fn pending_tool_calls(&self) -> Vec<ToolCallPair> {
        let mut pending: Vec<ToolCallPair> = self
            .lock()
            .pending
            .values()
            .map(|p| ToolCallPair {
                tool_use: p.tool_use.clone(),
                tool_result: None,
                request_message: Arc::clone(&p.request_message),
                response_message: None,
            })
            .collect();
        pending.sort_by_key(|p| p.request_message.timestamp);
        pending
    }

    /// Retained completed tool calls, oldest first.
    #[must_use]
    pub fn completed_tool_calls(&self) -> Vec<ToolCallPair> {
        self.lock().completed.iter().cloned().collect()
    }

    /// Retained main-thread messages in arrival order.
    #[must_use]
    pub fn main_messages(&self) -> Vec<Arc<Message>> {
        self.lock().main.iter().cloned().collect()
    }

    /// Retained messages of one agent in arrival order.
    #[must_use]
    pub fn agent_messages(&self, agent_id: &str) -> Vec<Arc<Message>> {
        self.lock()
            .agents
            .get(agent_id)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.lock().agents.keys().cloned().collect()
    }

    #[must_use]
    pub fn metadata(&self) -> SessionMetadata {
        self.lock().metadata.clone()
    }

    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lock().last_activity
    }

    /// Time since the last event.
    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.last_activity())
            .to_std()
            .unwrap_or_default()
    }

    /// Whether the session has seen no event for the idle threshold.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle_duration() >= self.config.idle_threshold
    }

    /// Wall-clock time from creation to the last event.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.last_activity()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Build an immutable snapshot from the retained messages.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSessionError::NoRetainedMessages`] when the retention
    /// policy is [`RetentionPolicy::None`].
    pub fn snapshot(&self) -> Result<SessionSnapshot, LiveSessionError> {
        if self.config.retention == RetentionPolicy::None {
            return Err(LiveSessionError::NoRetainedMessages {
                session_id: self.session_id.clone(),
            });
        }

        let state = self.lock();
        let main_thread = Thread::build(state.main.iter().cloned().collect());
        let agents = state
            .agents
            .iter()
            .map(|(agent_id, messages)| {
                let thread = AgentThread {
                    agent_id: agent_id.clone(),
                    session_id: self.session_id.clone(),
                    thread: Thread::build(messages.iter().cloned().collect()),
                };
                (agent_id.clone(), thread)
            })
            .collect();

        Ok(SessionSnapshot {
            session_id: self.session_id.clone(),
            project_slug: self.project_slug.clone(),
            main_thread,
            agents,
            cwd: state.metadata.cwd.clone(),
            git_branch: state.metadata.git_branch.clone(),
            version: state.metadata.version.clone(),
            slug: state.metadata.slug.clone(),
        })
    }

    #[must_use]
    pub fn summary(&self) -> LiveSessionSummary {
        let is_idle = self.is_idle();
        let state = self.lock();
        LiveSessionSummary {
            session_id: self.session_id.clone(),
            project_slug: self.project_slug.clone(),
            message_count: state.message_count,
            tool_call_count: state.tool_call_count,
            pending_tool_calls: state.pending.len(),
            completed_tool_calls: state.completed_count,
            agent_count: state.agents.len(),
            started_at: self.started_at,
            last_activity: state.last_activity,
            is_idle,
            cwd: state.metadata.cwd.clone(),
            git_branch: state.metadata.git_branch.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LiveState {
    fn record_message(&mut self, message: &Arc<Message>, config: &LiveSessionConfig) {
        self.message_count = self.message_count.saturating_add(1);
        if self.message_count == 1 {
            self.metadata = SessionMetadata {
                cwd: message.cwd.clone(),
                git_branch: message.git_branch.clone(),
                version: message.version.clone(),
                slug: message.slug.clone(),
            };
        }

        if config.retention == RetentionPolicy::None {
            return;
        }

        let list = match message.agent_id.as_ref() {
            Some(agent_id) if message.is_sidechain => {
                self.agents.entry(agent_id.clone()).or_default()
            }
            _ => &mut self.main,
        };
        list.push_back(Arc::clone(message));
        if config.retention == RetentionPolicy::Sliding {
            while list.len() > config.max_messages {
                list.pop_front();
            }
        }
    }

    fn record_tool_use(&mut self, event: &ToolUseEvent, config: &LiveSessionConfig) {
        self.tool_call_count = self.tool_call_count.saturating_add(1);
        if !self.seen_tool_use_ids.insert(event.tool_use_id.clone()) {
            tracing::debug!(tool_use_id = %event.tool_use_id, "Ignoring duplicate tool use id");
            return;
        }
        if let Some(limit) = config.tool_id_window() {
            self.seen_order.push_back(event.tool_use_id.clone());
            while self.seen_order.len() > limit {
                let Some(oldest) = self.seen_order.pop_front() else {
                    break;
                };
                self.seen_tool_use_ids.remove(&oldest);
                if self.pending.remove(&oldest).is_some() {
                    tracing::debug!(tool_use_id = %oldest, "Dropping unanswered tool use outside retention window");
                }
            }
        }
        self.pending.insert(
            event.tool_use_id.clone(),
            PendingToolCall {
                tool_use: ToolUse {
                    id: event.tool_use_id.clone(),
                    name: event.tool_name.clone(),
                    category: event.tool_category,
                    input: event.tool_input.clone(),
                },
                request_message: Arc::clone(&event.message),
            },
        );
    }

    fn complete_tool_call(
        &mut self,
        event: &ToolResultEvent,
        config: &LiveSessionConfig,
    ) -> Option<ToolCallPair> {
        let Some(pending) = self.pending.remove(&event.tool_use_id) else {
            tracing::trace!(tool_use_id = %event.tool_use_id, "Tool result without pending tool use");
            return None;
        };

        let pair = ToolCallPair {
            tool_use: pending.tool_use,
            tool_result: Some(ToolResult {
                tool_use_id: event.tool_use_id.clone(),
                content: event.content.clone(),
                is_error: event.is_error,
            }),
            request_message: pending.request_message,
            response_message: Some(Arc::clone(&event.message)),
        };
        self.completed_count = self.completed_count.saturating_add(1);

        match config.retention {
            RetentionPolicy::Full => self.completed.push_back(pair.clone()),
            RetentionPolicy::Sliding => {
                self.completed.push_back(pair.clone());
                while self.completed.len() > config.max_messages {
                    self.completed.pop_front();
                }
            }
            RetentionPolicy::None => {}
        }

        Some(pair)
    }
}
