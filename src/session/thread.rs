//! Message threads, tool-call pairing and immutable session snapshots.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::parser::{ContentBlock, Message, Role, ToolCategory};

/// The request half of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub category: ToolCategory,
    pub input: Value,
}

/// The response half of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A tool use together with its result, once one has arrived.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallPair {
    pub tool_use: ToolUse,
    pub tool_result: Option<ToolResult>,
    pub request_message: Arc<Message>,
    pub response_message: Option<Arc<Message>>,
}

impl ToolCallPair {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.tool_result.is_some()
    }

    #[must_use]
    pub fn tool_use_id(&self) -> &str {
        &self.tool_use.id
    }

    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_use.name
    }

    #[must_use]
    pub fn category(&self) -> ToolCategory {
        self.tool_use.category
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.tool_result.as_ref().is_some_and(|r| r.is_error)
    }

    /// Time between the request and response records, if completed.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.response_message
            .as_ref()
            .map(|response| response.timestamp.signed_duration_since(self.request_message.timestamp))
    }
}

/// Messages ordered by their parent links.
///
/// Roots are visited in timestamp order, each followed depth-first by its
/// descendants (siblings in timestamp order). Messages whose parent is not
/// present are appended at the end, sorted by timestamp.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Thread {
    messages: Vec<Arc<Message>>,
}

impl Thread {
    #[must_use]
    pub fn build(messages: Vec<Arc<Message>>) -> Self {
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (idx, message) in messages.iter().enumerate() {
            match message.parent_uuid.as_deref() {
                Some(parent) => children.entry(parent).or_default().push(idx),
                None => roots.push(idx),
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|&idx| messages[idx].timestamp);
        }
        roots.sort_by_key(|&idx| messages[idx].timestamp);

        let mut visited = vec![false; messages.len()];
        let mut order = Vec::with_capacity(messages.len());
        let mut stack: Vec<usize> = roots.into_iter().rev().collect();
        while let Some(idx) = stack.pop() {
            if std::mem::replace(&mut visited[idx], true) {
                continue;
            }
            order.push(idx);
            if let Some(kids) = children.get(messages[idx].uuid.as_str()) {
                stack.extend(kids.iter().rev().filter(|&&kid| !visited[kid]));
            }
        }

        let mut orphans: Vec<usize> = (0..messages.len()).filter(|&idx| !visited[idx]).collect();
        orphans.sort_by_key(|&idx| messages[idx].timestamp);
        order.extend(orphans);

        let ordered = order.into_iter().map(|idx| Arc::clone(&messages[idx])).collect();
        Self { messages: ordered }
    }

    #[must_use]
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Arc<Message>> {
        self.messages.first()
    }

    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Arc<Message>> {
        self.messages.iter().filter(move |m| m.role == role)
    }

    /// Pair assistant tool uses with user tool results.
    ///
    /// Only the first tool use with a given id counts. Unanswered uses are
    /// returned as incomplete pairs. The result is sorted by request time.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCallPair> {
        let mut seen = HashSet::new();
        let mut pending: HashMap<&str, usize> = HashMap::new();
        let mut pairs: Vec<ToolCallPair> = Vec::new();

        for message in &self.messages {
            for block in &message.content {
                match (message.role, block) {
                    (Role::Assistant, ContentBlock::ToolUse { id, name, input }) => {
                        if !seen.insert(id.as_str()) {
                            continue;
                        }
                        pending.insert(id.as_str(), pairs.len());
                        pairs.push(ToolCallPair {
                            tool_use: ToolUse {
                                id: id.clone(),
                                name: name.clone(),
                                category: ToolCategory::for_tool(name),
                                input: input.clone(),
                            },
                            tool_result: None,
                            request_message: Arc::clone(message),
                            response_message: None,
                        });
                    }
                    (
                        Role::User,
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        },
                    ) => {
                        if let Some(idx) = pending.remove(tool_use_id.as_str()) {
                            let pair = &mut pairs[idx];
                            pair.tool_result = Some(ToolResult {
                                tool_use_id: tool_use_id.clone(),
                                content: content.clone(),
                                is_error: *is_error,
                            });
                            pair.response_message = Some(Arc::clone(message));
                        }
                    }
                    _ => {}
                }
            }
        }

        pairs.sort_by_key(|pair| pair.request_message.timestamp);
        pairs
    }

    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.timestamp).min()
    }

    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.timestamp).max()
    }
}

/// The messages one subagent wrote into its sidechain.
#[derive(Debug, Clone, Serialize)]
pub struct AgentThread {
    pub agent_id: String,
    pub session_id: String,
    pub thread: Thread,
}

/// Immutable view of a session at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub project_slug: String,
    pub main_thread: Thread,
    pub agents: BTreeMap<String, AgentThread>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub version: Option<String>,
    pub slug: Option<String>,
}

impl SessionSnapshot {
    /// Main-thread and agent messages merged in timestamp order.
    #[must_use]
    pub fn all_messages(&self) -> Vec<Arc<Message>> {
        let mut all: Vec<Arc<Message>> = self
            .main_thread
            .messages()
            .iter()
            .chain(self.agents.values().flat_map(|a| a.thread.messages()))
            .cloned()
            .collect();
        all.sort_by_key(|m| m.timestamp);
        all
    }

    /// Tool calls from the main thread and every agent, by request time.
    #[must_use]
    pub fn all_tool_calls(&self) -> Vec<ToolCallPair> {
        let mut calls = self.main_thread.tool_calls();
        for agent in self.agents.values() {
            calls.extend(agent.thread.tool_calls());
        }
        calls.sort_by_key(|pair| pair.request_message.timestamp);
        calls
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.main_thread.len() + self.agents.values().map(|a| a.thread.len()).sum::<usize>()
    }

    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.agents
            .values()
            .filter_map(|a| a.thread.start_time())
            .chain(self.main_thread.start_time())
            .min()
    }

    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.agents
            .values()
            .filter_map(|a| a.thread.end_time())
            .chain(self.main_thread.end_time())
            .max()
    }

    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        Some(self.end_time()? - self.start_time()?)
    }
}
