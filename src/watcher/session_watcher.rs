//! Poll-driven watcher over a Claude Code projects directory.
//!
//! Each cycle discovers new session and subagent files, reads what was
//! appended to every tracked file, turns the new records into events and
//! advances each session's idle/end lifecycle. Events are published to an
//! [`EventBus`] after the registry lock is released, so handlers may call
//! back into the watcher.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::discovery::{read_session_id, scan_projects, SessionFile};
use super::error::WatcherError;
use super::hints::{hint_source_for, ChangeHintSource};
use super::tailer::{JsonlTailer, TailedLine};
use super::tracked::{SessionStats, TailSlot, TrackedSession, Transition};
use crate::config::WatcherConfig;
use crate::events::{
    EndReason, ErrorEvent, Event, EventBus, EventKind, SessionEndEvent, SessionIdleEvent,
    SessionResumeEvent, SessionStartEvent, SubscriptionId, ToolCallCompletedEvent,
};
use crate::parser::RecordParser;
use crate::session::LiveSessionManager;
use crate::state::StatePersistence;
use crate::threads::{join_within, JOIN_TIMEOUT};

#[derive(Debug, Default)]
struct Registry {
    /// Sessions being read. Ended sessions leave this map.
    sessions: BTreeMap<String, TrackedSession>,
    /// Final stats of ended sessions, until evicted.
    ended: BTreeMap<String, SessionStats>,
    /// Tracked file path to owning session id.
    owners: HashMap<PathBuf, String>,
    /// Files that existed at start when existing content is skipped,
    /// with their length at that time.
    baseline: HashMap<PathBuf, u64>,
    /// Agent files not yet attached, with the session id read from them.
    unattached: HashMap<PathBuf, Option<String>>,
}

impl Registry {
    /// Move an ended session out of the polled set, dropping its tailers.
    ///
    /// Its files are baselined at their committed offsets, so they are
    /// neither re-read while archived nor replayed after eviction.
    fn retire(&mut self, tracked: TrackedSession) {
        let stats = tracked.stats();
        let session_id = stats.session_id.clone();

        let main = &tracked.main.tailer;
        self.owners.remove(main.path());
        self.baseline
            .insert(main.path().to_path_buf(), main.committed_offset());
        for slot in tracked.agents.values() {
            let path = slot.tailer.path().to_path_buf();
            self.owners.remove(&path);
            self.baseline.insert(path.clone(), slot.tailer.committed_offset());
            self.unattached.insert(path, Some(session_id.clone()));
        }

        tracing::debug!(session_id = %session_id, agents = tracked.agents.len(), "Retired ended session");
        self.ended.insert(session_id, stats);
    }

    /// Forget ended sessions. Returns how many were removed.
    fn evict_ended(&mut self) -> usize {
        let ended = std::mem::take(&mut self.ended);
        self.unattached
            .retain(|_, owner| !matches!(owner, Some(id) if ended.contains_key(id)));
        ended.len()
    }
}

/// Watches session logs and publishes [`Event`]s.
pub struct SessionWatcher {
    config: WatcherConfig,
    parser: RecordParser,
    bus: Arc<EventBus>,
    live: Option<Arc<LiveSessionManager>>,
    persistence: Option<StatePersistence>,
    hints: Mutex<Option<Box<dyn ChangeHintSource>>>,
    registry: Mutex<Registry>,
    started: AtomicBool,
}

impl std::fmt::Debug for SessionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWatcher")
            .field("base_dir", &self.config.base_dir)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionWatcher {
    /// Create a watcher. Nothing is read until [`start`](Self::start) or the
    /// first poll.
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        let parser = RecordParser::new(config.truncate_inputs, config.max_input_length);
        let live = config
            .live
            .enabled
            .then(|| Arc::new(LiveSessionManager::new(config.live.session_config())));
        let persistence = config.state_file.clone().map(|path| {
            let persistence = StatePersistence::new(path, config.state_save_interval());
            let pruned = persistence.prune_stale(config.state_max_age());
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned stale file positions");
            }
            persistence
        });

        Self {
            config,
            parser,
            bus: Arc::new(EventBus::new()),
            live,
            persistence,
            hints: Mutex::new(None),
            registry: Mutex::new(Registry::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the change-hint source chosen from the configuration.
    #[must_use]
    pub fn with_hint_source(self, source: Box<dyn ChangeHintSource>) -> Self {
        *self.hints.lock().unwrap_or_else(PoisonError::into_inner) = Some(source);
        self
    }

    /// Route events into `manager`, enabling tool-call completion events.
    #[must_use]
    pub fn with_live_manager(mut self, manager: Arc<LiveSessionManager>) -> Self {
        self.live = Some(manager);
        self
    }

    #[must_use]
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[must_use]
    pub fn live_sessions(&self) -> Option<&Arc<LiveSessionManager>> {
        self.live.as_ref()
    }

    #[must_use]
    pub fn persistence(&self) -> Option<&StatePersistence> {
        self.persistence.as_ref()
    }

    /// Subscribe to one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe_any(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Check the projects directory and prepare background services.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::BaseDirUnavailable`] if the projects
    /// directory cannot be read, or an error if the state saver thread
    /// cannot be started.
    pub fn start(&self) -> Result<(), WatcherError> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let files = scan_projects(&self.config.base_dir)?;
        if !self.config.process_existing {
            let mut registry = self.lock();
            for file in &files {
                let len = fs::metadata(file.path()).map(|m| m.len()).unwrap_or(0);
                registry.baseline.insert(file.path().to_path_buf(), len);
            }
        }

        {
            let mut hints = self.hints.lock().unwrap_or_else(PoisonError::into_inner);
            if hints.is_none() {
                *hints = Some(hint_source_for(&self.config.base_dir, self.config.use_notify));
            }
        }

        if let Some(persistence) = &self.persistence {
            persistence.start()?;
        }

        self.started.store(true, Ordering::SeqCst);
        tracing::info!(
            base_dir = %self.config.base_dir.display(),
            existing_files = files.len(),
            process_existing = self.config.process_existing,
            "Session watcher started"
        );
        Ok(())
    }

    /// Run one poll cycle now.
    pub fn poll_once(&self) {
        self.poll_at(Instant::now());
    }

    /// Run one poll cycle, treating `now` as the current time for
    /// idle and end timeouts.
    pub fn poll_at(&self, now: Instant) {
        if let Err(e) = self.start() {
            tracing::warn!(error = %e, "Watcher not started, retrying next cycle");
            return;
        }

        let hinted = self.drain_hints();
        self.discover(now);

        for session_id in self.poll_order(&hinted) {
            let outbox = {
                let mut registry = self.lock();
                match registry.sessions.get_mut(&session_id) {
                    Some(tracked) if !tracked.is_ended() => self.process_session(tracked, now),
                    _ => continue,
                }
            };
            self.dispatch(&outbox);
        }

        let outbox = self.check_timeouts(now);
        self.dispatch(&outbox);
    }

    /// Poll until `stop` receives a message or its sender is dropped,
    /// then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started.
    pub fn run_until(&self, stop: &mpsc::Receiver<()>) -> Result<(), WatcherError> {
        self.start()?;
        self.poll_loop(stop);
        self.shutdown();
        Ok(())
    }

    /// Poll for `duration`, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started.
    pub fn run_for(&self, duration: Duration) -> Result<(), WatcherError> {
        self.start()?;
        let deadline = Instant::now() + duration;
        loop {
            self.poll_once();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.config.poll_interval().min(deadline - now));
        }
        self.shutdown();
        Ok(())
    }

    /// Start polling on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started or the thread
    /// cannot be spawned.
    pub fn spawn(self: &Arc<Self>) -> Result<WatcherHandle, WatcherError> {
        self.start()?;
        let (stop_tx, stop_rx) = mpsc::channel();
        let watcher = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("session-watcher".into())
            .spawn(move || {
                watcher.poll_loop(&stop_rx);
                watcher.shutdown();
            })?;

        Ok(WatcherHandle {
            watcher: Arc::clone(self),
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Flush persisted positions and stop the state saver.
    pub fn shutdown(&self) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.stop() {
                tracing::warn!(error = %e, "Failed to save watcher state on shutdown");
            }
        }
        tracing::info!(sessions = self.tracked_session_count(), "Session watcher stopped");
    }

    /// Ids of sessions that have not ended.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Stats of a followed or archived ended session.
    #[must_use]
    pub fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        let registry = self.lock();
        registry
            .sessions
            .get(session_id)
            .map(TrackedSession::stats)
            .or_else(|| registry.ended.get(session_id).cloned())
    }

    #[must_use]
    pub fn all_session_stats(&self) -> Vec<SessionStats> {
        let registry = self.lock();
        registry
            .sessions
            .values()
            .map(TrackedSession::stats)
            .chain(registry.ended.values().cloned())
            .collect()
    }

    /// Sessions currently being read.
    #[must_use]
    pub fn tracked_session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ended sessions still held in the archive.
    #[must_use]
    pub fn ended_session_count(&self) -> usize {
        self.lock().ended.len()
    }

    /// Drop the stats of every ended session.
    ///
    /// An evicted session's file is tracked again as a new session only
    /// if it grows past the point where reading stopped.
    pub fn clear_ended(&self) -> usize {
        let evicted = self.lock().evict_ended();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted ended sessions");
        }
        evicted
    }

    fn poll_loop(&self, stop: &mpsc::Receiver<()>) {
        loop {
            self.poll_once();
            match stop.recv_timeout(self.config.poll_interval()) {
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_hints(&self) -> Vec<PathBuf> {
        self.hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(|source| source.drain())
            .unwrap_or_default()
    }

    /// Hinted sessions first, then the rest in id order.
    fn poll_order(&self, hinted: &[PathBuf]) -> Vec<String> {
        let registry = self.lock();
        let mut order: Vec<String> = Vec::new();
        for path in hinted {
            if let Some(owner) = registry.owners.get(path) {
                if !order.contains(owner) {
                    order.push(owner.clone());
                }
            }
        }
        for id in registry.sessions.keys() {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        order
    }

    fn discover(&self, now: Instant) {
        let files = match scan_projects(&self.config.base_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot scan projects directory, retrying next cycle");
                return;
            }
        };

        let mut agents = Vec::new();
        for file in files {
            match file {
                SessionFile::Main {
                    session_id,
                    project_slug,
                    path,
                } => {
                    let outbox = {
                        let mut registry = self.lock();
                        if registry.owners.contains_key(&path)
                            || registry.sessions.contains_key(&session_id)
                            || registry.ended.contains_key(&session_id)
                        {
                            continue;
                        }
                        self.track_session(&mut registry, session_id, project_slug, path, now)
                    };
                    self.dispatch(&outbox);
                }
                SessionFile::Agent { agent_id, path, .. } => agents.push((agent_id, path)),
            }
        }

        let mut registry = self.lock();
        for (agent_id, path) in agents {
            self.attach_agent(&mut registry, agent_id, path);
        }
    }

    fn open_tailer(&self, registry: &mut Registry, path: &Path) -> Option<JsonlTailer> {
        let mut offset = 0;
        if let Some(&baseline) = registry.baseline.get(path) {
            let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if len <= baseline {
                return None;
            }
            registry.baseline.remove(path);
            offset = baseline;
        }

        let mut tailer = JsonlTailer::with_offset(path.to_path_buf(), offset);
        if let Some(persistence) = &self.persistence {
            if persistence.apply(&mut tailer) {
                tracing::debug!(path = %path.display(), offset = tailer.offset(), "Resuming from saved position");
            }
        }
        Some(tailer)
    }

    fn track_session(
        &self,
        registry: &mut Registry,
        session_id: String,
        project_slug: String,
        path: PathBuf,
        now: Instant,
    ) -> Vec<Event> {
        let Some(tailer) = self.open_tailer(registry, &path) else {
            return Vec::new();
        };

        tracing::info!(session_id = %session_id, project = %project_slug, "Tracking session");
        registry.owners.insert(path.clone(), session_id.clone());
        registry.sessions.insert(
            session_id.clone(),
            TrackedSession::new(&session_id, &project_slug, tailer, now),
        );

        let mut outbox = Vec::new();
        self.lifecycle(
            Event::SessionStart(SessionStartEvent {
                timestamp: Utc::now(),
                session_id,
                agent_id: None,
                project_slug,
                file_path: path,
            }),
            &mut outbox,
        );
        outbox
    }

    fn attach_agent(&self, registry: &mut Registry, agent_id: String, path: PathBuf) {
        if registry.owners.contains_key(&path) {
            return;
        }

        let session_id = match registry.unattached.get(&path) {
            Some(Some(id)) => id.clone(),
            _ => match read_session_id(&path) {
                Some(id) => id,
                None => {
                    registry.unattached.insert(path, None);
                    return;
                }
            },
        };

        let attachable = registry
            .sessions
            .get(&session_id)
            .is_some_and(|t| !t.is_ended() && !t.has_agent(&agent_id));
        if !attachable {
            registry.unattached.insert(path, Some(session_id));
            return;
        }

        let Some(tailer) = self.open_tailer(registry, &path) else {
            registry.unattached.insert(path, Some(session_id));
            return;
        };
        registry.unattached.remove(&path);
        registry.owners.insert(path, session_id.clone());
        if let Some(tracked) = registry.sessions.get_mut(&session_id) {
            tracing::debug!(session_id = %session_id, agent_id = %agent_id, "Attached agent file");
            tracked.attach_agent(agent_id, tailer);
        }
    }

    fn process_session(&self, tracked: &mut TrackedSession, now: Instant) -> Vec<Event> {
        let session_id = tracked.session_id().to_string();
        let mut outbox = Vec::new();
        let mut lines: Vec<(Option<String>, TailedLine)> = Vec::new();

        self.read_slot(&session_id, None, &mut tracked.main, &mut lines, &mut outbox);
        for (agent_id, slot) in &mut tracked.agents {
            self.read_slot(&session_id, Some(agent_id.as_str()), slot, &mut lines, &mut outbox);
        }

        if lines.is_empty() {
            return outbox;
        }

        if let Some(idle_duration) = tracked.record_activity(now) {
            tracing::info!(session_id = %session_id, ?idle_duration, "Session resumed");
            self.lifecycle(
                Event::SessionResume(SessionResumeEvent {
                    timestamp: Utc::now(),
                    session_id: session_id.clone(),
                    agent_id: None,
                    idle_duration,
                }),
                &mut outbox,
            );
        }

        for (agent_id, line) in lines {
            let events = match line {
                TailedLine::Record(record) => self.parser.parse(&record),
                TailedLine::Malformed { line, error } => vec![RecordParser::malformed_line(
                    &session_id,
                    agent_id.as_deref(),
                    &line,
                    &error,
                )],
            };
            for event in events {
                self.route(tracked, event, &mut outbox);
            }
        }

        outbox
    }

    fn read_slot(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
        slot: &mut TailSlot,
        lines: &mut Vec<(Option<String>, TailedLine)>,
        outbox: &mut Vec<Event>,
    ) {
        let before = slot.tailer.committed_offset();
        let (new_lines, error) = slot.read();

        if let Some(e) = error {
            tracing::warn!(
                session_id,
                path = %slot.tailer.path().display(),
                error = %e,
                "Failed to read session file"
            );
            outbox.push(Event::Error(ErrorEvent {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                agent_id: agent_id.map(str::to_string),
                error_message: e.to_string(),
                raw_entry: None,
            }));
        }

        if slot.tailer.committed_offset() != before {
            if let Some(persistence) = &self.persistence {
                persistence.update(&slot.tailer);
            }
        }

        let agent_id = agent_id.map(str::to_string);
        lines.extend(new_lines.into_iter().map(|line| (agent_id.clone(), line)));
    }

    /// Count, forward to the live manager, and queue one content event,
    /// followed by the tool-call completion it produced, if any.
    fn route(&self, tracked: &mut TrackedSession, event: Event, outbox: &mut Vec<Event>) {
        tracked.count_event(&event);
        let completed = self.live.as_ref().and_then(|live| live.handle_event(&event));
        outbox.push(event);

        if let Some(pair) = completed {
            outbox.push(Event::ToolCallCompleted(ToolCallCompletedEvent {
                timestamp: Utc::now(),
                session_id: pair.request_message.session_id.clone(),
                agent_id: pair.request_message.agent_id.clone(),
                tool_call: pair,
            }));
        }
    }

    /// Lifecycle events always reach the live manager; they are published
    /// only when session events are enabled.
    fn lifecycle(&self, event: Event, outbox: &mut Vec<Event>) {
        if let Some(live) = &self.live {
            live.handle_event(&event);
        }
        if self.config.emit_session_events {
            outbox.push(event);
        }
    }

    fn check_timeouts(&self, now: Instant) -> Vec<Event> {
        let idle_timeout = self.config.idle_timeout();
        let end_timeout = self.config.end_timeout();
        let mut outbox = Vec::new();

        let mut registry = self.lock();
        let mut ended = Vec::new();
        for tracked in registry.sessions.values_mut() {
            match tracked.check_timeouts(now, idle_timeout, end_timeout) {
                Transition::None => {}
                Transition::BecameIdle { idle_since } => {
                    tracing::info!(session_id = %tracked.session_id(), "Session idle");
                    self.lifecycle(
                        Event::SessionIdle(SessionIdleEvent {
                            timestamp: Utc::now(),
                            session_id: tracked.session_id().to_string(),
                            agent_id: None,
                            idle_since,
                        }),
                        &mut outbox,
                    );
                }
                Transition::Ended { idle_duration } => {
                    tracing::info!(
                        session_id = %tracked.session_id(),
                        messages = tracked.message_count(),
                        tools = tracked.tool_count(),
                        "Session ended"
                    );
                    self.lifecycle(
                        Event::SessionEnd(SessionEndEvent {
                            timestamp: Utc::now(),
                            session_id: tracked.session_id().to_string(),
                            agent_id: None,
                            reason: EndReason::IdleTimeout,
                            idle_duration: Some(idle_duration),
                            message_count: tracked.message_count(),
                            tool_count: tracked.tool_count(),
                        }),
                        &mut outbox,
                    );
                    ended.push(tracked.session_id().to_string());
                }
            }
        }

        for session_id in ended {
            if let Some(tracked) = registry.sessions.remove(&session_id) {
                registry.retire(tracked);
            }
        }
        outbox
    }

    fn dispatch(&self, outbox: &[Event]) {
        for event in outbox {
            self.bus.publish(event);
        }
    }
}

/// Handle to a watcher polling on a background thread.
///
/// Dropping the handle stops the thread.
#[derive(Debug)]
pub struct WatcherHandle {
    watcher: Arc<SessionWatcher>,
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    #[must_use]
    pub fn watcher(&self) -> &Arc<SessionWatcher> {
        &self.watcher
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the poll thread and wait (bounded) for it to finish.
    /// Returns `false` if it did not stop in time.
    pub fn stop(mut self) -> bool {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let _ = self.stop_tx.send(());
        join_within(thread, JOIN_TIMEOUT, "session-watcher")
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
