//! Async consumption of watcher events.
//!
//! The poll loop stays on its own OS thread; events cross into async code
//! through a bounded tokio channel. When the channel is full the event is
//! dropped and counted, so a slow consumer never stalls the watcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::error::WatcherError;
use super::session_watcher::{SessionWatcher, WatcherHandle};
use crate::config::WatcherConfig;
use crate::events::{Event, EventBus, SubscriptionId};

/// Default capacity of the async event queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// A bus subscription that forwards every event into a bounded channel.
#[derive(Debug)]
pub struct EventChannel {
    subscription: SubscriptionId,
    receiver: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventChannel {
    /// Subscribe to all events on `bus`, queueing up to `capacity`.
    #[must_use]
    pub fn open(bus: &EventBus, capacity: usize) -> Self {
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dropped);

        let subscription = bus.subscribe_any(move |event| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if count == 1 || count % 100 == 0 {
                    tracing::warn!(
                        dropped_total = count,
                        event_type = %event.kind(),
                        "Event queue full, event dropped"
                    );
                }
            }
        });

        Self {
            subscription,
            receiver,
            dropped,
        }
    }

    #[must_use]
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Wait for the next event. Returns `None` once the subscription is
    /// gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Events discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A [`SessionWatcher`] running on a background thread, consumed with
/// `async`/`await`.
#[derive(Debug)]
pub struct AsyncSessionWatcher {
    watcher: Arc<SessionWatcher>,
    handle: Option<WatcherHandle>,
    channel: EventChannel,
}

impl AsyncSessionWatcher {
    /// Build a watcher from `config` and start it.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started.
    pub fn start(config: WatcherConfig, queue_size: usize) -> Result<Self, WatcherError> {
        Self::from_watcher(Arc::new(SessionWatcher::new(config)), queue_size)
    }

    /// Start an existing watcher. Handlers already on its bus keep working.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started.
    pub fn from_watcher(
        watcher: Arc<SessionWatcher>,
        queue_size: usize,
    ) -> Result<Self, WatcherError> {
        let channel = EventChannel::open(watcher.bus(), queue_size);
        let handle = match watcher.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                watcher.bus().unsubscribe(channel.subscription());
                return Err(e);
            }
        };
        Ok(Self {
            watcher,
            handle: Some(handle),
            channel,
        })
    }

    #[must_use]
    pub fn watcher(&self) -> &Arc<SessionWatcher> {
        &self.watcher
    }

    /// Wait for the next event. Returns `None` after [`stop`](Self::stop)
    /// once the queue is drained.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.channel.recv().await
    }

    /// Events discarded because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.channel.dropped()
    }

    /// Stop the poll thread without blocking the runtime. Queued events
    /// remain readable. Returns `false` if the thread did not stop in time.
    pub async fn stop(&mut self) -> bool {
        let stopped = match self.handle.take() {
            Some(handle) => tokio::task::spawn_blocking(move || handle.stop())
                .await
                .unwrap_or(false),
            None => true,
        };
        self.watcher.bus().unsubscribe(self.channel.subscription());
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorEvent, EventKind};
    use chrono::Utc;

    fn error_event(n: usize) -> Event {
        Event::Error(ErrorEvent {
            timestamp: Utc::now(),
            session_id: format!("s{n}"),
            agent_id: None,
            error_message: "x".into(),
            raw_entry: None,
        })
    }

    #[tokio::test]
    async fn test_channel_forwards_events() {
        let bus = EventBus::new();
        let mut channel = EventChannel::open(&bus, 8);
        bus.publish(&error_event(1));

        let event = channel.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(event.session_id(), "s1");
    }

    #[tokio::test]
    async fn test_full_channel_drops_and_counts() {
        let bus = EventBus::new();
        let mut channel = EventChannel::open(&bus, 2);
        for n in 0..5 {
            bus.publish(&error_event(n));
        }

        assert_eq!(channel.dropped(), 3);
        assert_eq!(channel.try_recv().unwrap().session_id(), "s0");
        assert_eq!(channel.try_recv().unwrap().session_id(), "s1");
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_channel_closes_after_unsubscribe() {
        let bus = EventBus::new();
        let mut channel = EventChannel::open(&bus, 4);
        bus.publish(&error_event(1));
        assert!(bus.unsubscribe(channel.subscription()));

        assert!(channel.recv().await.is_some());
        assert!(channel.recv().await.is_none());
    }
}
