//! Synchronous publish/subscribe dispatch of watcher events.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::filter::EventFilter;
use super::types::{Event, EventKind};

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// What a handler listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Kind(EventKind),
    /// Every event, delivered after the kind-specific handlers.
    Any,
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

/// Routes each published event to the handlers registered for its kind,
/// then to wildcard handlers, each group in subscription order.
///
/// Handlers run on the publishing thread. A panicking handler is logged and
/// skipped; the remaining handlers still receive the event.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic` (an [`EventKind`] or [`Topic::Any`]).
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = topic.into();
        self.write().push(Subscription {
            id,
            topic,
            handler: Arc::new(handler),
        });
        tracing::trace!(?id, ?topic, "Handler subscribed");
        id
    }

    /// Register `handler` for every event.
    pub fn subscribe_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Any, handler)
    }

    /// Register `handler` for `topic`, invoked only for events `filter` accepts.
    pub fn subscribe_filtered<F>(
        &self,
        topic: impl Into<Topic>,
        filter: EventFilter,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(topic, move |event| {
            if filter.matches(event) {
                handler(event);
            }
        })
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Remove all handlers for `topic`, or every handler when `None`.
    pub fn clear(&self, topic: Option<Topic>) {
        let mut subscriptions = self.write();
        match topic {
            Some(topic) => subscriptions.retain(|s| s.topic != topic),
            None => subscriptions.clear(),
        }
    }

    /// Deliver `event` and return how many handlers completed without panicking.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while being invoked.
    pub fn publish(&self, event: &Event) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let subscriptions = self.read();
            let specific = subscriptions.iter().filter(|s| s.topic == Topic::Kind(kind));
            let wildcard = subscriptions.iter().filter(|s| s.topic == Topic::Any);
            specific.chain(wildcard).map(|s| Arc::clone(&s.handler)).collect()
        };

        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    tracing::error!(
                        event_type = %kind,
                        session_id = %event.session_id(),
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Publish each event in order. Returns the total delivery count.
    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> usize {
        events.into_iter().map(|event| self.publish(event)).sum()
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.read().len()
    }

    /// Handler counts per topic.
    #[must_use]
    pub fn topic_counts(&self) -> HashMap<Topic, usize> {
        let mut counts = HashMap::new();
        for subscription in self.read().iter() {
            *counts.entry(subscription.topic).or_insert(0) += 1;
        }
        counts
    }

    /// Whether publishing an event of `kind` would reach any handler.
    #[must_use]
    pub fn has_handlers(&self, kind: EventKind) -> bool {
        self.read()
            .iter()
            .any(|s| s.topic == Topic::Any || s.topic == Topic::Kind(kind))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
