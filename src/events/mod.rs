//! Typed events and their delivery.

mod bus;
mod filter;
mod types;

pub use bus::{EventBus, Handler, SubscriptionId, Topic};
pub use filter::EventFilter;
pub use types::{
    EndReason, ErrorEvent, Event, EventKind, MessageEvent, SessionEndEvent, SessionIdleEvent,
    SessionResumeEvent, SessionStartEvent, ToolCallCompletedEvent, ToolResultEvent, ToolUseEvent,
    UnknownEventKind,
};
