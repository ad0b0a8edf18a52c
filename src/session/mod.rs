//! Session reconstruction: threads, tool-call pairs and live sessions.

mod error;
mod live;
mod manager;
mod thread;

pub use error::LiveSessionError;
pub use live::{
    LiveSession, LiveSessionConfig, LiveSessionSummary, RetentionPolicy, SessionMetadata,
};
pub use manager::LiveSessionManager;
pub use thread::{AgentThread, SessionSnapshot, Thread, ToolCallPair, ToolResult, ToolUse};
