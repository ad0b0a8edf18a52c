//! Live session error types.

/// Errors raised when reading from a live session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveSessionError {
    /// The session's retention policy keeps counters only.
    #[error("Session {session_id} keeps no messages (retention policy is none)")]
    NoRetainedMessages { session_id: String },
}
