use thiserror::Error;

use super::ChannelKind;

/// Errors raised by the collaboration session layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport never became ready
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailure { endpoint: String, reason: String },

    #[error("joining the {kind} channel of room '{room}' failed: {reason}")]
    JoinFailure {
        room: String,
        kind: ChannelKind,
        reason: String,
    },

    /// Logged during teardown, never returned to the caller of teardown
    #[error("teardown step '{step}' failed: {reason}")]
    TeardownFailure { step: &'static str, reason: String },

    #[error("transport is closed")]
    TransportClosed,

    /// The session was unmounted before the connect got going
    #[error("session torn down while connecting")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crdt error: {0}")]
    Crdt(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

impl SessionError {
    pub fn connection(endpoint: &str, reason: impl Into<String>) -> Self {
        SessionError::ConnectionFailure {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    pub fn join(room: &str, kind: ChannelKind, reason: impl Into<String>) -> Self {
        SessionError::JoinFailure {
            room: room.to_string(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, SessionError::ConnectionFailure { .. })
    }

    pub fn is_join_failure(&self) -> bool {
        matches!(self, SessionError::JoinFailure { .. })
    }
}
