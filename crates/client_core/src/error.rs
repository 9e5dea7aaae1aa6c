use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("relay rejected the credential")]
    Unauthorized,
    #[error("relay unreachable: {0}")]
    NetworkUnavailable(String),
    #[error("relay connect timed out")]
    Timeout,
    #[error("relay connection is not open")]
    NotConnected,
    #[error("relay connect superseded by disconnect")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("meeting not found")]
    NotFound,
    #[error("meeting has ended")]
    Ended,
    #[error("meeting was cancelled")]
    Cancelled,
    #[error("meeting is full ({max} participants)")]
    Full { max: u32 },
}

/// Terminal reasons surfaced to the UI through `SessionState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("no credential available")]
    MissingCredential,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("meeting lookup timed out")]
    LookupTimeout,
    #[error("meeting lookup failed: {0}")]
    LookupFailed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("relay connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not ready (state: {0})")]
    NotReady(SessionState),
    #[error("message must not be empty")]
    EmptyMessage,
}
