// crates/core/src/error.rs
use std::time::Duration;

use thiserror::Error;

use crate::status::OperationId;

/// Errors reported by the transport collaborators (`StatusSource`,
/// `Canceler`, `Submitter`, `OperationAdmin`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("operation not found: {id}")]
    NotFound { id: OperationId },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("operation {id} already reached a terminal state")]
    AlreadyTerminal { id: OperationId },

    #[error("invalid request: {0}")]
    Validation(String),
}

impl SourceError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_found(id: impl Into<OperationId>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Errors surfaced by an `OperationHandle` and the types built on it.
///
/// `Clone` so a permanent failure observed by the poll loop can be handed to
/// every pending waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("operation not found: {id}")]
    NotFound { id: OperationId },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out after {waited:?} waiting for operation {id}")]
    Timeout { id: OperationId, waited: Duration },

    #[error("handle for operation {id} has been disposed")]
    Disposed { id: OperationId },

    #[error("operation {id} is already in terminal state {state}")]
    InvalidState { id: OperationId, state: String },

    #[error("invalid request: {0}")]
    Validation(String),
}

impl TrackerError {
    /// Failures after which the remote operation can no longer be tracked.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Unauthorized(_))
    }

    /// Failures a caller can reasonably retry (re-poll or re-wait).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<SourceError> for TrackerError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Transport(msg) => Self::Transport(msg),
            SourceError::NotFound { id } => Self::NotFound { id },
            SourceError::Unauthorized(msg) => Self::Unauthorized(msg),
            SourceError::AlreadyTerminal { id } => Self::InvalidState {
                id,
                state: "terminal".into(),
            },
            SourceError::Validation(msg) => Self::Validation(msg),
        }
    }
}

/// Errors produced while loading or validating a `TrackerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("default timeout must be greater than zero")]
    ZeroTimeout,

    #[error("event capacity must be greater than zero")]
    ZeroEventCapacity,

    #[error("malformed tracker config: {0}")]
    Parse(#[from] toml::de::Error),
}
