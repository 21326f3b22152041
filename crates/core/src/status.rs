// crates/core/src/status.rs
//! Immutable snapshots of remote operation state.
//!
//! An [`OperationStatus`] is never mutated after construction: every refresh
//! builds a fresh value which replaces the previous snapshot wholesale.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned by the remote service at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which family of remote job an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup,
    Restore,
    Replication,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Replication => "replication",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single error reported by the remote service for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            at,
        }
    }
}

/// Point-in-time snapshot of a remote operation.
///
/// `observed_at` is the local fetch time. It is informational only: the
/// tracker always lets a newer fetch replace an older snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus<S> {
    id: OperationId,
    kind: OperationKind,
    state: S,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
    observed_at: DateTime<Utc>,
}

impl<S> OperationStatus<S> {
    /// Snapshot observed now with an empty error history.
    pub fn new(id: impl Into<OperationId>, kind: OperationKind, state: S) -> Self {
        Self {
            id: id.into(),
            kind,
            state,
            errors: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<ErrorEntry>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(ErrorEntry::new(message, Utc::now()));
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn last_error(&self) -> Option<&ErrorEntry> {
        self.errors.last()
    }

    pub fn observed(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Error returned when a server state string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} state: {value}")]
pub struct UnknownState {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a backup or restore job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupState {
    Started,
    Success,
    Failed,
    Canceled,
}

impl BackupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            // The server reports the transfer phases separately; they are
            // all still in flight from the client's point of view.
            "STARTED" | "TRANSFERRING" | "TRANSFERRED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" | "CANCELLED" => Ok(Self::Canceled),
            _ => Err(UnknownState {
                kind: "backup",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of a shard replication (copy or move).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationState {
    Registered,
    Hydrating,
    Finalizing,
    Dehydrating,
    Ready,
    Cancelled,
}

impl ReplicationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Hydrating => "HYDRATING",
            Self::Finalizing => "FINALIZING",
            Self::Dehydrating => "DEHYDRATING",
            Self::Ready => "READY",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REGISTERED" => Ok(Self::Registered),
            "HYDRATING" => Ok(Self::Hydrating),
            "FINALIZING" => Ok(Self::Finalizing),
            "DEHYDRATING" => Ok(Self::Dehydrating),
            "READY" => Ok(Self::Ready),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            _ => Err(UnknownState {
                kind: "replication",
                value: s.to_string(),
            }),
        }
    }
}
