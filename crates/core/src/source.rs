// crates/core/src/source.rs
//! Collaborator traits implemented by the transport layer.
//!
//! The tracker only ever sees these traits; how a fetch or cancel travels
//! over the wire (REST, gRPC, an in-process fake) is not its concern.
//! Implementations must be safe for concurrent use by many handles.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::status::{OperationId, OperationKind, OperationStatus};

/// Fetches the latest status of an operation.
#[async_trait]
pub trait StatusSource<S>: Send + Sync {
    /// Returns `SourceError::NotFound` once the server no longer knows `id`.
    async fn fetch(&self, id: &OperationId) -> Result<OperationStatus<S>, SourceError>;
}

/// Requests server-side cancellation of an operation.
#[async_trait]
pub trait Canceler: Send + Sync {
    async fn request_cancel(&self, id: &OperationId) -> Result<(), SourceError>;
}

/// Starts a remote job and reports its initial status.
#[async_trait]
pub trait Submitter<S>: Send + Sync {
    type Request: Send + 'static;

    /// Validation failures surface here and never reach a handle.
    async fn submit(&self, request: Self::Request) -> Result<OperationStatus<S>, SourceError>;
}

/// Management operations over operation records.
#[async_trait]
pub trait OperationAdmin<S>: Send + Sync {
    async fn delete(&self, id: &OperationId) -> Result<(), SourceError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<OperationStatus<S>>, SourceError>;
}

/// Narrows a `list` call. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: Option<OperationKind>,
    /// Server spelling of a state, e.g. `"HYDRATING"`.
    pub state: Option<String>,
    /// Restrict to operations whose id starts with this prefix.
    pub id_prefix: Option<String>,
}

impl ListFilter {
    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    /// Client-side predicate equivalent to the filter, for collaborators that
    /// cannot filter remotely.
    pub fn matches<S: std::fmt::Display>(&self, status: &OperationStatus<S>) -> bool {
        if let Some(kind) = self.kind {
            if status.kind() != kind {
                return false;
            }
        }
        if let Some(ref state) = self.state {
            if !status.state().to_string().eq_ignore_ascii_case(state) {
                return false;
            }
        }
        if let Some(ref prefix) = self.id_prefix {
            if !status.id().as_str().starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}
