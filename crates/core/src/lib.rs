//! Client-side tracking of long-running remote operations.
//!
//! A remote service accepts a job (backup, restore, shard replication),
//! returns an id, and expects the caller to poll until the job is terminal.
//! [`OperationHandle`] turns that protocol into a single object with
//! background refresh, wait-with-timeout, cancellation and idempotent
//! disposal. The transport is supplied through the traits in [`source`].

pub mod config;
pub mod error;
pub mod handle;
pub mod management;
pub mod metrics;
mod poll;
pub mod shared;
pub mod source;
pub mod state_machine;
pub mod status;
pub mod tracker;

pub use config::{global_config, reset_global_config, set_global_config, TrackerConfig};
pub use error::{ConfigError, SourceError, TrackerError};
pub use handle::{OperationHandle, Snapshot, StateRegression, StatusEvent};
pub use management::OperationManager;
pub use shared::SharedClient;
pub use source::{Canceler, ListFilter, OperationAdmin, StatusSource, Submitter};
pub use state_machine::{
    classify, BackupStateMachine, Outcome, ReplicationStateMachine, StateMachine,
};
pub use status::{
    BackupState, ErrorEntry, OperationId, OperationKind, OperationStatus, ReplicationState,
    UnknownState,
};
pub use tracker::OperationTracker;

/// Handle tracking a backup or restore job.
pub type BackupHandle = OperationHandle<BackupStateMachine>;

/// Handle tracking a shard replication job.
pub type ReplicationHandle = OperationHandle<ReplicationStateMachine>;
