// crates/core/src/state_machine.rs
//! Per-kind classification of remote states.
//!
//! The poll engine never looks at concrete states. It asks an injected
//! [`StateMachine`] three questions (terminal? success? canceled?) and,
//! for anomaly reporting, whether a transition moves backwards.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::status::{BackupState, OperationKind, ReplicationState};

/// Classification table for one family of remote jobs.
///
/// The server is authoritative for transition legality: nothing here may
/// reject a reported state, only classify it.
pub trait StateMachine: Send + Sync + 'static {
    type State: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// Label used in logs and metrics.
    fn kind_label(&self) -> &'static str;

    fn is_terminal(&self, state: &Self::State) -> bool;

    fn is_success(&self, state: &Self::State) -> bool;

    fn is_canceled(&self, state: &Self::State) -> bool;

    /// Whether moving from `from` to `to` goes backwards.
    ///
    /// Leaving a terminal state for a non-terminal one is always a regression.
    fn is_regression(&self, from: &Self::State, to: &Self::State) -> bool {
        self.is_terminal(from) && !self.is_terminal(to)
    }
}

/// Coarse result of classifying a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Fold the three predicates into a single [`Outcome`].
pub fn classify<M: StateMachine + ?Sized>(machine: &M, state: &M::State) -> Outcome {
    if !machine.is_terminal(state) {
        Outcome::Running
    } else if machine.is_success(state) {
        Outcome::Succeeded
    } else if machine.is_canceled(state) {
        Outcome::Canceled
    } else {
        Outcome::Failed
    }
}

/// Backup and restore jobs: `Started` then one of three terminal states.
#[derive(Debug, Clone, Copy)]
pub struct BackupStateMachine {
    kind: OperationKind,
}

impl BackupStateMachine {
    pub fn backup() -> Self {
        Self {
            kind: OperationKind::Backup,
        }
    }

    pub fn restore() -> Self {
        Self {
            kind: OperationKind::Restore,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Default for BackupStateMachine {
    fn default() -> Self {
        Self::backup()
    }
}

impl StateMachine for BackupStateMachine {
    type State = BackupState;

    fn kind_label(&self) -> &'static str {
        self.kind.as_str()
    }

    fn is_terminal(&self, state: &BackupState) -> bool {
        !matches!(state, BackupState::Started)
    }

    fn is_success(&self, state: &BackupState) -> bool {
        matches!(state, BackupState::Success)
    }

    fn is_canceled(&self, state: &BackupState) -> bool {
        matches!(state, BackupState::Canceled)
    }
}

/// Shard replication: `Registered → Hydrating → Finalizing → (Dehydrating) → Ready`,
/// with `Cancelled` reachable from any in-flight phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicationStateMachine;

impl ReplicationStateMachine {
    /// Position on the success path. `Cancelled` has none.
    fn phase_rank(state: &ReplicationState) -> Option<u8> {
        match state {
            ReplicationState::Registered => Some(0),
            ReplicationState::Hydrating => Some(1),
            ReplicationState::Finalizing => Some(2),
            ReplicationState::Dehydrating => Some(3),
            ReplicationState::Ready => Some(4),
            ReplicationState::Cancelled => None,
        }
    }
}

impl StateMachine for ReplicationStateMachine {
    type State = ReplicationState;

    fn kind_label(&self) -> &'static str {
        OperationKind::Replication.as_str()
    }

    fn is_terminal(&self, state: &ReplicationState) -> bool {
        matches!(state, ReplicationState::Ready | ReplicationState::Cancelled)
    }

    fn is_success(&self, state: &ReplicationState) -> bool {
        matches!(state, ReplicationState::Ready)
    }

    fn is_canceled(&self, state: &ReplicationState) -> bool {
        matches!(state, ReplicationState::Cancelled)
    }

    fn is_regression(&self, from: &ReplicationState, to: &ReplicationState) -> bool {
        if self.is_terminal(from) && !self.is_terminal(to) {
            return true;
        }
        match (Self::phase_rank(from), Self::phase_rank(to)) {
            (Some(a), Some(b)) => b < a,
            _ => false,
        }
    }
}
