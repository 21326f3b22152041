// crates/core/src/handle.rs
//! Client-side handle owning the lifecycle of one remote operation.
//!
//! Provides:
//! - `OperationHandle`: latest snapshot, background refresh, wait, cancel, dispose
//! - `StatusEvent`: broadcast on every applied status
//! - `StateRegression`: record of a status update that moved backwards

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{global_config, TrackerConfig};
use crate::error::TrackerError;
use crate::metrics;
use crate::poll;
use crate::source::{Canceler, StatusSource};
use crate::state_machine::{classify, Outcome, StateMachine};
use crate::status::{OperationId, OperationStatus};

/// Shared, immutable snapshot of an operation.
pub type Snapshot<S> = Arc<OperationStatus<S>>;

/// Emitted every time a fetched status replaces the current snapshot.
#[derive(Debug, Clone)]
pub struct StatusEvent<S> {
    pub status: Snapshot<S>,
    pub outcome: Outcome,
}

/// A status update that moved an operation backwards.
///
/// The update is still applied; the server is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRegression<S> {
    pub from: S,
    pub to: S,
    pub at: DateTime<Utc>,
}

/// Terminal notification. Leaves `Pending` at most once and never changes
/// afterwards, so every waiter observes the same resolution.
#[derive(Debug, Clone)]
pub(crate) enum Completion<S> {
    Pending,
    Terminal(Snapshot<S>),
    Failed(TrackerError),
    Disposed,
}

impl<S> Completion<S> {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// State shared between a handle and its poll loop.
pub(crate) struct Shared<M: StateMachine> {
    pub(crate) id: OperationId,
    pub(crate) machine: M,
    pub(crate) config: Arc<TrackerConfig>,
    source: Arc<dyn StatusSource<M::State>>,
    canceler: Arc<dyn Canceler>,
    current: RwLock<Snapshot<M::State>>,
    /// Serialises fetch-and-replace so at most one fetch is in flight.
    fetch_lock: tokio::sync::Mutex<()>,
    completion: watch::Sender<Completion<M::State>>,
    /// Stops the poll loop: terminal state, permanent failure or disposal.
    pub(crate) stop: CancellationToken,
    /// Signalled by explicit refreshes so the loop restarts its interval.
    pub(crate) rescheduled: Notify,
    disposed: AtomicBool,
    pub(crate) polling: AtomicBool,
    unrecoverable: OnceLock<TrackerError>,
    transient_failures: AtomicU64,
    anomalies: Mutex<Vec<StateRegression<M::State>>>,
    events: broadcast::Sender<StatusEvent<M::State>>,
}

impl<M: StateMachine> Shared<M> {
    fn snapshot(&self) -> Snapshot<M::State> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(e) => {
                tracing::error!(operation_id = %self.id, "RwLock poisoned reading snapshot: {e}");
                Arc::clone(&e.into_inner())
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> Result<(), TrackerError> {
        if self.is_disposed() {
            return Err(TrackerError::Disposed {
                id: self.id.clone(),
            });
        }
        if let Some(err) = self.unrecoverable.get() {
            return Err(err.clone());
        }
        Ok(())
    }

    /// Fetch the latest status and, unless the handle was disposed in the
    /// meantime, make it the current snapshot.
    pub(crate) async fn fetch_and_apply(&self) -> Result<Snapshot<M::State>, TrackerError> {
        let _guard = self.fetch_lock.lock().await;
        // A fetch queued behind one that failed permanently must not run.
        self.ensure_usable()?;

        let kind = self.machine.kind_label();
        let started = Instant::now();
        let result = self.source.fetch(&self.id).await;
        metrics::record_poll(kind, result.is_ok(), started.elapsed());

        match result {
            Ok(status) => self.apply(status),
            Err(err) => {
                let err = TrackerError::from(err);
                if err.is_permanent() {
                    self.fail_permanently(err.clone());
                } else {
                    self.transient_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_poll_failure(kind, false);
                }
                Err(err)
            }
        }
    }

    /// Replace the current snapshot unless the handle has been disposed.
    ///
    /// `dispose` flips its flag under the same write lock, so a status is
    /// either applied before disposal or not at all.
    fn apply(
        &self,
        status: OperationStatus<M::State>,
    ) -> Result<Snapshot<M::State>, TrackerError> {
        let next = Arc::new(status);
        let previous = {
            let mut guard = self.write_current();
            if self.is_disposed() {
                tracing::debug!(operation_id = %self.id, "discarding status fetched after dispose");
                return Err(TrackerError::Disposed {
                    id: self.id.clone(),
                });
            }
            std::mem::replace(&mut *guard, Arc::clone(&next))
        };

        let (from, to) = (*previous.state(), *next.state());
        if self.machine.is_regression(&from, &to) {
            tracing::warn!(
                operation_id = %self.id,
                kind = self.machine.kind_label(),
                from = %from,
                to = %to,
                "operation state moved backwards"
            );
            metrics::record_regression(self.machine.kind_label());
            let regression = StateRegression {
                from,
                to,
                at: Utc::now(),
            };
            match self.anomalies.lock() {
                Ok(mut list) => list.push(regression),
                Err(e) => tracing::error!("Mutex poisoned recording regression: {e}"),
            }
        } else if from != to {
            tracing::debug!(operation_id = %self.id, from = %from, to = %to, "operation state changed");
        }

        let outcome = classify(&self.machine, &to);
        // No subscribers is fine.
        let _ = self.events.send(StatusEvent {
            status: Arc::clone(&next),
            outcome,
        });

        if outcome.is_terminal() {
            self.signal_terminal(&next, outcome);
        }
        Ok(next)
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot<M::State>> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(operation_id = %self.id, "RwLock poisoned writing snapshot: {e}");
                e.into_inner()
            }
        }
    }

    fn signal_terminal(&self, status: &Snapshot<M::State>, outcome: Outcome) {
        let first = self.completion.send_if_modified(|c| {
            if c.is_pending() {
                *c = Completion::Terminal(Arc::clone(status));
                true
            } else {
                false
            }
        });
        self.stop.cancel();
        if !first {
            return;
        }

        tracing::info!(
            operation_id = %self.id,
            kind = self.machine.kind_label(),
            state = %status.state(),
            outcome = outcome.as_str(),
            "operation reached terminal state"
        );
        metrics::record_completion(self.machine.kind_label(), outcome);

        if self.config.auto_dispose_on_terminal {
            self.dispose();
        }
    }

    fn fail_permanently(&self, err: TrackerError) {
        if self.unrecoverable.set(err.clone()).is_err() {
            return;
        }
        tracing::error!(operation_id = %self.id, error = %err, "operation can no longer be tracked");
        metrics::record_poll_failure(self.machine.kind_label(), true);
        self.completion.send_if_modified(|c| {
            if c.is_pending() {
                *c = Completion::Failed(err);
                true
            } else {
                false
            }
        });
        self.stop.cancel();
    }

    /// Returns `true` for the one call that performed the teardown.
    pub(crate) fn dispose(&self) -> bool {
        let first = {
            let _current = self.write_current();
            !self.disposed.swap(true, Ordering::AcqRel)
        };
        if !first {
            return false;
        }
        self.stop.cancel();
        self.polling.store(false, Ordering::Release);
        self.completion.send_if_modified(|c| {
            if c.is_pending() {
                *c = Completion::Disposed;
                true
            } else {
                false
            }
        });
        tracing::info!(operation_id = %self.id, "operation handle disposed");
        true
    }
}

/// Tracks one remote operation from submission to a terminal state.
///
/// A background task refreshes the status every `poll_interval` until the
/// operation is terminal, tracking fails permanently, or the handle is
/// disposed. Dropping the handle disposes it.
pub struct OperationHandle<M: StateMachine> {
    shared: Arc<Shared<M>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<M: StateMachine> OperationHandle<M> {
    /// Start tracking with the process-wide default config.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        initial: OperationStatus<M::State>,
        source: Arc<dyn StatusSource<M::State>>,
        canceler: Arc<dyn Canceler>,
        machine: M,
    ) -> Self {
        Self::spawn_with_config(initial, source, canceler, machine, global_config())
    }

    /// Start tracking with an explicit config snapshot.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_with_config(
        initial: OperationStatus<M::State>,
        source: Arc<dyn StatusSource<M::State>>,
        canceler: Arc<dyn Canceler>,
        machine: M,
        config: Arc<TrackerConfig>,
    ) -> Self {
        let id = initial.id().clone();
        let initial = Arc::new(initial);
        let outcome = classify(&machine, initial.state());
        let (completion, _) = watch::channel(Completion::Pending);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            id: id.clone(),
            machine,
            config,
            source,
            canceler,
            current: RwLock::new(Arc::clone(&initial)),
            fetch_lock: tokio::sync::Mutex::new(()),
            completion,
            stop: CancellationToken::new(),
            rescheduled: Notify::new(),
            disposed: AtomicBool::new(false),
            polling: AtomicBool::new(false),
            unrecoverable: OnceLock::new(),
            transient_failures: AtomicU64::new(0),
            anomalies: Mutex::new(Vec::new()),
            events,
        });

        if outcome.is_terminal() {
            // Already finished at submission; nothing to poll.
            shared.signal_terminal(&initial, outcome);
            return Self {
                shared,
                task: Mutex::new(None),
            };
        }

        shared.polling.store(true, Ordering::Release);
        let span = tracing::info_span!(
            "operation_poll",
            operation_id = %id,
            kind = shared.machine.kind_label()
        );
        let task = tokio::spawn(poll::run(Arc::clone(&shared)).instrument(span));
        tracing::debug!(operation_id = %id, "operation tracking started");

        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.shared.id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Latest locally cached snapshot. Never blocks on I/O.
    pub fn current(&self) -> Snapshot<M::State> {
        self.shared.snapshot()
    }

    pub fn outcome(&self) -> Outcome {
        classify(&self.shared.machine, self.current().state())
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Whether the background loop is still scheduling fetches.
    pub fn is_polling(&self) -> bool {
        self.shared.polling.load(Ordering::Acquire)
    }

    /// The permanent failure that ended tracking, if any.
    pub fn unrecoverable_error(&self) -> Option<TrackerError> {
        self.shared.unrecoverable.get().cloned()
    }

    /// Number of transient fetch failures absorbed so far.
    pub fn transient_failures(&self) -> u64 {
        self.shared.transient_failures.load(Ordering::Relaxed)
    }

    /// Backwards transitions observed so far, oldest first.
    pub fn anomalies(&self) -> Vec<StateRegression<M::State>> {
        match self.shared.anomalies.lock() {
            Ok(list) => list.clone(),
            Err(e) => {
                tracing::error!("Mutex poisoned reading anomalies: {e}");
                Vec::new()
            }
        }
    }

    /// Subscribe to every status applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent<M::State>> {
        self.shared.events.subscribe()
    }

    /// Fetch the latest status now and make it current.
    ///
    /// On failure the current snapshot is left untouched. `NotFound` and
    /// `Unauthorized` end tracking for good. After a successful refresh the
    /// background loop drops any backoff and schedules its next tick a full
    /// `poll_interval` later.
    pub async fn refresh(&self) -> Result<Snapshot<M::State>, TrackerError> {
        self.shared.ensure_usable()?;
        let status = self.shared.fetch_and_apply().await?;
        self.shared.rescheduled.notify_one();
        Ok(status)
    }

    /// Wait until the operation is terminal, the handle is disposed, tracking
    /// fails permanently, or `timeout` (default: `config.default_timeout`)
    /// elapses.
    ///
    /// A job that ends `Failed` or `Canceled` is returned as `Ok`: only the
    /// tracker's own failures are errors. Timing out leaves the background
    /// loop running.
    pub async fn wait_for_completion(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Snapshot<M::State>, TrackerError> {
        if self.shared.is_disposed() {
            return Err(TrackerError::Disposed {
                id: self.shared.id.clone(),
            });
        }
        let budget = timeout.unwrap_or(self.shared.config.default_timeout);
        let mut rx = self.shared.completion.subscribe();

        let resolved = match tokio::time::timeout(budget, rx.wait_for(|c| !c.is_pending())).await {
            Ok(Ok(completion)) => completion.clone(),
            // The sender lives as long as `self`.
            Ok(Err(_)) => Completion::Disposed,
            Err(_) => {
                tracing::debug!(operation_id = %self.shared.id, ?budget, "wait for completion timed out");
                return Err(TrackerError::Timeout {
                    id: self.shared.id.clone(),
                    waited: budget,
                });
            }
        };

        match resolved {
            Completion::Terminal(status) => Ok(status),
            Completion::Failed(err) => Err(err),
            Completion::Pending | Completion::Disposed => Err(TrackerError::Disposed {
                id: self.shared.id.clone(),
            }),
        }
    }

    /// Ask the server to cancel the operation.
    ///
    /// Does not touch the current snapshot: the cancellation becomes visible
    /// once a refresh observes it. Fails with `InvalidState`, without any
    /// network call, if the operation is already terminal.
    pub async fn cancel(&self) -> Result<(), TrackerError> {
        self.shared.ensure_usable()?;
        let current = self.current();
        if self.shared.machine.is_terminal(current.state()) {
            return Err(TrackerError::InvalidState {
                id: self.shared.id.clone(),
                state: current.state().to_string(),
            });
        }
        self.shared.canceler.request_cancel(&self.shared.id).await?;
        tracing::info!(operation_id = %self.shared.id, state = %current.state(), "cancellation requested");
        Ok(())
    }

    /// Stop background work and make the handle inert. Idempotent and safe
    /// to call concurrently. `current()` keeps returning the last snapshot.
    pub fn dispose(&self) {
        if !self.shared.dispose() {
            return;
        }
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!("Mutex poisoned taking poll task: {e}");
                e.into_inner().take()
            }
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl<M: StateMachine> Drop for OperationHandle<M> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<M: StateMachine> std::fmt::Debug for OperationHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.machine.kind_label())
            .field("state", self.current().state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
