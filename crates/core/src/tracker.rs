// crates/core/src/tracker.rs
//! Registry of live handles for one job kind.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::config::{global_config, TrackerConfig};
use crate::error::{ConfigError, TrackerError};
use crate::handle::{OperationHandle, Snapshot, StatusEvent};
use crate::source::{Canceler, StatusSource, Submitter};
use crate::state_machine::{Outcome, StateMachine};
use crate::status::{OperationId, OperationStatus};

/// Capacity of the tracker-wide event channel.
const GLOBAL_EVENT_CAPACITY: usize = 256;

type HandleMap<M> = HashMap<OperationId, Arc<OperationHandle<M>>>;

/// Owns the handles for every operation of one kind submitted through it.
///
/// Thread-safe; share it via `Arc`. Tracking the same id twice returns the
/// existing handle, so an operation never gets two pollers.
pub struct OperationTracker<M: StateMachine + Clone> {
    source: Arc<dyn StatusSource<M::State>>,
    canceler: Arc<dyn Canceler>,
    machine: M,
    config: Arc<TrackerConfig>,
    handles: RwLock<HandleMap<M>>,
    global_tx: broadcast::Sender<StatusEvent<M::State>>,
}

impl<M: StateMachine + Clone> OperationTracker<M> {
    /// Create a tracker using the process-wide default config.
    pub fn new(
        source: Arc<dyn StatusSource<M::State>>,
        canceler: Arc<dyn Canceler>,
        machine: M,
    ) -> Self {
        let (global_tx, _) = broadcast::channel(GLOBAL_EVENT_CAPACITY);
        Self {
            source,
            canceler,
            machine,
            config: global_config(),
            handles: RwLock::new(HashMap::new()),
            global_tx,
        }
    }

    /// Use `config` for handles created from now on.
    pub fn with_config(mut self, config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(self)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Submit a new job and start tracking it.
    ///
    /// Submission failures (including validation) are returned before any
    /// handle exists.
    pub async fn submit<T>(
        &self,
        submitter: &T,
        request: T::Request,
    ) -> Result<Arc<OperationHandle<M>>, TrackerError>
    where
        T: Submitter<M::State> + ?Sized,
    {
        let initial = submitter.submit(request).await?;
        tracing::info!(
            operation_id = %initial.id(),
            kind = self.machine.kind_label(),
            state = %initial.state(),
            "operation submitted"
        );
        Ok(self.track(initial))
    }

    /// Start tracking an operation whose initial status is already known.
    pub fn track(&self, initial: OperationStatus<M::State>) -> Arc<OperationHandle<M>> {
        let mut handles = self.write_handles();

        if let Some(existing) = handles.get(initial.id()) {
            if !existing.is_disposed() {
                return Arc::clone(existing);
            }
        }

        let id = initial.id().clone();
        let handle = Arc::new(OperationHandle::spawn_with_config(
            initial,
            Arc::clone(&self.source),
            Arc::clone(&self.canceler),
            self.machine.clone(),
            Arc::clone(&self.config),
        ));

        // Forward handle events to the tracker-wide channel.
        let global_tx = self.global_tx.clone();
        let mut rx = handle.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = global_tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "status event forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        handles.insert(id, Arc::clone(&handle));
        handle
    }

    /// Subscribe to status events from every tracked operation.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent<M::State>> {
        self.global_tx.subscribe()
    }

    pub fn get(&self, id: &OperationId) -> Option<Arc<OperationHandle<M>>> {
        self.read_handles().get(id).cloned()
    }

    /// Snapshots of operations that are neither terminal nor disposed.
    pub fn active(&self) -> Vec<Snapshot<M::State>> {
        self.read_handles()
            .values()
            .filter(|h| !h.is_disposed() && h.outcome() == Outcome::Running)
            .map(|h| h.current())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose and drop the handle for `id`. Returns whether it was tracked.
    pub fn forget(&self, id: &OperationId) -> bool {
        let removed = self.write_handles().remove(id);
        match removed {
            Some(handle) => {
                handle.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every handle and clear the registry.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.write_handles().drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            handle.dispose();
        }
        tracing::info!(kind = self.machine.kind_label(), count, "operation tracker shut down");
    }

    fn read_handles(&self) -> RwLockReadGuard<'_, HandleMap<M>> {
        match self.handles.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned reading handles map: {e}");
                e.into_inner()
            }
        }
    }

    fn write_handles(&self) -> RwLockWriteGuard<'_, HandleMap<M>> {
        match self.handles.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing handles map: {e}");
                e.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::state_machine::BackupStateMachine;
    use crate::status::{BackupState, OperationKind};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Reports every operation as finished.
    struct AlwaysSuccess;

    #[async_trait]
    impl StatusSource<BackupState> for AlwaysSuccess {
        async fn fetch(&self, id: &OperationId) -> Result<OperationStatus<BackupState>, SourceError> {
            Ok(OperationStatus::new(id.clone(), OperationKind::Backup, BackupState::Success))
        }
    }

    #[async_trait]
    impl Canceler for AlwaysSuccess {
        async fn request_cancel(&self, _id: &OperationId) -> Result<(), SourceError> {
            Ok(())
        }
    }

    struct EchoSubmitter;

    #[async_trait]
    impl Submitter<BackupState> for EchoSubmitter {
        type Request = String;

        async fn submit(&self, request: String) -> Result<OperationStatus<BackupState>, SourceError> {
            if request.is_empty() {
                return Err(SourceError::Validation("backup id must not be empty".into()));
            }
            Ok(OperationStatus::new(request, OperationKind::Backup, BackupState::Started))
        }
    }

    fn tracker() -> OperationTracker<BackupStateMachine> {
        let fake = Arc::new(AlwaysSuccess);
        OperationTracker::new(fake.clone(), fake, BackupStateMachine::backup())
            .with_config(TrackerConfig::default().with_poll_interval(Duration::from_millis(10)))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_submit_and_complete() {
        let tracker = tracker();
        let handle = tracker.submit(&EchoSubmitter, "b1".to_string()).await.unwrap();
        assert_eq!(tracker.active().len(), 1);

        let done = handle.wait_for_completion(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(*done.state(), BackupState::Success);
        assert!(tracker.active().is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_tracker_submit_validation_error() {
        let tracker = tracker();
        let err = tracker.submit(&EchoSubmitter, String::new()).await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_tracker_track_is_deduplicated() {
        let tracker = tracker();
        let initial = || OperationStatus::new("b2", OperationKind::Backup, BackupState::Started);
        let a = tracker.track(initial());
        let b = tracker.track(initial());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_subscribe_forwards_events() {
        let tracker = tracker();
        let mut rx = tracker.subscribe();
        let _handle = tracker.track(OperationStatus::new("b3", OperationKind::Backup, BackupState::Started));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for event")
            .expect("channel error");
        assert_eq!(event.status.id().as_str(), "b3");
        assert_eq!(event.outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_tracker_forget_and_shutdown() {
        let tracker = tracker();
        let a = tracker.track(OperationStatus::new("b4", OperationKind::Backup, BackupState::Started));
        let b = tracker.track(OperationStatus::new("b5", OperationKind::Backup, BackupState::Started));

        assert!(tracker.forget(a.id()));
        assert!(a.is_disposed());
        assert!(!tracker.forget(a.id()));

        tracker.shutdown();
        assert!(b.is_disposed());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_tracker_retracks_after_dispose() {
        let tracker = tracker();
        let first = tracker.track(OperationStatus::new("b6", OperationKind::Backup, BackupState::Started));
        first.dispose();
        let second = tracker.track(OperationStatus::new("b6", OperationKind::Backup, BackupState::Started));
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_survives_poisoned_registry() {
        let tracker = Arc::new(tracker());
        let kept = tracker.track(OperationStatus::new("b7", OperationKind::Backup, BackupState::Started));

        let poisoner = Arc::clone(&tracker);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.handles.write().unwrap();
            panic!("poison the handles map");
        })
        .join();
        assert!(tracker.handles.is_poisoned());

        assert_eq!(tracker.len(), 1);
        assert!(!tracker.is_empty());
        assert!(Arc::ptr_eq(&tracker.get(kept.id()).unwrap(), &kept));
        assert_eq!(tracker.active().len(), 1);

        tracker.shutdown();
        assert!(kept.is_disposed());
        assert_eq!(tracker.len(), 0);
    }
}
