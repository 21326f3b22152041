// Shared fakes for the integration tests.
//
// `ScriptedSource` plays back a fixed sequence of fetch results (repeating
// the last one when exhausted) and records how many fetches ran and how many
// ran at once. `ScriptedCanceler` records cancel requests and can rewrite the
// source's script to simulate the server honouring them. It is not generic
// over the state type, so `noop()` needs no annotations.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use optrack_core::{
    Canceler, OperationId, OperationKind, OperationStatus, SourceError, StatusSource,
};

/// Poll interval used throughout the integration tests.
pub const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub enum Step<S> {
    State(S),
    Transport,
    NotFound,
    Unauthorized,
}

pub struct ScriptedSource<S> {
    kind: OperationKind,
    script: Mutex<VecDeque<Step<S>>>,
    last: Mutex<Option<Step<S>>>,
    latency: Duration,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even if the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: Clone> ScriptedSource<S> {
    pub fn new(kind: OperationKind, steps: Vec<Step<S>>) -> Arc<Self> {
        Self::with_latency(kind, steps, Duration::ZERO)
    }

    pub fn with_latency(kind: OperationKind, steps: Vec<Step<S>>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(steps.into()),
            last: Mutex::new(None),
            latency,
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Replace whatever is left of the script.
    pub fn set_script(&self, steps: Vec<Step<S>>) {
        *self.script.lock().unwrap() = steps.into();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step<S> {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match script.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("script must not be empty"),
        }
    }
}

#[async_trait]
impl<S: Clone + Send + Sync + 'static> StatusSource<S> for ScriptedSource<S> {
    async fn fetch(&self, id: &OperationId) -> Result<OperationStatus<S>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_step() {
            Step::State(state) => Ok(OperationStatus::new(id.clone(), self.kind, state)),
            Step::Transport => Err(SourceError::transport("connection reset by peer")),
            Step::NotFound => Err(SourceError::not_found(id.clone())),
            Step::Unauthorized => Err(SourceError::Unauthorized("token expired".into())),
        }
    }
}

/// Records cancel requests. A rewriting canceler replaces the source's
/// script so later fetches observe the cancellation.
pub struct ScriptedCanceler {
    on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
    fail_with: Option<SourceError>,
    calls: AtomicUsize,
}

impl ScriptedCanceler {
    pub fn noop() -> Arc<Self> {
        Arc::new(Self {
            on_cancel: None,
            fail_with: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn rewriting<S>(source: Arc<ScriptedSource<S>>, on_cancel: Vec<Step<S>>) -> Arc<Self>
    where
        S: Clone + Send + Sync + 'static,
    {
        Arc::new(Self {
            on_cancel: Some(Box::new(move || source.set_script(on_cancel.clone()))),
            fail_with: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: SourceError) -> Arc<Self> {
        Arc::new(Self {
            on_cancel: None,
            fail_with: Some(err),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Canceler for ScriptedCanceler {
    async fn request_cancel(&self, _id: &OperationId) -> Result<(), SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref err) = self.fail_with {
            return Err(err.clone());
        }
        if let Some(ref rewrite) = self.on_cancel {
            rewrite();
        }
        Ok(())
    }
}
