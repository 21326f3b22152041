// crates/core/src/poll.rs
//! Background refresh loop, one per handle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::handle::Shared;
use crate::state_machine::StateMachine;

/// Poll until the operation is terminal, tracking fails permanently, or the
/// handle is disposed. Transient failures are absorbed and retried.
pub(crate) async fn run<M: StateMachine>(shared: Arc<Shared<M>>) {
    let config = Arc::clone(&shared.config);
    let mut delay = config.poll_interval;

    loop {
        tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            // A successful explicit refresh: drop any backoff and start a
            // fresh interval.
            _ = shared.rescheduled.notified() => {
                delay = config.poll_interval;
                continue;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            result = shared.fetch_and_apply() => result,
        };

        match result {
            Ok(status) => {
                if shared.machine.is_terminal(status.state()) {
                    break;
                }
                delay = config.poll_interval;
            }
            Err(TrackerError::Disposed { .. }) => break,
            Err(err) if err.is_permanent() => break,
            Err(err) => {
                delay = next_delay(delay, &config);
                tracing::warn!(
                    operation_id = %shared.id,
                    error = %err,
                    backoff_ms = delay.as_millis() as u64,
                    "status fetch failed, will retry"
                );
            }
        }
    }

    shared.polling.store(false, Ordering::Release);
    tracing::debug!(operation_id = %shared.id, "poll loop stopped");
}

/// Delay before the next attempt after a transient failure.
///
/// Fixed at `poll_interval` unless `max_poll_backoff` is set, in which case
/// it doubles per consecutive failure up to that cap.
pub(crate) fn next_delay(current: Duration, config: &TrackerConfig) -> Duration {
    match config.max_poll_backoff {
        Some(cap) => current
            .saturating_mul(2)
            .min(cap.max(config.poll_interval)),
        None => config.poll_interval,
    }
}
