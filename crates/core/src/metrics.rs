// crates/core/src/metrics.rs
//! Tracker metrics, recorded through the `metrics` facade.
//!
//! The library never installs a recorder; the embedding binary decides
//! where these go. Without a recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::state_machine::Outcome;

/// Describe all tracker metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!("optrack_polls_total", "Status fetches issued, by kind and outcome");
    describe_counter!(
        "optrack_poll_failures_total",
        "Failed status fetches, by kind and failure class"
    );
    describe_counter!(
        "optrack_state_regressions_total",
        "Status updates that moved an operation backwards"
    );
    describe_counter!(
        "optrack_operations_completed_total",
        "Operations observed reaching a terminal state"
    );
    describe_histogram!(
        "optrack_fetch_duration_seconds",
        "Latency of status fetches in seconds"
    );
}

/// Record one status fetch.
///
/// # Arguments
/// * `kind` - Job kind label (e.g. "backup", "replication")
/// * `ok` - Whether the fetch returned a status
/// * `duration` - Fetch latency
pub fn record_poll(kind: &'static str, ok: bool, duration: Duration) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("optrack_polls_total", "kind" => kind, "outcome" => outcome).increment(1);
    histogram!("optrack_fetch_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Record a failed fetch, split by whether tracking survives it.
pub fn record_poll_failure(kind: &'static str, permanent: bool) {
    let class = if permanent { "permanent" } else { "transient" };
    counter!("optrack_poll_failures_total", "kind" => kind, "class" => class).increment(1);
}

pub fn record_regression(kind: &'static str) {
    counter!("optrack_state_regressions_total", "kind" => kind).increment(1);
}

pub fn record_completion(kind: &'static str, outcome: Outcome) {
    counter!("optrack_operations_completed_total", "kind" => kind, "outcome" => outcome.as_str())
        .increment(1);
}
