//! Metrics collection for `goaltrack`.
//!
//! Counters and gauges go through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs a Prometheus recorder. The recorder has no HTTP
//! listener: the CLI renders it once at the end of a run.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::GoalTrackError;
use crate::state::ParameterState;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Handle used to render the installed recorder.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Host event topics used for label cardinality protection.
const KNOWN_TOPICS: [&str; 10] = crate::host::HostEvent::TOPICS;

/// Sanitizes a bus topic for use as a metrics label.
///
/// Returns the original string when it is a known topic, or `"__unknown__"`
/// otherwise.
#[must_use]
pub fn sanitize_topic_label(topic: &str) -> &str {
    if KNOWN_TOPICS.contains(&topic) {
        topic
    } else {
        "__unknown__"
    }
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns `GoalTrackError::Io` if the recorder cannot be installed.
pub fn init_metrics() -> Result<(), GoalTrackError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GoalTrackError::Io(std::io::Error::other(e.to_string())))?;
    let _ = METRICS_HANDLE.set(handle);

    describe_metrics();
    Ok(())
}

/// Renders the recorder in Prometheus text format, if installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "goaltrack_host_events_total",
        "Host events dispatched, by topic"
    );
    describe_counter!(
        "goaltrack_node_transitions_total",
        "Condition node state transitions, by target state"
    );
    describe_counter!(
        "goaltrack_contracts_finished_total",
        "Contracts that completed or failed"
    );
    describe_gauge!(
        "goaltrack_tracked_units",
        "Groups currently tracking a unit"
    );
}

/// Records a dispatched host event.
pub fn record_host_event(topic: &str) {
    let label = sanitize_topic_label(topic);
    counter!("goaltrack_host_events_total", "topic" => label.to_owned()).increment(1);
}

/// Records a node state transition.
pub fn record_node_transition(to: ParameterState) {
    counter!("goaltrack_node_transitions_total", "to" => to.as_str()).increment(1);
}

/// Records a finished contract.
pub fn record_contract_finished(outcome: &'static str) {
    counter!("goaltrack_contracts_finished_total", "outcome" => outcome).increment(1);
}

/// Sets the number of groups tracking a unit.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_units(count: usize) {
    gauge!("goaltrack_tracked_units").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_topic_label() {
        assert_eq!(sanitize_topic_label("unit.created"), "unit.created");
        assert_eq!(sanitize_topic_label("bogus"), "__unknown__");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_host_event("unit.changed");
        record_node_transition(ParameterState::Complete);
        record_contract_finished("completed");
        set_tracked_units(3);
    }
}
