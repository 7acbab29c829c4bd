//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `flock_mode` - gauge of the current mode (0 pending, 1 controller, 2 agent)
//! - `flock_mode_transitions_total` - counter of mode transitions by target mode
//! - `flock_discovery_events_total` - counter of browse events by op
//! - `flock_adoption_attempts_total` - controller-side attempts by outcome
//! - `flock_adoption_requests_total` - node-side inbound claims by outcome
//! - `flock_adoption_duration_seconds` - histogram of controller-side attempt latency
//! - `flock_adopted_nodes` - gauge of nodes adopted by this controller
//! - `flock_heartbeat_failures_total` - counter of failed heartbeats

use flock_core::{DiscoveryOp, FlockMode};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Lifecycle
    describe_gauge!("flock_mode", "Current node mode (0 pending, 1 controller, 2 agent)");
    describe_counter!("flock_mode_transitions_total", "Total number of mode transitions");

    // Discovery
    describe_counter!(
        "flock_discovery_events_total",
        "Total number of discovery events observed while browsing"
    );

    // Adoption
    describe_counter!(
        "flock_adoption_attempts_total",
        "Adoption attempts made by this controller"
    );
    describe_counter!(
        "flock_adoption_requests_total",
        "Adoption requests received by this node"
    );
    describe_histogram!(
        "flock_adoption_duration_seconds",
        "Duration of controller-side adoption attempts in seconds"
    );
    describe_gauge!("flock_adopted_nodes", "Nodes adopted by this controller");
    describe_counter!(
        "flock_heartbeat_failures_total",
        "Heartbeats to adopted nodes that failed"
    );
}

/// Publish the current mode without counting a transition
pub fn set_mode(mode: FlockMode) {
    gauge!("flock_mode").set(mode.as_gauge());
}

/// Record a transition into `mode`
pub fn record_mode(mode: FlockMode) {
    set_mode(mode);
    counter!("flock_mode_transitions_total", "mode" => mode.to_string()).increment(1);
}

pub fn record_discovery_event(op: DiscoveryOp) {
    counter!("flock_discovery_events_total", "op" => op.to_string()).increment(1);
}

/// Record the outcome of an outbound adoption attempt
pub fn record_adoption_attempt(outcome: &str, duration: Duration) {
    counter!("flock_adoption_attempts_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("flock_adoption_duration_seconds").record(duration.as_secs_f64());
}

/// Record the outcome of an inbound adoption request
pub fn record_adoption_request(outcome: &str) {
    counter!("flock_adoption_requests_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn set_adopted_nodes(count: usize) {
    gauge!("flock_adopted_nodes").set(count as f64);
}

pub fn record_heartbeat_failure() {
    counter!("flock_heartbeat_failures_total").increment(1);
}
