//! Prometheus Metrics
//!
//! Defines and initializes all Prometheus metrics for peerwatch.
//!
//! Metrics tracked:
//! - `peerwatch_peers` - gauge of tracked peers by state
//! - `peerwatch_directory_refresh_total` - counter of directory refreshes by outcome
//! - `peerwatch_probes_sent_total` - counter of probe sends by result
//! - `peerwatch_probe_rtt_seconds` - histogram of probe round-trip times
//! - `peerwatch_evictions_total` - counter of evicted peers by reason
//! - `peerwatch_discovery_rounds_total` - counter of framework discovery rounds

use crate::network::types::{PeerCounts, PeerState};
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
    describe_gauge!("peerwatch_peers", "Number of tracked peers by liveness state");
    describe_counter!(
        "peerwatch_directory_refresh_total",
        "Total number of directory refreshes by outcome"
    );
    describe_counter!(
        "peerwatch_probes_sent_total",
        "Total number of probe sends by result"
    );
    describe_histogram!(
        "peerwatch_probe_rtt_seconds",
        "Round-trip time of acknowledged probes in seconds"
    );
    describe_counter!("peerwatch_evictions_total", "Total number of evicted peers");
    describe_counter!(
        "peerwatch_discovery_rounds_total",
        "Total number of discovery rounds answered for the framework"
    );
}

/// Update the per-state peer gauges
pub fn set_peer_counts(counts: PeerCounts) {
    for state in PeerState::ALL {
        gauge!("peerwatch_peers", "state" => state.to_string()).set(counts.get(state) as f64);
    }
}

/// Record a directory refresh outcome ("applied", "failed", "skipped")
pub fn record_directory_refresh(outcome: &'static str) {
    counter!("peerwatch_directory_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a probe send result ("sent", "failed")
pub fn record_probe_sent(result: &'static str) {
    counter!("peerwatch_probes_sent_total", "result" => result).increment(1);
}

/// Record a probe round-trip time
pub fn record_probe_rtt(rtt: Duration) {
    histogram!("peerwatch_probe_rtt_seconds").record(rtt.as_secs_f64());
}

/// Record evicted peers
pub fn record_evictions(reason: &'static str, count: usize) {
    counter!("peerwatch_evictions_total", "reason" => reason).increment(count as u64);
}

/// Record a discovery round
pub fn record_discovery_round() {
    counter!("peerwatch_discovery_rounds_total").increment(1);
}
