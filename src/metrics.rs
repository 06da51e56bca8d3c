//! Metrics helpers for the control plane.
//!
//! No exporter is embedded; the embedding application installs any compatible recorder and
//! these helpers feed it through the `metrics` macros.
//!
//! Provided metrics:
//! * `kusk_fleet_applies_total` (counter, labels: fleet, outcome)
//! * `kusk_connected_nodes` (gauge per fleet and stream kind)
//! * `kusk_fanout_evictions_total` (counter, labels: fleet)
//! * `kusk_snapshots_delivered_total` (counter, labels: fleet)
//! * `kusk_mock_responses_total` (counter, labels: outcome)
//! * `kusk_http_requests_total` / `kusk_http_request_duration_seconds`
use std::{collections::HashMap, sync::Mutex, time::Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const KUSK_FLEET_APPLIES_TOTAL: &str = "kusk_fleet_applies_total";
pub const KUSK_CONNECTED_NODES: &str = "kusk_connected_nodes";
pub const KUSK_FANOUT_EVICTIONS_TOTAL: &str = "kusk_fanout_evictions_total";
pub const KUSK_SNAPSHOTS_DELIVERED_TOTAL: &str = "kusk_snapshots_delivered_total";
pub const KUSK_MOCK_RESPONSES_TOTAL: &str = "kusk_mock_responses_total";
pub const KUSK_HTTP_REQUESTS_TOTAL: &str = "kusk_http_requests_total";
pub const KUSK_HTTP_REQUEST_DURATION_SECONDS: &str = "kusk_http_request_duration_seconds";

/// Last value of every connected-nodes gauge, keyed by `"{kind}/{fleet}"`.
pub static CONNECTED_NODE_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        KUSK_FLEET_APPLIES_TOTAL,
        Unit::Count,
        "Fleet configuration applies by outcome."
    );
    describe_gauge!(
        KUSK_CONNECTED_NODES,
        "Nodes currently streaming snapshots, per fleet."
    );
    describe_counter!(
        KUSK_FANOUT_EVICTIONS_TOTAL,
        Unit::Count,
        "Nodes dropped because they did not accept a snapshot in time."
    );
    describe_counter!(
        KUSK_SNAPSHOTS_DELIVERED_TOTAL,
        Unit::Count,
        "Snapshots handed to node streams."
    );
    describe_counter!(
        KUSK_MOCK_RESPONSES_TOTAL,
        Unit::Count,
        "Mock agent answers by outcome (hit/miss)."
    );
    describe_counter!(
        KUSK_HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "HTTP requests served by the control plane surfaces."
    );
    describe_histogram!(
        KUSK_HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests served by the control plane surfaces."
    );

    Mutex::new(HashMap::new())
});

pub fn increment_fleet_apply(fleet_id: &str, outcome: &'static str) {
    counter!(
        KUSK_FLEET_APPLIES_TOTAL,
        "fleet" => fleet_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Set the connected node gauge of one fleet and stream kind.
pub fn set_connected_nodes(kind: &'static str, fleet_id: &str, count: usize) {
    let value = count as f64;
    if let Ok(mut gauges) = CONNECTED_NODE_GAUGES.lock() {
        gauges.insert(format!("{kind}/{fleet_id}"), value);
    } else {
        tracing::error!("Failed to acquire lock for connected node gauges");
        return;
    }
    gauge!(KUSK_CONNECTED_NODES, "kind" => kind, "fleet" => fleet_id.to_string()).set(value);
}

pub fn increment_fanout_eviction(fleet_id: &str) {
    counter!(KUSK_FANOUT_EVICTIONS_TOTAL, "fleet" => fleet_id.to_string()).increment(1);
}

pub fn increment_snapshot_delivered(fleet_id: &str) {
    counter!(KUSK_SNAPSHOTS_DELIVERED_TOTAL, "fleet" => fleet_id.to_string()).increment(1);
}

pub fn increment_mock_response(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(KUSK_MOCK_RESPONSES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        KUSK_HTTP_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(path: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        KUSK_HTTP_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// RAII helper measuring request duration, recorded on drop.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing control plane metrics");
    Lazy::force(&CONNECTED_NODE_GAUGES);
    Ok(())
}

/// Snapshot of gauge values for ad-hoc exports such as the health endpoint.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    if let Ok(gauges) = CONNECTED_NODE_GAUGES.lock() {
        for (key, value) in gauges.iter() {
            metrics.insert(format!("connected_nodes_{key}"), *value);
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_nodes_gauge() {
        set_connected_nodes("proxy", "metrics-test", 3);
        if let Ok(gauges) = CONNECTED_NODE_GAUGES.lock() {
            assert_eq!(gauges.get("proxy/metrics-test"), Some(&3.0));
        }

        set_connected_nodes("proxy", "metrics-test", 0);
        let metrics = get_current_metrics();
        assert_eq!(metrics.get("connected_nodes_proxy/metrics-test"), Some(&0.0));
    }

    #[test]
    fn test_request_timer() {
        let timer = RequestTimer::new("/healthz", "GET");
        drop(timer);
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
    }
}
