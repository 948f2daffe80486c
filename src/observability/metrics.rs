//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define reconciler and proxy metrics
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `route_sync_changes_total` (counter): applied records by outcome
//! - `route_sync_decode_failures_total` (counter): records whose payload did not decode
//! - `route_sync_reconnects_total` (counter): change-stream reconnects
//! - `route_sync_probe_failures_total` (counter): failed liveness probes
//! - `route_sync_latest_revision` (gauge): watermark
//! - `route_sync_routes` (gauge): routing table size
//! - `route_sync_watch_delay_seconds` (histogram): commit-to-apply delay
//! - `proxy_requests_total` (counter): proxied requests by method, status
//! - `proxy_request_duration_seconds` (histogram): proxy latency

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_change(outcome: &'static str) {
    metrics::counter!("route_sync_changes_total", "outcome" => outcome).increment(1);
}

pub fn record_decode_failure() {
    metrics::counter!("route_sync_decode_failures_total").increment(1);
}

pub fn record_reconnect() {
    metrics::counter!("route_sync_reconnects_total").increment(1);
}

pub fn record_probe_failure() {
    metrics::counter!("route_sync_probe_failures_total").increment(1);
}

pub fn record_watch_delay(delay: Duration) {
    metrics::histogram!("route_sync_watch_delay_seconds").record(delay.as_secs_f64());
}

pub fn set_latest_revision(revision: i64) {
    metrics::gauge!("route_sync_latest_revision").set(revision as f64);
}

pub fn set_route_count(routes: usize) {
    metrics::gauge!("route_sync_routes").set(routes as f64);
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}
