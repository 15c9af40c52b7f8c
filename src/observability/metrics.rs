//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, admission, cache, sanitization, generation)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `burrow_requests_total` (counter): requests by protocol, outcome
//! - `burrow_request_duration_seconds` (histogram): session latency by protocol
//! - `burrow_admission_rejected_total` (counter): rejections by reason
//! - `burrow_active_connections` (gauge): current connection count
//! - `burrow_cache_lookups_total` (counter): hit / miss / expired
//! - `burrow_generations_total` (counter), `burrow_generation_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(protocol: &'static str, outcome: &'static str, start: Instant) {
    counter!("burrow_requests_total", "protocol" => protocol, "outcome" => outcome).increment(1);
    histogram!("burrow_request_duration_seconds", "protocol" => protocol)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_admission_rejected(reason: &'static str) {
    counter!("burrow_admission_rejected_total", "reason" => reason).increment(1);
}

pub fn record_active_connections(count: u64) {
    gauge!("burrow_active_connections").set(count as f64);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("burrow_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("burrow_cache_entries").set(size as f64);
}

pub fn record_redaction(kind: &'static str) {
    counter!("burrow_redactions_total", "kind" => kind).increment(1);
}

pub fn record_input_blocked(reason: &'static str) {
    counter!("burrow_input_blocked_total", "reason" => reason).increment(1);
}

pub fn record_generation(outcome: &'static str, start: Instant) {
    counter!("burrow_generations_total", "outcome" => outcome).increment(1);
    histogram!("burrow_generation_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_blocklist_refresh(source: &str, result: &'static str) {
    counter!(
        "burrow_blocklist_refresh_total",
        "source" => source.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_blocklist_entries(exact: usize, cidr: usize) {
    gauge!("burrow_blocklist_entries", "kind" => "exact").set(exact as f64);
    gauge!("burrow_blocklist_entries", "kind" => "cidr").set(cidr as f64);
}

pub fn record_rate_limiter_tracked(count: usize) {
    gauge!("burrow_rate_limiter_tracked").set(count as f64);
}
