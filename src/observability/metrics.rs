//! Metrics collection and exposition.
//!
//! # Metrics
//! - `connector_rpc_requests_total` (counter): node RPC calls by method, outcome
//! - `connector_rpc_duration_seconds` (histogram): node RPC latency by method
//! - `connector_cache_lookups_total` (counter): cache lookups by cache, result
//! - `connector_blocks_delivered_total` (counter): blocks handed to the host per stream
//! - `connector_checkpoint_level` (gauge): last checkpointed level per stream
//! - `connector_transactions_total` (counter): submissions by outcome
//! - `connector_reorgs_total` (counter): reorganizations detected per stream

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_call(method: &'static str, success: bool, start: Instant) {
    let outcome = if success { "ok" } else { "error" };
    counter!("connector_rpc_requests_total", "method" => method, "outcome" => outcome)
        .increment(1);
    histogram!("connector_rpc_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("connector_cache_lookups_total", "cache" => cache, "result" => result).increment(1);
}

pub fn record_blocks_delivered(stream: &str, count: usize) {
    counter!("connector_blocks_delivered_total", "stream" => stream.to_string())
        .increment(count as u64);
}

pub fn record_checkpoint(stream: &str, level: u64) {
    gauge!("connector_checkpoint_level", "stream" => stream.to_string()).set(level as f64);
}

pub fn record_transaction(outcome: &'static str) {
    counter!("connector_transactions_total", "outcome" => outcome).increment(1);
}

pub fn record_reorg(stream: &str) {
    counter!("connector_reorgs_total", "stream" => stream.to_string()).increment(1);
}
