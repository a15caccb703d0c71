//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wallet_blocks_scanned_total` (counter): blocks processed by coin
//! - `wallet_scan_cursor` (gauge): next block height by coin
//! - `wallet_receipt_jobs_total` (counter): receipt checks by coin, outcome
//! - `wallet_pending_transactions` (gauge): pending registry size by coin
//! - `wallet_pending_evicted_total` (counter): TTL evictions by coin
//! - `wallet_scheduler_queue_depth` (gauge): items waiting per scheduler
//! - `wallet_notifications_total` (counter): webhook deliveries by kind, result
//! - `wallet_sweeps_total` (counter): sweep attempts by coin, result
//! - `wallet_transfers_total` (counter): issued transfers by coin, result
//! - `wallet_rpc_health` (gauge): 1=reachable, 0=unreachable
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels are low-cardinality: coin names and fixed outcome strings

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_blocks_scanned(coin: &str, count: u64) {
    counter!("wallet_blocks_scanned_total", "coin" => coin.to_string()).increment(count);
}

pub fn record_scan_cursor(coin: &str, cursor: u64) {
    gauge!("wallet_scan_cursor", "coin" => coin.to_string()).set(cursor as f64);
}

/// `outcome` is one of `resolved`, `retry` or `dropped`.
pub fn record_receipt_job(coin: &str, outcome: &'static str) {
    counter!("wallet_receipt_jobs_total", "coin" => coin.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_pending_size(coin: &str, size: usize) {
    gauge!("wallet_pending_transactions", "coin" => coin.to_string()).set(size as f64);
}

pub fn record_pending_evicted(coin: &str, count: usize) {
    counter!("wallet_pending_evicted_total", "coin" => coin.to_string()).increment(count as u64);
}

pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!("wallet_scheduler_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// `kind` is `deposit` or `withdrawal`.
pub fn record_notification(kind: &'static str, delivered: bool) {
    let result = if delivered { "ok" } else { "error" };
    counter!("wallet_notifications_total", "kind" => kind, "result" => result).increment(1);
}

/// `result` is one of `sent`, `retry` or `dead_letter`.
pub fn record_sweep(coin: &str, result: &'static str) {
    counter!("wallet_sweeps_total", "coin" => coin.to_string(), "result" => result).increment(1);
}

pub fn record_transfer(coin: &str, success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("wallet_transfers_total", "coin" => coin.to_string(), "result" => result).increment(1);
}

pub fn record_rpc_health(healthy: bool) {
    gauge!("wallet_rpc_health").set(if healthy { 1.0 } else { 0.0 });
}
