// src/core/metrics.rs

//! Defines and registers Prometheus metrics for gateway monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of client streams currently open.
    pub static ref ACTIVE_SESSIONS: Gauge =
        register_gauge!("lildb_gateway_active_sessions", "Number of currently open client sessions.").unwrap();
    /// The number of backend links currently open.
    pub static ref LIVE_CONNECTIONS: Gauge =
        register_gauge!("lildb_gateway_live_connections", "Number of open backend connections.").unwrap();

    // --- Counters ---
    /// The total number of client streams accepted since startup.
    pub static ref SESSIONS_OPENED_TOTAL: Counter =
        register_counter!("lildb_gateway_sessions_opened_total", "Total number of client sessions opened.").unwrap();
    /// The total number of commands forwarded to a backend.
    pub static ref COMMANDS_EXECUTED_TOTAL: Counter =
        register_counter!("lildb_gateway_commands_executed_total", "Total number of commands executed.").unwrap();
    /// The total number of commands answered with an error payload.
    pub static ref COMMAND_ERRORS_TOTAL: Counter =
        register_counter!("lildb_gateway_command_errors_total", "Total number of commands that produced an error output.").unwrap();
    pub static ref BACKEND_OPENS_TOTAL: Counter =
        register_counter!("lildb_gateway_backend_opens_total", "Total number of backend connections opened.").unwrap();
    pub static ref BACKEND_CLOSES_TOTAL: Counter =
        register_counter!("lildb_gateway_backend_closes_total", "Total number of backend connections closed.").unwrap();
    pub static ref BACKEND_OPEN_FAILURES_TOTAL: Counter =
        register_counter!("lildb_gateway_backend_open_failures_total", "Total number of failed backend connection attempts.").unwrap();

    // --- Histograms ---
    /// A histogram of backend command latencies.
    pub static ref COMMAND_LATENCY_SECONDS: Histogram =
        register_histogram!("lildb_gateway_command_latency_seconds", "Latency of backend command execution in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
