// src/core/metrics.rs

//! Defines and registers Prometheus metrics for connection draining.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of connections currently registered with a drain coordinator.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("keepdrain_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of request/response cycles currently in flight.
    pub static ref REQUESTS_IN_FLIGHT: Gauge =
        register_gauge!("keepdrain_requests_in_flight", "Number of requests currently being processed.").unwrap();
    /// A boolean gauge indicating if a server is draining.
    pub static ref DRAINING: Gauge =
        register_gauge!("keepdrain_draining", "Indicates if the server is draining (1 for true, 0 for false).").unwrap();

    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("keepdrain_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections dropped at accept time because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("keepdrain_connections_rejected_total", "Total number of connections rejected at the client limit.").unwrap();
    /// Connections closed when their last pending request finished after termination.
    pub static ref CONNECTIONS_DRAINED_TOTAL: Counter =
        register_counter!("keepdrain_connections_drained_total", "Total number of connections closed after draining in-flight requests.").unwrap();
    /// The total number of completed request/response cycles.
    pub static ref REQUESTS_PROCESSED_TOTAL: Counter =
        register_counter!("keepdrain_requests_processed_total", "Total number of requests processed.").unwrap();

    // --- Histograms ---
    /// Time from request start to response flush.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("keepdrain_request_latency_seconds", "Latency of request processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
