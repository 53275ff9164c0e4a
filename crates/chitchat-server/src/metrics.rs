//! Metrics collection and export for ChitChat.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chitchat_core::CloseReason;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chitchat_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chitchat_connections_active";
    pub const SESSIONS_CLOSED: &str = "chitchat_sessions_closed_total";
    pub const QUERIES_TOTAL: &str = "chitchat_queries_total";
    pub const QUERY_SECONDS: &str = "chitchat_query_seconds";
    pub const ERRORS_TOTAL: &str = "chitchat_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::SESSIONS_CLOSED, "Closed sessions by reason");
    metrics::describe_counter!(names::QUERIES_TOTAL, "History and roster queries");
    metrics::describe_histogram!(names::QUERY_SECONDS, "Query latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record how a session ended.
pub fn record_close(reason: &CloseReason) {
    counter!(names::SESSIONS_CLOSED, "reason" => reason.label()).increment(1);
    if reason.is_error() {
        record_error("session");
    }
}

/// Record a finished query.
pub fn record_query(kind: &'static str, seconds: f64) {
    counter!(names::QUERIES_TOTAL, "kind" => kind).increment(1);
    histogram!(names::QUERY_SECONDS, "kind" => kind).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_close(&CloseReason::Shutdown);
        record_close(&CloseReason::ReadFailed("reset".into()));
        record_query("history", 0.01);
    }
}
