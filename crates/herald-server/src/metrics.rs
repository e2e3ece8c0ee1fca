//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use herald_core::JoinOutcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const CHANNELS_ACTIVE: &str = "herald_channels_active";
    pub const JOINS_TOTAL: &str = "herald_joins_total";
    pub const EVICTIONS_TOTAL: &str = "herald_evictions_total";
    pub const SUBSCRIPTION_ERRORS_TOTAL: &str = "herald_subscription_errors_total";
    pub const BUS_ACTIVATIONS_TOTAL: &str = "herald_bus_activations_total";
    pub const CLIENT_EVENTS_TOTAL: &str = "herald_client_events_total";
    pub const BRIDGED_MESSAGES_TOTAL: &str = "herald_bridged_messages_total";
    pub const JOIN_SECONDS: &str = "herald_join_seconds";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
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
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of occupied channels");
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of successful joins");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted to respect a connection limit"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTION_ERRORS_TOTAL,
        "Join requests answered with subscription_error"
    );
    metrics::describe_counter!(
        names::BUS_ACTIVATIONS_TOTAL,
        "Channels that went from empty to occupied"
    );
    metrics::describe_counter!(
        names::CLIENT_EVENTS_TOTAL,
        "Client events received, by whether they were relayed"
    );
    metrics::describe_counter!(
        names::BRIDGED_MESSAGES_TOTAL,
        "Bus messages delivered to local connections"
    );
    metrics::describe_histogram!(names::JOIN_SECONDS, "Join latency including authorization");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
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

/// Record the outcome of a join request.
pub fn record_join(outcome: &JoinOutcome, seconds: f64) {
    histogram!(names::JOIN_SECONDS).record(seconds);
    match outcome {
        JoinOutcome::Ignored => {}
        JoinOutcome::Rejected { status, .. } => {
            counter!(names::SUBSCRIPTION_ERRORS_TOTAL, "status" => status.to_string()).increment(1);
        }
        JoinOutcome::Joined {
            evicted, activated, ..
        } => {
            counter!(names::JOINS_TOTAL).increment(1);
            counter!(names::EVICTIONS_TOTAL).increment(evicted.len() as u64);
            if *activated {
                counter!(names::BUS_ACTIVATIONS_TOTAL).increment(1);
            }
        }
    }
}

/// Record a client event.
pub fn record_client_event(relayed: bool) {
    let result = if relayed { "relayed" } else { "dropped" };
    counter!(names::CLIENT_EVENTS_TOTAL, "result" => result).increment(1);
}

/// Record bus messages delivered locally.
pub fn record_bridged(recipients: usize) {
    counter!(names::BRIDGED_MESSAGES_TOTAL).increment(recipients as u64);
}

/// Update occupied channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
    use herald_core::ConnectionId;

    #[test]
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_join(
            &JoinOutcome::Joined {
                channel: "lobby".into(),
                evicted: vec![ConnectionId::new("c0")],
                activated: true,
            },
            0.001,
        );
        record_join(
            &JoinOutcome::Rejected {
                channel: "private-a".into(),
                status: 403,
            },
            0.001,
        );
        record_client_event(false);
        record_bridged(3);
    }
}
