//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Must be called once at
/// process start, before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// A handle backed by a recorder that is not installed globally.
///
/// Useful for tests and for embedding the server without global metrics.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric names, shared so call sites cannot drift.

/// `WebSocket` sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "studio_ws_connections_total";
/// `WebSocket` sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "studio_ws_disconnections_total";
/// Live `WebSocket` sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "studio_ws_connections_active";
/// Session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "studio_ws_connection_duration_seconds";
/// Refused handshakes (counter, labels: reason).
pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "studio_handshake_rejections_total";
/// Payloads received from the bus (counter).
pub const BUS_MESSAGES_RECEIVED_TOTAL: &str = "studio_bus_messages_received_total";
/// Bus payloads that failed to parse (counter).
pub const BUS_MESSAGES_MALFORMED_TOTAL: &str = "studio_bus_messages_malformed_total";
/// Change frames queued to sessions (counter).
pub const DELIVERIES_TOTAL: &str = "studio_deliveries_total";
/// Change frames dropped on full session queues (counter).
pub const DELIVERY_DROPS_TOTAL: &str = "studio_delivery_drops_total";
/// Envelopes published (counter, labels: action).
pub const PUBLISH_TOTAL: &str = "studio_publish_total";
/// Failed publishes (counter).
pub const PUBLISH_FAILURES_TOTAL: &str = "studio_publish_failures_total";
/// Resync requests served (counter).
pub const RESYNC_REQUESTS_TOTAL: &str = "studio_resync_requests_total";
/// Resync requests that failed to read the snapshot (counter).
pub const RESYNC_ERRORS_TOTAL: &str = "studio_resync_errors_total";
