//! Prometheus recorder installation and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Must be called
/// once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; used where a handle is required but no
/// global recorder should be touched (tests, embedded servers).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across crates.

/// Messages accepted and persisted (counter).
pub const MESSAGES_ACCEPTED_TOTAL: &str = "chat_messages_accepted_total";
/// Messages rejected because persistence failed (counter).
pub const MESSAGES_PERSIST_FAILURES_TOTAL: &str = "chat_messages_persist_failures_total";
/// Frames enqueued to destination connections during fan-out (counter).
pub const FANOUT_DELIVERIES_TOTAL: &str = "chat_fanout_deliveries_total";
/// Destinations evicted during fan-out (counter, labels: reason).
pub const FANOUT_EVICTIONS_TOTAL: &str = "chat_fanout_evictions_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Registration attempts (counter, labels: outcome).
pub const AUTH_REGISTRATIONS_TOTAL: &str = "auth_registrations_total";
/// Login attempts (counter, labels: outcome).
pub const AUTH_LOGINS_TOTAL: &str = "auth_logins_total";
