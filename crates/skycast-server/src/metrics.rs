//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Fails if a recorder is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active sessions closed (counter, labels: cause).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Sessions currently `Active` (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections refused before `Active` (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Updates dropped on a full outbound queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Updates enqueued for a member (counter).
pub const WS_DELIVERIES_TOTAL: &str = "ws_deliveries_total";
/// Members evicted by the gateway (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Active session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Feed cycles completed (counter).
pub const FEED_CYCLES_TOTAL: &str = "feed_cycles_total";
/// Per-location feed failures (counter).
pub const FEED_FAILURES_TOTAL: &str = "feed_failures_total";
/// Readings published by the feed (counter).
pub const FEED_READINGS_TOTAL: &str = "feed_readings_total";
/// Wall time of one feed cycle (histogram).
pub const FEED_CYCLE_DURATION_SECONDS: &str = "feed_cycle_duration_seconds";
