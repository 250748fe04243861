//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"halted"` once the registry refuses traffic.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Non-empty location groups.
    pub groups: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    groups: usize,
    halted: bool,
) -> HealthResponse {
    HealthResponse {
        status: if halted { "halted" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        groups,
    }
}
