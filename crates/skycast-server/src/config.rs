//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skycast_settings::ServerSettings;

use crate::session::SessionConfig;

/// Runtime configuration for [`SkycastServer`](crate::server::SkycastServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Seconds of client silence before the session is terminated.
    pub heartbeat_timeout_secs: u64,
    /// Per-session outbound queue capacity.
    pub outbound_buffer: usize,
    /// Full-queue drops tolerated before a session is evicted.
    pub max_dropped_messages: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            outbound_buffer: 64,
            max_dropped_messages: 100,
        }
    }
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
            outbound_buffer: settings.outbound_buffer,
            max_dropped_messages: settings.max_dropped_messages,
        }
    }

    /// Per-session tunables derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_buffer: self.outbound_buffer,
            max_dropped: self.max_dropped_messages,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
        }
    }
}
