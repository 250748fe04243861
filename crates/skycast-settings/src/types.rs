//! Settings types.
//!
//! Every struct is `#[serde(default)]` so a settings file only needs the keys
//! it overrides.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use skycast_core::logging::LogFormat;
use skycast_core::{Location, LocationError, LocationKey};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkycastSettings {
    /// HTTP / WebSocket server.
    pub server: ServerSettings,
    /// Feed generator.
    pub feed: FeedSettings,
    /// Last-known-reading store.
    pub snapshot: SnapshotSettings,
    /// Logging.
    pub logging: LoggingSettings,
    /// Locations known to the feed.
    pub locations: Vec<LocationSettings>,
    /// Static subscriber directory (token → user → location).
    pub subscribers: Vec<SubscriberSettings>,
}

impl Default for SkycastSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            feed: FeedSettings::default(),
            snapshot: SnapshotSettings::default(),
            logging: LoggingSettings::default(),
            locations: vec![
                LocationSettings {
                    city: "Kathmandu".into(),
                    country: "Nepal".into(),
                    latitude: 27.7172,
                    longitude: 85.3240,
                    is_active: true,
                },
                LocationSettings {
                    city: "Pokhara".into(),
                    country: "Nepal".into(),
                    latitude: 28.2096,
                    longitude: 83.9856,
                    is_active: true,
                },
            ],
            subscribers: Vec::new(),
        }
    }
}

impl SkycastSettings {
    /// Check cross-field invariants that serde cannot express.
    ///
    /// Rejects duplicate location keys, subscribers pointing at unknown
    /// locations, empty or duplicate tokens, and zero-sized intervals/buffers.
    pub fn validate(&self) -> Result<()> {
        if self.feed.interval_secs == 0 {
            return Err(SettingsError::InvalidValue("feed.intervalSecs must be > 0".into()));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue("server.outboundBuffer must be > 0".into()));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be > 0".into(),
            ));
        }

        let mut keys = HashSet::new();
        for loc in &self.locations {
            let key = loc.key().map_err(|e| invalid_location(&loc.city, &e))?;
            if !keys.insert(key.clone()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate location key '{key}'"
                )));
            }
        }

        let mut tokens = HashSet::new();
        for sub in &self.subscribers {
            if sub.token.trim().is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "subscriber '{}' has an empty token",
                    sub.username
                )));
            }
            if !tokens.insert(sub.token.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate token for subscriber '{}'",
                    sub.username
                )));
            }
            if let Some(location) = &sub.location {
                let key = LocationKey::from_name(location)
                    .map_err(|e| invalid_location(location, &e))?;
                if !keys.contains(&key) {
                    return Err(SettingsError::InvalidValue(format!(
                        "subscriber '{}' points at unknown location '{location}'",
                        sub.username
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build core [`Location`]s from the configured entries.
    pub fn build_locations(&self) -> Result<Vec<Location>> {
        self.locations
            .iter()
            .map(|loc| loc.to_location().map_err(|e| invalid_location(&loc.city, &e)))
            .collect()
    }
}

fn invalid_location(name: &str, err: &LocationError) -> SettingsError {
    SettingsError::InvalidValue(format!("location '{name}': {err}"))
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds of client silence before the session is terminated.
    pub heartbeat_timeout_secs: u64,
    /// Per-session outbound queue capacity.
    pub outbound_buffer: usize,
    /// Dropped deliveries tolerated before a slow session is evicted.
    pub max_dropped_messages: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            outbound_buffer: 64,
            max_dropped_messages: 100,
        }
    }
}

/// Feed generator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Run the generator inside the server process.
    pub enabled: bool,
    /// Seconds between production cycles.
    pub interval_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

/// Where last-known readings live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    /// Process memory; lost on restart.
    #[default]
    Memory,
    /// `SQLite` file at [`SnapshotSettings::path`].
    Sqlite,
}

/// Snapshot store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotSettings {
    /// Storage backend.
    pub backend: SnapshotBackend,
    /// Database path for the `sqlite` backend.
    pub path: String,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            backend: SnapshotBackend::Memory,
            path: "snapshots.db".into(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

/// One configured location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSettings {
    /// City name; the routing key is derived from it.
    pub city: String,
    /// Country name.
    pub country: String,
    /// Latitude in decimal degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Longitude in decimal degrees.
    #[serde(default)]
    pub longitude: f64,
    /// Whether the feed produces readings for it.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl LocationSettings {
    /// Routing key for this entry.
    pub fn key(&self) -> std::result::Result<LocationKey, LocationError> {
        LocationKey::from_name(&self.city)
    }

    /// Convert into a core [`Location`].
    pub fn to_location(&self) -> std::result::Result<Location, LocationError> {
        Ok(Location::new(&self.city, &self.country)?
            .with_coordinates(self.latitude, self.longitude)
            .with_active(self.is_active))
    }
}

fn default_true() -> bool {
    true
}

/// One entry of the static subscriber directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSettings {
    /// Bearer token presented on connect.
    pub token: String,
    /// Identity the token authenticates as.
    pub username: String,
    /// Preferred location (city name); `None` means no location configured.
    #[serde(default)]
    pub location: Option<String>,
}
