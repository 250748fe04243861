//! `SQLite`-backed snapshot store so bootstraps survive restarts.

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use skycast_core::{LocationKey, Reading};
use tracing::debug;

use super::SnapshotStore;
use crate::errors::SnapshotError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS last_readings (
    location_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    recorded_at TEXT NOT NULL
)";

/// One row per location key, upserted on every record.
pub struct SqliteSnapshotStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self, SnapshotError> {
        debug!(path, "opening snapshot database");
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
        Self::with_manager(manager, 4)
    }

    /// Private in-memory database (single connection so every call sees the
    /// same data).
    pub fn in_memory() -> Result<Self, SnapshotError> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, size: u32) -> Result<Self, SnapshotError> {
        let pool = Pool::builder()
            .max_size(size)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;
        let _ = pool.get()?.execute(SCHEMA, [])?;
        Ok(Self { pool })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn record(&self, key: &LocationKey, reading: Arc<Reading>) -> Result<(), SnapshotError> {
        let payload = serde_json::to_string(reading.as_ref())?;
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO last_readings (location_key, payload, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(location_key) DO UPDATE SET
                 payload = excluded.payload,
                 recorded_at = excluded.recorded_at",
            params![key.as_str(), payload, reading.timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    fn latest(&self, key: &LocationKey) -> Result<Option<Arc<Reading>>, SnapshotError> {
        let conn = self.pool.get()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM last_readings WHERE location_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str::<Reading>(&p).map(Arc::new))
            .transpose()
            .map_err(Into::into)
    }
}
