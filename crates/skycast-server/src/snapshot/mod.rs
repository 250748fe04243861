//! Last-known reading per location, used to bootstrap new sessions.

mod memory;
mod sqlite;

use std::sync::Arc;

use skycast_core::{LocationKey, Reading};
use skycast_settings::{SnapshotBackend, SnapshotSettings};

pub use memory::MemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use crate::errors::SnapshotError;

/// Last-write-wins store of the most recent reading per key.
pub trait SnapshotStore: Send + Sync {
    /// Replace the reading stored for `key`.
    fn record(&self, key: &LocationKey, reading: Arc<Reading>) -> Result<(), SnapshotError>;

    /// Most recent reading for `key`, if any was recorded.
    fn latest(&self, key: &LocationKey) -> Result<Option<Arc<Reading>>, SnapshotError>;
}

/// Open the store selected by `settings`.
pub fn open_store(settings: &SnapshotSettings) -> Result<Arc<dyn SnapshotStore>, SnapshotError> {
    Ok(match settings.backend {
        SnapshotBackend::Memory => Arc::new(MemorySnapshotStore::new()),
        SnapshotBackend::Sqlite => Arc::new(SqliteSnapshotStore::open(&settings.path)?),
    })
}
