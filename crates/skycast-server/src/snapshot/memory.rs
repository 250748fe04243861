use std::sync::Arc;

use dashmap::DashMap;
use skycast_core::{LocationKey, Reading};

use super::SnapshotStore;
use crate::errors::SnapshotError;

/// In-process snapshot store. Writes to different keys never contend.
#[derive(Default)]
pub struct MemorySnapshotStore {
    latest: DashMap<LocationKey, Arc<Reading>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a recorded reading.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn record(&self, key: &LocationKey, reading: Arc<Reading>) -> Result<(), SnapshotError> {
        let _ = self.latest.insert(key.clone(), reading);
        Ok(())
    }

    fn latest(&self, key: &LocationKey) -> Result<Option<Arc<Reading>>, SnapshotError> {
        Ok(self.latest.get(key).map(|entry| entry.value().clone()))
    }
}
