//! The set of locations the feed produces for.

use parking_lot::RwLock;
use skycast_core::{Location, LocationKey};

/// Source of the locations currently considered active.
pub trait LocationCatalog: Send + Sync {
    /// Active locations, in a stable order.
    fn active_locations(&self) -> Vec<Location>;
}

/// Catalog held in memory, built from configuration.
///
/// Entries can be toggled at runtime; the generator sees the change on its
/// next cycle.
#[derive(Default)]
pub struct StaticCatalog {
    locations: RwLock<Vec<Location>>,
}

impl StaticCatalog {
    /// Create a catalog from `locations`.
    pub fn new(locations: Vec<Location>) -> Self {
        Self {
            locations: RwLock::new(locations),
        }
    }

    /// Set the active flag of `key`. Returns `false` if unknown.
    pub fn set_active(&self, key: &LocationKey, active: bool) -> bool {
        let mut locations = self.locations.write();
        match locations.iter_mut().find(|l| l.key() == key) {
            Some(location) => {
                location.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Total number of locations, active or not.
    pub fn len(&self) -> usize {
        self.locations.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.locations.read().is_empty()
    }
}

impl LocationCatalog for StaticCatalog {
    fn active_locations(&self) -> Vec<Location> {
        self.locations
            .read()
            .iter()
            .filter(|l| l.is_active)
            .cloned()
            .collect()
    }
}
