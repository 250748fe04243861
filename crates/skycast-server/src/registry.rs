//! Location-keyed group membership.
//!
//! One mutex guards both the group table and the reverse index, so a join,
//! leave or snapshot never observes a half-applied change. Nothing in here
//! awaits or performs I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use skycast_core::{ConnectionId, LocationKey};
use tracing::{debug, error};

use crate::errors::RegistryError;
use crate::websocket::connection::ClientConnection;

type Group = HashMap<ConnectionId, Arc<ClientConnection>>;

#[derive(Default)]
struct Groups {
    by_key: HashMap<LocationKey, Group>,
    /// Reverse index enforcing the single-subscription policy.
    key_of: HashMap<ConnectionId, LocationKey>,
}

/// Registry of which connections are subscribed to which location.
///
/// Holds non-owning handles only: removing a connection here never closes
/// it. Created once by the composition root and passed down explicitly.
#[derive(Default)]
pub struct GroupRegistry {
    groups: Mutex<Groups>,
    halted: AtomicBool,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to the group for `key`, creating the group if needed.
    ///
    /// Returns `Ok(true)` if newly added and `Ok(false)` if it was already a
    /// member of this group.
    pub fn join(
        &self,
        key: &LocationKey,
        connection: Arc<ClientConnection>,
    ) -> Result<bool, RegistryError> {
        if self.is_halted() {
            return Err(RegistryError::Halted);
        }
        let mut groups = self.groups.lock();
        match groups.key_of.get(&connection.id) {
            Some(current) if current == key => return Ok(false),
            Some(current) => {
                return Err(RegistryError::AlreadySubscribed {
                    current: current.to_string(),
                });
            }
            None => {}
        }
        let id = connection.id.clone();
        let _ = groups.key_of.insert(id.clone(), key.clone());
        let _ = groups
            .by_key
            .entry(key.clone())
            .or_default()
            .insert(id, connection);
        debug!(location = %key, "joined group");
        Ok(true)
    }

    /// Remove `id` from the group for `key`, dropping the group once empty.
    ///
    /// Returns `true` if the connection was a member. Works while halted.
    pub fn leave(&self, key: &LocationKey, id: &ConnectionId) -> bool {
        let mut groups = self.groups.lock();
        let Some(group) = groups.by_key.get_mut(key) else {
            return false;
        };
        if group.remove(id).is_none() {
            return false;
        }
        if group.is_empty() {
            let _ = groups.by_key.remove(key);
        }
        let _ = groups.key_of.remove(id);
        debug!(location = %key, conn_id = %id, "left group");
        true
    }

    /// Point-in-time copy of the members of `key`.
    pub fn members_of(&self, key: &LocationKey) -> Vec<Arc<ClientConnection>> {
        self.groups
            .lock()
            .by_key
            .get(key)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `id` is currently a member of any group.
    pub fn group_of(&self, id: &ConnectionId) -> Option<LocationKey> {
        self.groups.lock().key_of.get(id).cloned()
    }

    /// Number of non-empty groups.
    pub fn group_count(&self) -> usize {
        self.groups.lock().by_key.len()
    }

    /// Number of subscribed connections across all groups.
    pub fn member_count(&self) -> usize {
        self.groups.lock().key_of.len()
    }

    /// Stop accepting joins and publishes after a fatal condition.
    ///
    /// Existing members can still leave so sessions close cleanly.
    pub fn halt(&self, reason: &str) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(reason, "group registry halted");
        }
    }

    /// Whether [`halt`](Self::halt) has been called.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
