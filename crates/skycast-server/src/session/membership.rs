//! Scoped group membership.
//!
//! Acquiring a [`Membership`] joins the group; releasing it (explicitly or
//! on drop) leaves it exactly once, on every exit path.

use std::sync::Arc;

use skycast_core::{ConnectionId, LocationKey};
use tracing::debug;

use crate::errors::GatewayError;
use crate::gateway::BroadcastGateway;
use crate::websocket::connection::ClientConnection;

/// Guard representing one session's membership in one group.
pub struct Membership {
    gateway: Arc<dyn BroadcastGateway>,
    key: LocationKey,
    id: ConnectionId,
    released: bool,
}

impl Membership {
    /// Join `connection` to the group for `key`.
    pub fn acquire(
        gateway: Arc<dyn BroadcastGateway>,
        key: LocationKey,
        connection: Arc<ClientConnection>,
    ) -> Result<Self, GatewayError> {
        let id = connection.id.clone();
        gateway.subscribe(&key, connection)?;
        Ok(Self {
            gateway,
            key,
            id,
            released: false,
        })
    }

    /// Group this membership belongs to.
    pub fn key(&self) -> &LocationKey {
        &self.key
    }

    /// Leave the group. Only the first call has an effect.
    ///
    /// Returns `true` if this call performed the release. The gateway may
    /// already have removed the member (eviction); that still counts as the
    /// single release from the session's side.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let was_member = self.gateway.unsubscribe(&self.key, &self.id);
        debug!(location = %self.key, conn_id = %self.id, was_member, "membership released");
        true
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
