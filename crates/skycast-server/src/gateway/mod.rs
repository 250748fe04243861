//! Publish/subscribe seam between producers and sessions.
//!
//! Producers only see [`BroadcastGateway::publish`]; sessions only see
//! subscribe/unsubscribe. [`LocalGateway`] fans out in the caller's task,
//! [`QueuedGateway`] hands publishes to a dispatcher over a bus so the
//! publisher can live in a different task (or, with another implementation,
//! a different process).

mod local;
mod queued;

use std::sync::Arc;

use async_trait::async_trait;
use skycast_core::{ConnectionId, LocationKey};

pub use local::LocalGateway;
pub use queued::QueuedGateway;

use crate::errors::GatewayError;
use crate::websocket::connection::ClientConnection;

/// Result of fanning one payload out to a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Members of the group at publish time.
    pub recipients: usize,
    /// Payloads accepted by a member's outbound queue.
    pub delivered: usize,
    /// Payloads dropped on a full queue (member kept).
    pub dropped: usize,
    /// Members removed because delivery was impossible.
    pub evicted: usize,
}

/// What `publish` did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Fanned out synchronously.
    Delivered(FanoutReport),
    /// Accepted onto a bus; fan-out happens in the dispatcher.
    Enqueued,
}

/// Transport-agnostic broadcast contract.
///
/// Membership changes are synchronous and never perform I/O so a session can
/// release its membership from `Drop`. Publishing is async so a networked
/// implementation can await its broker.
#[async_trait]
pub trait BroadcastGateway: Send + Sync {
    /// Register `connection` for payloads published to `key`.
    fn subscribe(
        &self,
        key: &LocationKey,
        connection: Arc<ClientConnection>,
    ) -> Result<(), GatewayError>;

    /// Remove `id` from `key`. Returns `true` if it was a member.
    fn unsubscribe(&self, key: &LocationKey, id: &ConnectionId) -> bool;

    /// Deliver `payload` to every member of `key`.
    ///
    /// Per-member failures are absorbed; only gateway-wide conditions error.
    async fn publish(
        &self,
        key: &LocationKey,
        payload: Arc<String>,
    ) -> Result<PublishOutcome, GatewayError>;
}
