//! Error types for the distribution core.
//!
//! Failures local to one session or one location are values here, never
//! panics: the caller decides whether to log, skip or close.

use thiserror::Error;

/// Registry-level refusal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry hit a fatal condition and accepts no new members.
    #[error("group registry is halted")]
    Halted,
    /// The connection is already a member of another group.
    #[error("connection already subscribed to '{current}'")]
    AlreadySubscribed {
        /// Key of the group the connection currently belongs to.
        current: String,
    },
}

/// Errors surfaced by a [`BroadcastGateway`](crate::gateway::BroadcastGateway).
///
/// Per-recipient delivery problems are never reported here; they are folded
/// into the fan-out report.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The underlying registry is halted; publishes and joins are refused.
    #[error("gateway halted: registry no longer accepts traffic")]
    Halted,
    /// A membership change was refused by the registry.
    #[error("subscription refused: {0}")]
    Registry(#[from] RegistryError),
    /// The publish bus has shut down.
    #[error("publish bus closed")]
    BusClosed,
}

/// Why a single delivery attempt did not reach a session's outbound queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The session's outbound queue is gone (session already terminated).
    #[error("outbound channel closed")]
    Closed,
    /// The outbound queue is full; the payload was dropped.
    #[error("outbound channel full ({dropped} dropped so far)")]
    Full {
        /// Total drops recorded for this connection, including this one.
        dropped: u64,
    },
    /// The connection was already evicted.
    #[error("connection evicted")]
    Evicted,
}

/// Errors from a [`SnapshotStore`](crate::snapshot::SnapshotStore).
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    /// Stored payload could not be encoded or decoded.
    #[error("snapshot payload error: {0}")]
    Payload(#[from] serde_json::Error),
    /// The blocking task running the store call panicked or was cancelled.
    #[error("snapshot task failed: {0}")]
    Task(String),
}

/// Failure producing or publishing one location's reading in a feed cycle.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The reading source could not produce a value.
    #[error("reading source failed: {0}")]
    Source(String),
    /// Recording the snapshot failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Publishing through the gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport-level failure (send or receive on the client connection).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Errors from starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
