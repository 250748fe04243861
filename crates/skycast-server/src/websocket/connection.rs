//! Per-connection delivery handle shared between a session and the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use skycast_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::DeliveryFailure;

/// The registry-facing half of a live session.
///
/// The owning session task keeps the receiving end of the outbound queue;
/// the registry and gateway only ever hold this handle, so they can enqueue
/// payloads and request eviction but never drive the session's lifecycle.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    principal: String,
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_activity: Mutex<Instant>,
    dropped_messages: AtomicU64,
    max_dropped: u64,
    evicted: CancellationToken,
}

impl ClientConnection {
    /// Create a connection handle.
    ///
    /// `max_dropped` is the number of full-queue drops tolerated before the
    /// gateway evicts the connection.
    pub fn new(
        id: ConnectionId,
        principal: impl Into<String>,
        tx: mpsc::Sender<Arc<String>>,
        max_dropped: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            principal: principal.into(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_activity: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            max_dropped: max_dropped.max(1),
            evicted: CancellationToken::new(),
        }
    }

    /// Authenticated identity that owns this connection.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Enqueue a payload without waiting.
    ///
    /// Never blocks: a full queue counts as a drop and a closed queue means
    /// the session is gone.
    pub fn deliver(&self, payload: Arc<String>) -> Result<(), DeliveryFailure> {
        if self.evicted.is_cancelled() {
            return Err(DeliveryFailure::Evicted);
        }
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                Err(DeliveryFailure::Full { dropped })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryFailure::Closed),
        }
    }

    /// Total payloads dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the drop budget is exhausted.
    pub fn exceeded_drop_budget(&self) -> bool {
        self.drop_count() >= self.max_dropped
    }

    /// Signal the owning session to terminate. Idempotent.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    /// Whether [`evict`](Self::evict) has been called.
    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// Token cancelled on eviction; the session selects on it.
    pub fn eviction_token(&self) -> CancellationToken {
        self.evicted.clone()
    }

    /// Record client activity (any inbound frame, including pongs).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the client was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity (or connect).
    pub fn last_activity_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Heartbeat verdict: silent since the last check and for longer than
    /// `timeout`.
    pub fn heartbeat_expired(&self, timeout: Duration) -> bool {
        !self.check_alive() && self.last_activity_elapsed() > timeout
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("dropped", &self.drop_count())
            .field("evicted", &self.is_evicted())
            .finish_non_exhaustive()
    }
}
