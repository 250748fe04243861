//! In-process fan-out over the shared [`GroupRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use skycast_core::{ConnectionId, LocationKey};
use tracing::{debug, warn};

use super::{BroadcastGateway, FanoutReport, PublishOutcome};
use crate::errors::{DeliveryFailure, GatewayError};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_DELIVERIES_TOTAL, WS_EVICTIONS_TOTAL};
use crate::registry::GroupRegistry;
use crate::websocket::connection::ClientConnection;

/// Gateway that delivers directly into each member's outbound queue.
pub struct LocalGateway {
    registry: Arc<GroupRegistry>,
    /// Serializes fan-outs so members of a key see publishes in call order.
    fanout: Mutex<()>,
}

impl LocalGateway {
    /// Create a gateway over `registry`.
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self {
            registry,
            fanout: Mutex::new(()),
        }
    }

    /// The registry this gateway routes through.
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Fan `payload` out to the current members of `key`.
    ///
    /// Each member is tried independently with a non-blocking enqueue. A
    /// closed or evicted member is removed from the group and signalled; a
    /// member that exhausts its drop budget is evicted the same way.
    pub fn fan_out(
        &self,
        key: &LocationKey,
        payload: &Arc<String>,
    ) -> Result<FanoutReport, GatewayError> {
        if self.registry.is_halted() {
            return Err(GatewayError::Halted);
        }

        let _serial = self.fanout.lock();
        let members = self.registry.members_of(key);
        let mut report = FanoutReport {
            recipients: members.len(),
            ..FanoutReport::default()
        };

        for conn in &members {
            match conn.deliver(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryFailure::Full { dropped }) => {
                    report.dropped += 1;
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    if conn.exceeded_drop_budget() {
                        warn!(conn_id = %conn.id, location = %key, dropped, "evicting slow client");
                        self.evict(key, conn);
                        report.evicted += 1;
                    } else {
                        debug!(conn_id = %conn.id, location = %key, dropped, "outbound queue full, dropped update");
                    }
                }
                Err(failure @ (DeliveryFailure::Closed | DeliveryFailure::Evicted)) => {
                    warn!(conn_id = %conn.id, location = %key, error = %failure, "delivery failed, removing member");
                    self.evict(key, conn);
                    report.evicted += 1;
                }
            }
        }

        counter!(WS_DELIVERIES_TOTAL).increment(report.delivered as u64);
        debug!(
            location = %key,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "fan-out complete"
        );
        Ok(report)
    }

    fn evict(&self, key: &LocationKey, conn: &Arc<ClientConnection>) {
        conn.evict();
        if self.registry.leave(key, &conn.id) {
            counter!(WS_EVICTIONS_TOTAL).increment(1);
        }
    }
}

#[async_trait]
impl BroadcastGateway for LocalGateway {
    fn subscribe(
        &self,
        key: &LocationKey,
        connection: Arc<ClientConnection>,
    ) -> Result<(), GatewayError> {
        let _ = self.registry.join(key, connection)?;
        Ok(())
    }

    fn unsubscribe(&self, key: &LocationKey, id: &ConnectionId) -> bool {
        self.registry.leave(key, id)
    }

    async fn publish(
        &self,
        key: &LocationKey,
        payload: Arc<String>,
    ) -> Result<PublishOutcome, GatewayError> {
        self.fan_out(key, &payload).map(PublishOutcome::Delivered)
    }
}
