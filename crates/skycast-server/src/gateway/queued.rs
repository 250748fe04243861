//! Bus-backed gateway: publishers enqueue, one dispatcher fans out.

use std::sync::Arc;

use async_trait::async_trait;
use skycast_core::{ConnectionId, LocationKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BroadcastGateway, LocalGateway, PublishOutcome};
use crate::errors::GatewayError;
use crate::websocket::connection::ClientConnection;

type Publish = (LocationKey, Arc<String>);

/// Gateway whose `publish` only enqueues onto a bounded bus.
///
/// A single dispatcher drains the bus in FIFO order, so publishes for one key
/// reach members in the order they were enqueued. Membership changes go
/// straight to the wrapped [`LocalGateway`].
pub struct QueuedGateway {
    inner: Arc<LocalGateway>,
    bus: mpsc::Sender<Publish>,
}

impl QueuedGateway {
    /// Start the dispatcher and return the gateway plus its task handle.
    ///
    /// The dispatcher exits when `cancel` fires or every gateway clone is
    /// dropped; pending publishes are drained before a cancelled exit.
    pub fn spawn(
        inner: Arc<LocalGateway>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (bus, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(dispatch(inner.clone(), rx, cancel));
        (Self { inner, bus }, handle)
    }
}

async fn dispatch(inner: Arc<LocalGateway>, mut rx: mpsc::Receiver<Publish>, cancel: CancellationToken) {
    info!("publish dispatcher started");
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some((key, payload)) = msg else { break };
                fan_out(&inner, &key, &payload);
            }
            () = cancel.cancelled() => {
                rx.close();
                while let Some((key, payload)) = rx.recv().await {
                    fan_out(&inner, &key, &payload);
                }
                break;
            }
        }
    }
    info!("publish dispatcher stopped");
}

fn fan_out(inner: &LocalGateway, key: &LocationKey, payload: &Arc<String>) {
    match inner.fan_out(key, payload) {
        Ok(report) => debug!(location = %key, delivered = report.delivered, "dispatched publish"),
        Err(e) => warn!(location = %key, error = %e, "dispatch failed"),
    }
}

#[async_trait]
impl BroadcastGateway for QueuedGateway {
    fn subscribe(
        &self,
        key: &LocationKey,
        connection: Arc<ClientConnection>,
    ) -> Result<(), GatewayError> {
        self.inner.subscribe(key, connection)
    }

    fn unsubscribe(&self, key: &LocationKey, id: &ConnectionId) -> bool {
        self.inner.unsubscribe(key, id)
    }

    async fn publish(
        &self,
        key: &LocationKey,
        payload: Arc<String>,
    ) -> Result<PublishOutcome, GatewayError> {
        if self.inner.registry().is_halted() {
            return Err(GatewayError::Halted);
        }
        self.bus
            .send((key.clone(), payload))
            .await
            .map_err(|_| GatewayError::BusClosed)?;
        Ok(PublishOutcome::Enqueued)
    }
}
