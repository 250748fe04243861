//! Drives one connection through its lifecycle.
//!
//! `Connecting → Authorizing → Subscribing → Active → Closing → Closed`, or
//! `Rejected` from any state before `Active`. Group membership exists only
//! while `Active` and is released before the transport is closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use skycast_core::{ConnectionId, LocationKey, ServerMessage};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::collaborators::{Authorizer, Credentials, LocationResolver};
use super::membership::Membership;
use super::state::{InboundEvent, RejectReason, SessionState, TerminationCause};
use crate::errors::TransportError;
use crate::gateway::BroadcastGateway;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTIONS_TOTAL,
};
use crate::snapshot::SnapshotStore;
use crate::websocket::connection::ClientConnection;
use crate::websocket::transport::{ClientFrame, ClientTransport};

/// How long a close frame may take before the socket is dropped anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub outbound_buffer: usize,
    /// Full-queue drops tolerated before eviction.
    pub max_dropped: u64,
    /// Time between server pings.
    pub heartbeat_interval: Duration,
    /// Client silence tolerated before termination.
    pub heartbeat_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            max_dropped: 100,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Resolves credentials to a principal.
    pub authorizer: Arc<dyn Authorizer>,
    /// Resolves a principal to its location.
    pub resolver: Arc<dyn LocationResolver>,
    /// Where memberships are registered.
    pub gateway: Arc<dyn BroadcastGateway>,
    /// Source of bootstrap readings.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Tunables.
    pub config: SessionConfig,
    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection ID.
    pub id: ConnectionId,
    /// Terminal state (`Closed` or `Rejected`).
    pub state: SessionState,
    /// Every state entered, in order.
    pub history: Vec<SessionState>,
    /// Authenticated username, if authorization succeeded.
    pub principal: Option<String>,
    /// Resolved location, if resolution succeeded.
    pub location: Option<LocationKey>,
    /// What terminated an active session.
    pub cause: Option<TerminationCause>,
    /// Whether a snapshot was pushed on entering `Active`.
    pub bootstrapped: bool,
    /// Gateway payloads forwarded to the client.
    pub forwarded: u64,
}

impl SessionOutcome {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            history: vec![SessionState::Connecting],
            principal: None,
            location: None,
            cause: None,
            bootstrapped: false,
            forwarded: 0,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {next}",
            self.state
        );
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.history.push(next);
    }
}

/// Holds one unit of the active-sessions gauge until dropped, so aborted
/// session tasks do not leave it raised.
struct ActiveGauge;

impl ActiveGauge {
    fn enter() -> Self {
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

/// Snapshot pushed on entering `Active`.
struct Bootstrap {
    payload: Arc<String>,
    timestamp: DateTime<Utc>,
}

impl Bootstrap {
    /// Whether `payload` carries nothing newer than this bootstrap.
    fn supersedes(&self, payload: &str) -> bool {
        if self.payload.as_str() == payload {
            return true;
        }
        match serde_json::from_str::<ServerMessage>(payload) {
            Ok(ServerMessage::WeatherUpdate(reading)) => reading.timestamp <= self.timestamp,
            Err(_) => false,
        }
    }
}

/// What woke the active loop.
enum Wake {
    Event(InboundEvent),
    Frame(Option<Result<ClientFrame, TransportError>>),
    Heartbeat,
}

/// Run a session to completion over `transport`.
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_session<T: ClientTransport>(
    id: ConnectionId,
    mut transport: T,
    credentials: Credentials,
    ctx: &SessionContext,
) -> SessionOutcome {
    let mut outcome = SessionOutcome::new(id.clone());
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    info!("client connected");

    outcome.advance(SessionState::Authorizing);
    let Some(principal) = ctx.authorizer.authorize(&credentials).await else {
        return reject(&mut transport, outcome, RejectReason::Unauthenticated).await;
    };
    outcome.principal = Some(principal.username.clone());

    outcome.advance(SessionState::Subscribing);
    let Some(key) = ctx.resolver.resolve(&principal).await else {
        return reject(&mut transport, outcome, RejectReason::NoLocation).await;
    };
    outcome.location = Some(key.clone());

    let (tx, mut rx) = mpsc::channel(ctx.config.outbound_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(
        id,
        principal.username.clone(),
        tx,
        ctx.config.max_dropped,
    ));
    let mut membership =
        match Membership::acquire(ctx.gateway.clone(), key.clone(), connection.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, location = %key, "subscription refused");
                return reject(&mut transport, outcome, RejectReason::Unavailable).await;
            }
        };

    outcome.advance(SessionState::Active);
    let active = ActiveGauge::enter();
    info!(principal = %principal.username, location = %key, "session active");

    let cause = pump(&mut transport, &connection, &mut rx, &key, ctx, &mut outcome).await;

    outcome.advance(SessionState::Closing);
    let _ = membership.release();
    close(&mut transport, cause.close_code()).await;
    outcome.advance(SessionState::Closed);
    outcome.cause = Some(cause);

    drop(active);
    counter!(WS_DISCONNECTIONS_TOTAL, "cause" => cause.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(
        cause = cause.as_str(),
        forwarded = outcome.forwarded,
        dropped = connection.drop_count(),
        "session closed"
    );
    outcome
}

async fn reject<T: ClientTransport>(
    transport: &mut T,
    mut outcome: SessionOutcome,
    reason: RejectReason,
) -> SessionOutcome {
    outcome.advance(SessionState::Rejected(reason));
    warn!(%reason, principal = ?outcome.principal, "connection rejected");
    counter!(WS_REJECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    close(transport, reason.close_code()).await;
    outcome
}

async fn close<T: ClientTransport>(transport: &mut T, code: u16) {
    match tokio::time::timeout(CLOSE_GRACE, transport.close(code)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
        Err(_) => debug!("close frame timed out"),
    }
}

/// Write one frame. Shutdown and eviction interrupt a pending write, and a
/// write that makes no progress within the heartbeat timeout fails.
async fn write(
    ctx: &SessionContext,
    evicted: &CancellationToken,
    frame: impl Future<Output = Result<(), TransportError>>,
) -> Result<(), TerminationCause> {
    tokio::select! {
        biased;
        () = ctx.shutdown.cancelled() => Err(TerminationCause::Shutdown),
        () = evicted.cancelled() => Err(TerminationCause::Evicted),
        res = tokio::time::timeout(ctx.config.heartbeat_timeout, frame) => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                Err(TerminationCause::TransportError)
            }
            Err(_) => {
                warn!(
                    timeout_secs = ctx.config.heartbeat_timeout.as_secs(),
                    "write stalled, disconnecting"
                );
                Err(TerminationCause::TransportError)
            }
        },
    }
}

/// The `Active` state: bootstrap, then react to events until terminated.
async fn pump<T: ClientTransport>(
    transport: &mut T,
    connection: &ClientConnection,
    rx: &mut mpsc::Receiver<Arc<String>>,
    key: &LocationKey,
    ctx: &SessionContext,
    outcome: &mut SessionOutcome,
) -> TerminationCause {
    let evicted = connection.eviction_token();

    // A publish racing the bootstrap can deliver the same or an older reading;
    // forwards are compared against it until a newer one arrives.
    let lookup = {
        let snapshots = ctx.snapshots.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || bootstrap_payload(snapshots.as_ref(), &key))
    };
    let mut bootstrap = lookup.await.unwrap_or_else(|e| {
        warn!(error = %e, "snapshot lookup task failed, skipping bootstrap");
        None
    });
    if let Some(b) = &bootstrap {
        if let Err(cause) = write(ctx, &evicted, transport.send_text(b.payload.clone())).await {
            return cause;
        }
        outcome.bootstrapped = true;
    }

    let interval = ctx.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wake = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => Wake::Event(InboundEvent::Terminate(TerminationCause::Shutdown)),
            () = evicted.cancelled() => Wake::Event(InboundEvent::Terminate(TerminationCause::Evicted)),
            payload = rx.recv() => Wake::Event(match payload {
                Some(payload) => InboundEvent::Forward(payload),
                None => InboundEvent::Terminate(TerminationCause::Evicted),
            }),
            frame = transport.recv() => Wake::Frame(frame),
            _ = heartbeat.tick() => Wake::Heartbeat,
        };

        let event = match wake {
            Wake::Event(event) => event,
            Wake::Frame(Some(Ok(ClientFrame::Payload | ClientFrame::Heartbeat))) => {
                connection.mark_alive();
                continue;
            }
            Wake::Frame(Some(Ok(ClientFrame::Close)) | None) => {
                InboundEvent::Terminate(TerminationCause::ClientClosed)
            }
            Wake::Frame(Some(Err(e))) => {
                debug!(error = %e, "transport receive failed");
                InboundEvent::Terminate(TerminationCause::TransportError)
            }
            Wake::Heartbeat => {
                if connection.heartbeat_expired(ctx.config.heartbeat_timeout) {
                    warn!(
                        silent_secs = connection.last_activity_elapsed().as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    InboundEvent::Terminate(TerminationCause::HeartbeatTimeout)
                } else if let Err(cause) = write(ctx, &evicted, transport.send_ping()).await {
                    InboundEvent::Terminate(cause)
                } else {
                    continue;
                }
            }
        };

        match event {
            InboundEvent::Terminate(cause) => return cause,
            InboundEvent::Forward(payload) => {
                if let Some(b) = &bootstrap {
                    if b.supersedes(&payload) {
                        debug!("skipping publish not newer than bootstrap");
                        continue;
                    }
                    bootstrap = None;
                }
                if let Err(cause) = write(ctx, &evicted, transport.send_text(payload)).await {
                    return cause;
                }
                outcome.forwarded += 1;
            }
        }
    }
}

fn bootstrap_payload(snapshots: &dyn SnapshotStore, key: &LocationKey) -> Option<Bootstrap> {
    let reading = match snapshots.latest(key) {
        Ok(Some(reading)) => reading,
        Ok(None) => {
            debug!(location = %key, "no snapshot yet");
            return None;
        }
        Err(e) => {
            warn!(location = %key, error = %e, "snapshot lookup failed, skipping bootstrap");
            return None;
        }
    };
    match ServerMessage::WeatherUpdate(reading.as_ref().clone()).to_json() {
        Ok(json) => Some(Bootstrap {
            payload: Arc::new(json),
            timestamp: reading.timestamp,
        }),
        Err(e) => {
            warn!(location = %key, error = %e, "failed to encode bootstrap reading");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::errors::GatewayError;
    use crate::gateway::{LocalGateway, PublishOutcome};
    use crate::registry::GroupRegistry;
    use crate::session::collaborators::StaticDirectory;
    use crate::session::state::{CLOSE_GOING_AWAY, CLOSE_NO_LOCATION, CLOSE_POLICY_VIOLATION};
    use crate::snapshot::MemorySnapshotStore;
    use crate::snapshot::test_support::reading;
    use skycast_core::Reading;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(String),
        Ping,
        Close(u16),
    }

    struct ScriptedTransport {
        inbound: mpsc::UnboundedReceiver<Result<ClientFrame, TransportError>>,
        outbound: mpsc::UnboundedSender<Sent>,
        fail_sends: bool,
    }

    impl ScriptedTransport {
        fn record(&self, sent: Sent) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError("broken pipe".into()));
            }
            let _ = self.outbound.send(sent);
            Ok(())
        }
    }

    #[async_trait]
    impl ClientTransport for ScriptedTransport {
        async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>> {
            self.inbound.recv().await
        }

        async fn send_text(&mut self, payload: Arc<String>) -> Result<(), TransportError> {
            self.record(Sent::Text(payload.to_string()))
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            self.record(Sent::Ping)
        }

        async fn close(&mut self, code: u16) -> Result<(), TransportError> {
            let _ = self.outbound.send(Sent::Close(code));
            Ok(())
        }
    }

    /// The test's side of the connection.
    struct Client {
        frames: mpsc::UnboundedSender<Result<ClientFrame, TransportError>>,
        sent: mpsc::UnboundedReceiver<Sent>,
    }

    impl Client {
        fn send(&self, frame: ClientFrame) {
            self.frames.send(Ok(frame)).unwrap();
        }

        async fn next(&mut self) -> Sent {
            tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
                .await
                .unwrap()
                .unwrap()
        }

        fn drain(&mut self) -> Vec<Sent> {
            let mut out = Vec::new();
            while let Ok(s) = self.sent.try_recv() {
                out.push(s);
            }
            out
        }
    }

    fn transport(fail_sends: bool) -> (ScriptedTransport, Client) {
        let (frames, inbound) = mpsc::unbounded_channel();
        let (outbound, sent) = mpsc::unbounded_channel();
        (
            ScriptedTransport {
                inbound,
                outbound,
                fail_sends,
            },
            Client { frames, sent },
        )
    }

    /// Counts membership calls on the way through.
    struct CountingGateway {
        inner: LocalGateway,
        joins: AtomicUsize,
        leaves: AtomicUsize,
    }

    #[async_trait]
    impl BroadcastGateway for CountingGateway {
        fn subscribe(
            &self,
            key: &LocationKey,
            connection: Arc<ClientConnection>,
        ) -> Result<(), GatewayError> {
            let _ = self.joins.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(key, connection)
        }

        fn unsubscribe(&self, key: &LocationKey, id: &ConnectionId) -> bool {
            let _ = self.leaves.fetch_add(1, Ordering::SeqCst);
            self.inner.unsubscribe(key, id)
        }

        async fn publish(
            &self,
            key: &LocationKey,
            payload: Arc<String>,
        ) -> Result<PublishOutcome, GatewayError> {
            self.inner.publish(key, payload).await
        }
    }

    struct Harness {
        registry: Arc<GroupRegistry>,
        gateway: Arc<CountingGateway>,
        snapshots: Arc<MemorySnapshotStore>,
        ctx: SessionContext,
    }

    fn harness() -> Harness {
        let registry = Arc::new(GroupRegistry::new());
        let gateway = Arc::new(CountingGateway {
            inner: LocalGateway::new(registry.clone()),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
        });
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let mut directory = StaticDirectory::default();
        directory.insert("tok-sita", "sita", LocationKey::from_name("Kathmandu").ok());
        directory.insert("tok-ram", "ram", None);
        let directory = Arc::new(directory);
        let ctx = SessionContext {
            authorizer: directory.clone(),
            resolver: directory,
            gateway: gateway.clone(),
            snapshots: snapshots.clone(),
            config: SessionConfig::default(),
            shutdown: CancellationToken::new(),
        };
        Harness {
            registry,
            gateway,
            snapshots,
            ctx,
        }
    }

    fn ktm() -> LocationKey {
        LocationKey::from_name("Kathmandu").unwrap()
    }

    /// Kathmandu reading taken `minutes` after the fixture timestamp.
    fn reading_at(temperature: f64, minutes: i64) -> Reading {
        let mut r = reading("Kathmandu, Nepal", temperature);
        r.timestamp += chrono::Duration::minutes(minutes);
        r
    }

    fn envelope_at(temperature: f64, minutes: i64) -> String {
        ServerMessage::WeatherUpdate(reading_at(temperature, minutes))
            .to_json()
            .unwrap()
    }

    fn envelope(temperature: f64) -> String {
        envelope_at(temperature, 0)
    }

    async fn wait_for_members(registry: &GroupRegistry, key: &LocationKey, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.members_of(key).len() != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn spawn_session(
        h: &Harness,
        credentials: Credentials,
        fail_sends: bool,
    ) -> (tokio::task::JoinHandle<SessionOutcome>, Client) {
        let (t, client) = transport(fail_sends);
        let ctx = h.ctx.clone();
        let handle = tokio::spawn(async move {
            run_session(ConnectionId::new(), t, credentials, &ctx).await
        });
        (handle, client)
    }

    #[tokio::test]
    async fn unauthenticated_is_rejected_with_policy_violation() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::anonymous(), false);
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.state, SessionState::Rejected(RejectReason::Unauthenticated));
        assert_eq!(
            outcome.history,
            [
                SessionState::Connecting,
                SessionState::Authorizing,
                SessionState::Rejected(RejectReason::Unauthenticated)
            ]
        );
        assert_eq!(client.drain(), [Sent::Close(CLOSE_POLICY_VIOLATION)]);
        assert_eq!(h.gateway.joins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_location_is_rejected_and_never_joins() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-ram"), false);
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.state, SessionState::Rejected(RejectReason::NoLocation));
        assert!(!outcome.history.contains(&SessionState::Active));
        assert_eq!(outcome.principal.as_deref(), Some("ram"));
        assert_eq!(client.drain(), [Sent::Close(CLOSE_NO_LOCATION)]);
        assert_eq!(h.gateway.joins.load(Ordering::SeqCst), 0);
        assert_eq!(h.registry.member_count(), 0);
    }

    #[tokio::test]
    async fn active_session_forwards_and_leaves_once() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        let payload = envelope(22.5);
        let _ = h.gateway.publish(&ktm(), Arc::new(payload.clone())).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(payload));

        client.send(ClientFrame::Close);
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.cause, Some(TerminationCause::ClientClosed));
        assert_eq!(outcome.forwarded, 1);
        assert!(!outcome.bootstrapped);
        assert_eq!(h.gateway.joins.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.leaves.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.group_count(), 0);
        assert_eq!(client.drain(), [Sent::Close(1000)]);
    }

    #[tokio::test]
    async fn client_payloads_are_ignored() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        client.send(ClientFrame::Payload);
        client.send(ClientFrame::Heartbeat);
        let payload = envelope(18.0);
        let _ = h.gateway.publish(&ktm(), Arc::new(payload.clone())).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(payload));

        drop(client.frames);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::ClientClosed));
    }

    #[tokio::test]
    async fn bootstrap_pushes_snapshot_before_any_publish() {
        let h = harness();
        h.snapshots
            .record(&ktm(), Arc::new(reading("Kathmandu, Nepal", 21.0)))
            .unwrap();

        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        assert_eq!(client.next().await, Sent::Text(envelope(21.0)));

        h.ctx.shutdown.cancel();
        let outcome = handle.await.unwrap();
        assert!(outcome.bootstrapped);
        assert_eq!(outcome.forwarded, 0);
    }

    #[tokio::test]
    async fn publish_identical_to_bootstrap_is_not_repeated() {
        let h = harness();
        h.snapshots
            .record(&ktm(), Arc::new(reading("Kathmandu, Nepal", 21.0)))
            .unwrap();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        assert_eq!(client.next().await, Sent::Text(envelope(21.0)));

        let _ = h.gateway.publish(&ktm(), Arc::new(envelope(21.0))).await.unwrap();
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope_at(23.0, 1))).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(envelope_at(23.0, 1)));

        h.ctx.shutdown.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.forwarded, 1);
    }

    #[tokio::test]
    async fn backlogged_older_readings_are_not_sent_after_bootstrap() {
        let h = harness();
        h.snapshots.record(&ktm(), Arc::new(reading_at(22.0, 2))).unwrap();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        assert_eq!(client.next().await, Sent::Text(envelope_at(22.0, 2)));

        // Published before the session joined but fanned out after it.
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope_at(21.0, 1))).await.unwrap();
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope_at(22.0, 2))).await.unwrap();
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope_at(24.0, 3))).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(envelope_at(24.0, 3)));

        // Once a newer reading went out, later publishes are forwarded as-is.
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope_at(25.0, 3))).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(envelope_at(25.0, 3)));

        h.ctx.shutdown.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.forwarded, 2);
        assert!(client.drain().iter().all(|s| matches!(s, Sent::Close(_))));
    }

    #[tokio::test]
    async fn readings_arrive_in_publish_order() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        let r1 = envelope(20.0);
        let r2 = envelope(24.0);
        let _ = h.gateway.publish(&ktm(), Arc::new(r1.clone())).await.unwrap();
        let _ = h.gateway.publish(&ktm(), Arc::new(r2.clone())).await.unwrap();
        assert_eq!(client.next().await, Sent::Text(r1));
        assert_eq!(client.next().await, Sent::Text(r2));

        h.ctx.shutdown.cancel();
        let _ = handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_going_away_after_leaving() {
        let h = harness();
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        h.ctx.shutdown.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::Shutdown));
        assert_eq!(client.drain(), [Sent::Close(CLOSE_GOING_AWAY)]);
        assert_eq!(h.registry.member_count(), 0);
        assert_eq!(h.gateway.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_terminates_session() {
        let h = harness();
        let (handle, _client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        let member = h.registry.members_of(&ktm()).pop().unwrap();
        assert_eq!(member.principal(), "sita");
        member.evict();
        member.evict();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::Evicted));
        assert_eq!(h.registry.member_count(), 0);
        assert_eq!(h.gateway.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_send_terminates_and_releases() {
        let h = harness();
        h.snapshots
            .record(&ktm(), Arc::new(reading("Kathmandu, Nepal", 21.0)))
            .unwrap();
        let (handle, _client) = spawn_session(&h, Credentials::bearer("tok-sita"), true);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::TransportError));
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(h.registry.member_count(), 0);
    }

    #[tokio::test]
    async fn transport_error_on_receive_terminates() {
        let h = harness();
        let (handle, client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;
        client.frames.send(Err(TransportError("reset".into()))).unwrap();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::TransportError));
    }

    #[tokio::test]
    async fn halted_registry_rejects_subscription() {
        let h = harness();
        h.registry.halt("test");
        let (handle, mut client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, SessionState::Rejected(RejectReason::Unavailable));
        assert_eq!(client.drain(), [Sent::Close(1013)]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let h = harness();
        let (t, mut client) = transport(false);
        let outcome = run_session(ConnectionId::new(), t, Credentials::bearer("tok-sita"), &h.ctx).await;

        assert_eq!(outcome.cause, Some(TerminationCause::HeartbeatTimeout));
        let sent = client.drain();
        assert_eq!(sent.iter().filter(|s| **s == Sent::Ping).count(), 3);
        assert_eq!(sent.last(), Some(&Sent::Close(1000)));
        assert_eq!(h.registry.member_count(), 0);
        drop(client.frames);
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_client_stays_connected() {
        let h = harness();
        let (handle, client) = spawn_session(&h, Credentials::bearer("tok-sita"), false);
        wait_for_members(&h.registry, &ktm(), 1).await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            client.send(ClientFrame::Heartbeat);
        }
        assert!(!handle.is_finished());

        h.ctx.shutdown.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::Shutdown));
    }

    /// Accepts writes but never completes them, like a client that stopped
    /// reading its socket.
    struct StalledTransport {
        outbound: mpsc::UnboundedSender<Sent>,
        close_stalls: bool,
    }

    #[async_trait]
    impl ClientTransport for StalledTransport {
        async fn recv(&mut self) -> Option<Result<ClientFrame, TransportError>> {
            std::future::pending().await
        }

        async fn send_text(&mut self, payload: Arc<String>) -> Result<(), TransportError> {
            let _ = self.outbound.send(Sent::Text(payload.to_string()));
            std::future::pending().await
        }

        async fn send_ping(&mut self) -> Result<(), TransportError> {
            let _ = self.outbound.send(Sent::Ping);
            std::future::pending().await
        }

        async fn close(&mut self, code: u16) -> Result<(), TransportError> {
            let _ = self.outbound.send(Sent::Close(code));
            if self.close_stalls {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn spawn_stalled(
        h: &Harness,
        close_stalls: bool,
    ) -> (tokio::task::JoinHandle<SessionOutcome>, mpsc::UnboundedReceiver<Sent>) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let t = StalledTransport {
            outbound,
            close_stalls,
        };
        let ctx = h.ctx.clone();
        let handle = tokio::spawn(async move {
            run_session(ConnectionId::new(), t, Credentials::bearer("tok-sita"), &ctx).await
        });
        (handle, sent)
    }

    async fn next_sent(sent: &mut mpsc::UnboundedReceiver<Sent>) -> Sent {
        tokio::time::timeout(Duration::from_secs(5), sent.recv())
            .await
            .unwrap()
            .unwrap()
    }

    /// Subscribe a stalled session and leave it blocked mid-write.
    async fn stall_on_forward(h: &Harness, sent: &mut mpsc::UnboundedReceiver<Sent>) {
        wait_for_members(&h.registry, &ktm(), 1).await;
        let _ = h.gateway.publish(&ktm(), Arc::new(envelope(20.0))).await.unwrap();
        assert_eq!(next_sent(sent).await, Sent::Text(envelope(20.0)));
    }

    #[tokio::test]
    async fn shutdown_interrupts_stalled_write() {
        let h = harness();
        let (handle, mut sent) = spawn_stalled(&h, false);
        stall_on_forward(&h, &mut sent).await;

        h.ctx.shutdown.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.cause, Some(TerminationCause::Shutdown));
        assert_eq!(outcome.forwarded, 0);
        assert_eq!(next_sent(&mut sent).await, Sent::Close(CLOSE_GOING_AWAY));
        assert_eq!(h.registry.member_count(), 0);
        assert_eq!(h.gateway.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_interrupts_stalled_write() {
        let h = harness();
        let (handle, mut sent) = spawn_stalled(&h, false);
        stall_on_forward(&h, &mut sent).await;

        h.registry.members_of(&ktm()).pop().unwrap().evict();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::Evicted));
        assert_eq!(next_sent(&mut sent).await, Sent::Close(1013));
        assert_eq!(h.registry.member_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_even_if_close_stalls() {
        let h = harness();
        let (handle, mut sent) = spawn_stalled(&h, true);
        stall_on_forward(&h, &mut sent).await;

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.cause, Some(TerminationCause::TransportError));
        assert_eq!(next_sent(&mut sent).await, Sent::Close(1000));
        assert_eq!(h.registry.member_count(), 0);
    }

    #[tokio::test]
    async fn stalled_bootstrap_yields_to_shutdown() {
        let h = harness();
        h.snapshots
            .record(&ktm(), Arc::new(reading("Kathmandu, Nepal", 21.0)))
            .unwrap();
        let (handle, mut sent) = spawn_stalled(&h, false);
        assert_eq!(next_sent(&mut sent).await, Sent::Text(envelope(21.0)));

        h.ctx.shutdown.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.cause, Some(TerminationCause::Shutdown));
        assert!(!outcome.bootstrapped);
    }

    #[test]
    fn active_gauge_falls_when_guard_drops() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let first = ActiveGauge::enter();
            let second = ActiveGauge::enter();
            drop(first);
            // an aborted session task drops its guard the same way
            drop(second);
            let _third = ActiveGauge::enter();
        });
        assert!(handle.render().contains("ws_connections_active 1"));
    }

    #[test]
    fn bootstrap_supersedes_same_or_older_readings() {
        let b = Bootstrap {
            payload: Arc::new(envelope_at(20.0, 5)),
            timestamp: reading_at(20.0, 5).timestamp,
        };
        assert!(b.supersedes(&envelope_at(20.0, 5)));
        assert!(b.supersedes(&envelope_at(19.0, 4)));
        assert!(!b.supersedes(&envelope_at(19.0, 6)));
        assert!(!b.supersedes("not json"));
    }
}
