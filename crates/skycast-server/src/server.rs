//! `SkycastServer`: axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use skycast_core::ConnectionId;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::gateway::BroadcastGateway;
use crate::health::{self, HealthResponse};
use crate::registry::GroupRegistry;
use crate::session::{Authorizer, Credentials, LocationResolver, SessionContext, run_session};
use crate::shutdown::ShutdownCoordinator;
use crate::snapshot::SnapshotStore;
use crate::websocket::transport::AxumTransport;

/// Collaborators the server is assembled from.
pub struct ServerParts {
    /// Shared group registry.
    pub registry: Arc<GroupRegistry>,
    /// Gateway sessions subscribe through.
    pub gateway: Arc<dyn BroadcastGateway>,
    /// Last-known readings for bootstrap.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Credential check.
    pub authorizer: Arc<dyn Authorizer>,
    /// Principal → location lookup.
    pub resolver: Arc<dyn LocationResolver>,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Context handed to every session.
    pub sessions: SessionContext,
    /// Registry, for health reporting.
    pub registry: Arc<GroupRegistry>,
    /// Shutdown coordinator; session tasks are tracked here.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Open WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    /// Connection limit.
    pub max_connections: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The skycast server.
pub struct SkycastServer {
    config: ServerConfig,
    state: AppState,
}

impl SkycastServer {
    /// Assemble a server from its collaborators.
    pub fn new(config: ServerConfig, parts: ServerParts) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let sessions = SessionContext {
            authorizer: parts.authorizer,
            resolver: parts.resolver,
            gateway: parts.gateway,
            snapshots: parts.snapshots,
            config: config.session_config(),
            shutdown: shutdown.token(),
        };
        let state = AppState {
            sessions,
            registry: parts.registry,
            shutdown,
            connections: Arc::new(AtomicUsize::new(0)),
            max_connections: config.max_connections,
            start_time: Instant::now(),
            metrics: None,
        };
        Self { config, state }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task,
    /// which finishes once the shutdown token is cancelled.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "skycast server listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server terminated");
            }
        });
        Ok((local, handle))
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The group registry.
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.state.registry
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }
}

/// One unit of the connection limit, returned on drop.
struct ConnectionSlot {
    counter: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn try_acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                counter: counter.clone(),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// The `Authorization: Bearer` header wins over `?token=`.
fn extract_credentials(headers: &HeaderMap, query_token: Option<String>) -> Credentials {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let token = bearer.or_else(|| query_token.filter(|t| !t.is_empty()));
    Credentials { token }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(slot) = ConnectionSlot::try_acquire(&state.connections, state.max_connections) else {
        warn!(max = state.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    let credentials = extract_credentials(&headers, query.token);

    ws.on_upgrade(move |socket| async move {
        let ctx = state.sessions.clone();
        let task = tokio::spawn(async move {
            let _slot = slot;
            let outcome =
                run_session(ConnectionId::new(), AxumTransport::new(socket), credentials, &ctx)
                    .await;
            debug!(conn_id = %outcome.id, state = %outcome.state, "session finished");
        });
        state.shutdown.track(task);
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Acquire),
        state.registry.group_count(),
        state.registry.is_halted(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
