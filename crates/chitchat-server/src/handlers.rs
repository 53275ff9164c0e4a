//! HTTP and WebSocket handlers for the ChitChat server.

use crate::config::Config;
use crate::error::ApiError;
use crate::identity::{AuthContext, HeaderIdentityProvider, IdentityProvider};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chitchat_core::{Gateway, MemoryBus};
use chitchat_protocol::{HistoryResponse, UsersResponse};
use chitchat_transport::WebSocketConnection;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// Sessions and queries.
    pub gateway: Gateway,
    /// Resolves the caller of each request.
    pub identity: Arc<dyn IdentityProvider>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state backed by an in-process bus.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(MemoryBus::with_config(config.bus_config()));
        Self {
            gateway: Gateway::new(bus, config.gateway_config()),
            identity: Arc::new(HeaderIdentityProvider::new(config.identity.clone())),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(&websocket_path, get(ws_handler))
        .route("/messages", get(messages_handler))
        .route("/users", get(users_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let state = Arc::new(AppState::new(config.clone()));
    let gateway = state.gateway.clone();

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("ChitChat server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(gateway))
    .await?;

    info!("ChitChat server stopped");
    Ok(())
}

/// Resolve on Ctrl-C after telling every session to close.
async fn shutdown_signal(gateway: Gateway) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    if let Err(e) = gateway.shutdown() {
        error!("Failed to broadcast shutdown: {}", e);
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Welcome to ChitChat!" }))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    remote: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state.gateway.open_session(&auth.channel, auth.identity)?;
    debug!(session = %session.id(), channel = %session.channel(), "Upgrading connection");

    Ok(ws.on_upgrade(move |socket| async move {
        let _metrics_guard = ConnectionMetricsGuard::new();
        let mut conn = WebSocketConnection::new(socket);
        if let Some(ConnectInfo(addr)) = remote {
            conn = conn.with_remote_addr(addr);
        }
        let reason = session.run(conn).await;
        metrics::record_close(&reason);
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start_time: Option<String>,
}

/// Parse a unix-seconds timestamp. Absent or empty means no lower bound.
fn parse_start_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let seconds: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid start_time: {raw}")))?;
    DateTime::from_timestamp(seconds, 0)
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest(format!("start_time out of range: {raw}")))
}

/// Channel history handler.
async fn messages_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let since = parse_start_time(params.start_time.as_deref())?;
    let start = Instant::now();
    let messages = state.gateway.fetch_history(&auth.channel, since).await?;
    metrics::record_query("history", start.elapsed().as_secs_f64());
    Ok(Json(HistoryResponse { messages }))
}

/// Channel roster handler.
async fn users_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<UsersResponse>, ApiError> {
    let start = Instant::now();
    let users = state.gateway.list_present_users(&auth.channel).await?;
    metrics::record_query("users", start.elapsed().as_secs_f64());
    Ok(Json(UsersResponse { users }))
}
