//! HTTP/WebSocket entry points for the Banter server.
//!
//! Three WebSocket routes map onto the three session kinds: a named room, a
//! private conversation with a counterpart, and the caller's own notification
//! feed. Identity is resolved before the upgrade; anonymous connections are
//! refused with no payload exchanged.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use banter_core::{FanoutBroker, GroupRegistry, PresenceTracker};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{extract_token, IdentityProvider, TokenIdentity};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::notify::NotificationRouter;
use crate::session::{Session, SessionKind};
use crate::store::{MemoryStore, Store};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Ephemeral group membership.
    pub registry: Arc<GroupRegistry>,
    /// Fan-out dispatch.
    pub broker: Arc<FanoutBroker>,
    /// Who is online.
    pub presence: Arc<PresenceTracker>,
    /// Durable message history and social graph.
    pub store: Arc<dyn Store>,
    /// Identity resolution.
    pub identity: Arc<dyn IdentityProvider>,
    /// Per-user notification feeds.
    pub notifier: NotificationRouter,
}

impl AppState {
    /// Create new app state over a store and identity provider.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>, identity: Arc<dyn IdentityProvider>) -> Self {
        let registry = Arc::new(GroupRegistry::new());
        let broker = Arc::new(FanoutBroker::new(registry.clone()));
        let presence = Arc::new(PresenceTracker::new());
        let notifier = NotificationRouter::new(broker.clone(), presence.clone(), store.clone());

        Self {
            config,
            registry,
            broker,
            presence,
            store,
            identity,
            notifier,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let identity: Arc<dyn IdentityProvider> = Arc::new(TokenIdentity);
    let state = Arc::new(AppState::new(config.clone(), store, identity));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route("/ws/room/:room", get(room_ws))
        .route("/ws/private/:peer", get(private_ws))
        .route("/ws/notifications", get(notifications_ws))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Banter server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade for a chat room.
async fn room_ws(
    Path(room): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    admit(ws, state, &headers, &query, SessionKind::Room { room }).await
}

/// WebSocket upgrade for a private conversation.
async fn private_ws(
    Path(peer): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    admit(ws, state, &headers, &query, SessionKind::Private { peer }).await
}

/// WebSocket upgrade for the caller's notification feed.
async fn notifications_ws(
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    admit(ws, state, &headers, &query, SessionKind::Notifications).await
}

/// Resolve identity and upgrade, or refuse the connection.
async fn admit(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    kind: SessionKind,
) -> Response {
    let token = extract_token(headers, query);
    let Some(user) = state.identity.authenticate(token.as_deref()).await else {
        // Admission refusal, not a system fault
        debug!("Refusing unauthenticated connection");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| handle_session(socket, state, user, kind))
        .into_response()
}

/// Drive one admitted connection to completion.
async fn handle_session(socket: WebSocket, state: Arc<AppState>, user: String, kind: SessionKind) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut session, outbound) = Session::new(user, kind, state);
    debug!(connection = %session.id(), user = %session.user(), "WebSocket connected");

    match session.activate().await {
        Ok(()) => session.run(socket, outbound).await,
        Err(e) => {
            warn!(connection = %session.id(), error = %e, "Session activation failed");
            session.close().await;
        }
    }
}
