//! Server backend for the real-time collaborative text-editing engine.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};

use crate::auth::{ConnectQuery, OpaqueTokenAuthenticator, TokenAuthenticator, extract_token};
use crate::error::CoreError;
use crate::event_bus::{EventBus, NoopEventBus};
use crate::id_gen::{DefaultIdGenerator, IdGenerator};
use crate::ot::engine::CollaborationEngine;
use crate::protocol::{OutboundFrame, RawInboundFrame, WsCommand};
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::session::SessionFabric;
use crate::snapshot_store::{InMemorySnapshotStore, SnapshotStore};

pub mod auth;
pub mod error;
pub mod event_bus;
pub mod id_gen;
pub mod ot;
pub mod protocol;
pub mod rate_limiter;
pub mod session;
pub mod snapshot_store;
pub mod util;

/// Editors idle longer than this are pruned by the background cleaner.
const DEFAULT_EDITOR_EXPIRY: Duration = Duration::from_secs(3600 * 24);
const CLEANER_INTERVAL: Duration = Duration::from_secs(3600);

/// Server configuration. Everything outside the OT engine / session fabric
/// core is specified only by interface (`EventBus`, `TokenAuthenticator`,
/// `IdGenerator`); this struct wires in the defaults that let the crate run
/// standalone.
pub struct ServerConfig {
    pub editor_expiry: Duration,
    pub rate_limiter: RateLimiterConfig,
    pub cursor_broadcast_interval: Duration,
    pub authenticator: Arc<dyn TokenAuthenticator>,
    pub event_bus: Arc<dyn EventBus>,
    pub id_gen: Arc<dyn IdGenerator>,
    pub snapshot_store: Arc<dyn SnapshotStore>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            editor_expiry: DEFAULT_EDITOR_EXPIRY,
            rate_limiter: RateLimiterConfig::default(),
            cursor_broadcast_interval: Duration::from_millis(crate::ot::engine::CURSOR_BROADCAST_DEFAULT_MS),
            authenticator: Arc::new(OpaqueTokenAuthenticator),
            event_bus: Arc::new(NoopEventBus),
            id_gen: Arc::new(DefaultIdGenerator),
            snapshot_store: Arc::new(InMemorySnapshotStore::default()),
        }
    }
}

impl ServerConfig {
    /// Loads `EXPIRY_DAYS` from the environment (default 1), leaving the
    /// auth/event-bus/id-gen collaborators at their standalone defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let expiry_days: u32 = std::env::var("EXPIRY_DAYS")
            .unwrap_or_else(|_| String::from("1"))
            .parse()?;
        Ok(Self {
            editor_expiry: Duration::from_secs(3600 * 24 * expiry_days as u64),
            ..Self::default()
        })
    }
}

/// Statistics returned from `/stats`.
#[derive(Serialize)]
struct Stats {
    start_time: u64,
    num_editors: usize,
}

/// The shared state of the server, accessible from within request handlers.
#[derive(Clone)]
pub struct ServerState {
    fabric: Arc<SessionFabric>,
    engine: Arc<CollaborationEngine>,
    authenticator: Arc<dyn TokenAuthenticator>,
    snapshot_store: Arc<dyn SnapshotStore>,
    editor_expiry: Duration,
    start_time: u64,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let engine = Arc::new(CollaborationEngine::with_cursor_broadcast_interval(
            config.event_bus.clone(),
            config.id_gen.clone(),
            config.cursor_broadcast_interval,
        ));
        let fabric = Arc::new(SessionFabric::new(
            engine.clone(),
            RateLimiter::new(config.rate_limiter),
            config.id_gen.clone(),
        ));
        let start_time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime returned before UNIX_EPOCH")
            .as_secs();

        Arc::new(Self {
            fabric,
            engine,
            authenticator: config.authenticator,
            snapshot_store: config.snapshot_store,
            editor_expiry: config.editor_expiry,
            start_time,
        })
    }

    /// Spawns the heartbeat tick and the idle-editor cleaner as background
    /// tasks. The caller owns the returned handles and should abort them on
    /// shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let heartbeat = self.fabric.clone().spawn_heartbeat();
        let cleaner = tokio::spawn(cleaner(self.clone()));
        (heartbeat, cleaner)
    }

    /// Closes every transport with code 1000 "Server shutdown" and clears
    /// every registry and rate-limit bucket.
    pub async fn shutdown(&self) {
        self.fabric.shutdown().await;
    }
}

/// A combined router handling the WebSocket upgrade and the health/stats
/// endpoints.
pub fn server(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .route("/socket", get(socket_handler))
        .with_state(state)
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn stats_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    axum::Json(Stats {
        start_time: state.start_time,
        num_editors: state.engine.editor_count(),
    })
}

/// Handler for the `/socket` upgrade endpoint (§6).
async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Response {
    let token = match extract_token(&query, &headers) {
        Some(t) => t,
        None => {
            return (StatusCode::UNAUTHORIZED, "missing authentication token").into_response();
        }
    };
    let user_id = match state.authenticator.authenticate(&token) {
        Ok(id) => id,
        Err(CoreError::WebSocketAuthentication(reason)) => {
            return (StatusCode::UNAUTHORIZED, reason).into_response();
        }
        Err(_) => return (StatusCode::UNAUTHORIZED, "authentication failed").into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, user_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsCommand>();
    let session_id = state.fabric.register_client(user_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                WsCommand::Send(frame) => {
                    let text = serde_json::to_string(&frame).expect("OutboundFrame always serializes");
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                WsCommand::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id, error = %e, "transport read error");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<RawInboundFrame>(&text) {
                Ok(raw) => {
                    if let Err(e) = state.fabric.handle_frame(&session_id, raw).await {
                        info!(session_id, error = %e, "dropped frame");
                    }
                }
                Err(e) => info!(session_id, error = %e, "dropped unparseable frame"),
            },
            Message::Pong(_) => state.fabric.registry().mark_alive(&session_id),
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }

    writer.abort();
    state.fabric.unregister_client(&session_id, 1000, "client disconnected").await;
}

async fn cleaner(state: Arc<ServerState>) {
    loop {
        time::sleep(CLEANER_INTERVAL).await;
        let idle = state.engine.idle_editor_ids(state.editor_expiry).await;
        for editor_id in &idle {
            match state.engine.create_snapshot(editor_id, "cleaner").await {
                Ok(snapshot) => {
                    if let Err(e) = state.snapshot_store.store(editor_id, &snapshot).await {
                        warn!(editor_id, error = %e, "failed to persist snapshot before eviction");
                    }
                }
                Err(e) => warn!(editor_id, error = %e, "failed to snapshot idle editor"),
            }
        }
        let removed = state.engine.prune_idle(state.editor_expiry).await;
        if !removed.is_empty() {
            info!(?removed, "cleaner removed idle editors");
        }
    }
}
