//! HTTP router for the classpoll server.
//!
//! Clients drive the session over the WebSocket at `/ws`. The read-only
//! HTTP endpoints expose the same state for dashboards and health checks.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket upgrade
//! - `GET /health` - Liveness check
//! - `GET /api/results` - Results of the current poll, or `null`
//! - `GET /api/history` - Archived polls
//! - `GET /api/roster` - Connected students
//! - `GET /api/chat` - Chat log
//!
//! # Example
//!
//! ```no_run
//! use classpoll_session::{create_router, AppState, Config};
//!
//! # async fn example() {
//! let router = create_router(AppState::new(Config::default()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::chat::{ChatLog, ChatMessage};
use crate::config::Config;
use crate::session::{HistoryEntry, PollResults, PollSession, RosterEntry};
use crate::timer::PollTimer;
use crate::websocket::{ws_handler, ConnectionRegistry, EventBroadcaster};

/// Message returned by the health endpoint.
pub const HEALTH_MESSAGE: &str = "Live polling server is running";

// ============================================================================
// Response Types
// ============================================================================

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Human-readable status.
    pub message: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for HTTP handlers and WebSocket connections.
///
/// Holds one classroom session. Poll state and chat are behind separate
/// locks; when both are needed the session lock is taken first.
#[derive(Debug)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Poll, roster and history state.
    pub session: Arc<Mutex<PollSession>>,
    /// Chat log.
    pub chat: Arc<Mutex<ChatLog>>,
    /// Fan-out of events to every connected client.
    pub broadcaster: EventBroadcaster,
    /// Direct channels to individual connections.
    pub connections: ConnectionRegistry,
    /// Countdown of the current poll.
    pub timer: PollTimer,
}

impl AppState {
    /// Creates a fresh session state from the configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let session = PollSession::with_default_time_limit(config.default_time_limit);
        let chat = ChatLog::new(config.max_chat_messages);
        let broadcaster = EventBroadcaster::new(config.broadcast_capacity);
        let timer = PollTimer::new(config.tick_interval());

        Self {
            config,
            session: Arc::new(Mutex::new(session)),
            chat: Arc::new(Mutex::new(chat)),
            broadcaster,
            connections: ConnectionRegistry::new(),
            timer,
        }
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Builds the CORS layer, restricted to `frontend_url` when configured.
fn cors_layer(config: &Config) -> CorsLayer {
    let origin = match config.frontend_url.as_deref() {
        Some(url) => match HeaderValue::from_str(url) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!(frontend_url = %url, "Invalid frontendUrl, allowing any origin: {}", e);
                AllowOrigin::any()
            }
        },
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Creates the router with the WebSocket endpoint and all HTTP routes.
///
/// # Returns
///
/// An axum `Router` configured with:
/// - `/ws` and `/health`
/// - Read-only routes under `/api`
/// - CORS middleware for the browser frontend
/// - Tracing middleware for request logging
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let api_routes = Router::new()
        .route("/results", get(handle_results))
        .route("/history", get(handle_history))
        .route("/roster", get(handle_roster))
        .route("/chat", get(handle_chat));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handle_health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: HEALTH_MESSAGE.to_string(),
    })
}

/// Handler for `GET /api/results`.
async fn handle_results(State(state): State<Arc<AppState>>) -> Json<Option<PollResults>> {
    Json(state.session.lock().await.results())
}

/// Handler for `GET /api/history`.
async fn handle_history(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryEntry>> {
    Json(state.session.lock().await.history().to_vec())
}

/// Handler for `GET /api/roster`.
async fn handle_roster(State(state): State<Arc<AppState>>) -> Json<Vec<RosterEntry>> {
    Json(state.session.lock().await.roster())
}

/// Handler for `GET /api/chat`.
async fn handle_chat(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    Json(state.chat.lock().await.messages())
}

// ============================================================================
// Tests
// ============================================================================
