//! Subscriber transport
//!
//! Serves the WebSocket endpoint at `/ws`, the `/health` probe, and
//! two read-only REST conveniences for tooling that does not speak
//! WebSocket. Any origin is accepted.

pub mod hub;
pub mod messages;

pub use hub::{Hub, Subscriber, SUBSCRIBER_QUEUE_CAPACITY};
pub use messages::{Command, OutboundMessage};

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::capture::{CaptureStats, StatsSnapshot};
use crate::conversation::ConversationTracker;
use crate::core::{Conversation, ConversationSummary};

/// Shared state behind the HTTP/WS routes
pub struct ServerState {
    pub hub: Arc<Hub>,
    pub tracker: Arc<ConversationTracker>,
    pub stats: Arc<CaptureStats>,
}

/// Build the daemon's router
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/conversations", get(conversations_handler))
        .route("/api/conversations/summary", get(summaries_handler))
        .layer(cors)
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection loop: forward the subscriber queue to the socket
/// and feed inbound frames to the hub as commands.
async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let Subscriber { id, mut rx } = state.hub.subscribe();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed by the hub: say goodbye
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => state.hub.handle_command(id, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        debug!(id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(id);
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    clients: usize,
    capture_stats: StatsSnapshot,
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        clients: state.hub.client_count(),
        capture_stats: state.stats.snapshot(),
    })
}

async fn conversations_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<Conversation>> {
    Json(state.tracker.active())
}

async fn summaries_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<Vec<ConversationSummary>> {
    Json(state.tracker.summaries())
}
