//! # parley-gateway
//!
//! Real-time WebSocket gateway for Parley. Handles:
//! - Presence: user ↔ connection registry, online-users fan-out
//! - Chat: global broadcast and private 1:1 delivery with read-state
//! - Call signaling: offer/answer/ICE relay between exactly two parties
//! - Disconnect reconciliation
//!
//! The gateway is content-blind for call payloads: SDP and candidates pass
//! through as opaque JSON. All state lives in the [`Coordinator`]; this
//! module is only the transport shell around it.

pub mod calls;
pub mod coordinator;
pub mod events;
pub mod registry;
pub mod store;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use coordinator::Coordinator;
use events::{ClientEvent, Target};
use store::Store;

/// Gateway state shared by every connection.
#[derive(Clone)]
pub struct GatewayState {
    pub coordinator: Arc<Coordinator>,
}

impl GatewayState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(store)),
        }
    }
}

/// Build the gateway WebSocket router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(ws_handler))
        .with_state(Arc::new(state))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();

    // The connection handle: minted here, lives exactly as long as this
    // socket, never reused.
    let conn = Uuid::new_v4();

    // Subscribe BEFORE processing any inbound event so this connection
    // cannot miss a presence snapshot triggered by its own registration.
    let mut outbound_rx = state.coordinator.subscribe();

    tracing::debug!(conn = %conn, "gateway connection opened");

    // ── Sender task ──────────────────────────────────────────────────────────
    // Forwards events addressed to everyone or to this connection onto the
    // single WebSocket sender.
    let send_task = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(outbound) => {
                    let mine = match outbound.target {
                        Target::All => true,
                        Target::Conn(target) => target == conn,
                    };
                    if !mine {
                        continue;
                    }

                    let frame = match serde_json::to_string(&outbound.event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(conn = %conn, error = %e, "failed to encode frame");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                // Dropped behind on a fan-out burst: skip to the live edge.
                // The next presence publish resynchronizes the client.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn = %conn, skipped, "outbound stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Receive loop ─────────────────────────────────────────────────────────
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        // Malformed frame: reject the single event, keep the
                        // connection alive.
                        tracing::warn!(conn = %conn, error = %e, "ignoring malformed frame");
                        continue;
                    }
                };
                state.coordinator.handle_event(conn, event).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────
    state.coordinator.handle_disconnect(conn).await;
    send_task.abort();
    tracing::debug!(conn = %conn, "gateway connection closed");
}
