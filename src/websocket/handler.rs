//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and hands the socket to a [`Session`].

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::StreamExt;
use std::sync::Arc;

use super::gateway::MessageGateway;
use super::session::{Session, SessionConfig};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// Frames larger than the configured limit are refused by the transport
/// before they reach the session.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let gateway = Arc::clone(&state.gateway);
    let config = state.session_config.clone();

    ws.max_message_size(config.max_frame_bytes)
        .max_frame_size(config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, gateway, config))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, gateway: Arc<MessageGateway>, config: SessionConfig) {
    let (sender, receiver) = socket.split();
    let session = Session::new(gateway, config);
    let id = session.id();

    tracing::debug!(connection_id = %id, "Session started");
    session.run(sender, receiver).await;
    tracing::debug!(connection_id = %id, "Session ended");
}
