//! Status push channel.
//!
//! Flow:
//! 1. Client connects to `/ws` and is attached as a status subscriber
//! 2. Gateway sends the current status immediately
//! 3. Every broadcast from the gate is forwarded until either side closes
//!
//! Inbound frames are ignored apart from close.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::broadcast::Subscription;
use crate::state::AppState;

/// GET /ws — upgrade to WebSocket.
pub async fn status_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let Subscription { id, mut rx } = state.subscribers.attach();
    tracing::info!(subscriber = id, "status subscriber connected");

    let greeting = state.publisher.current_message();

    // Writer task: current status first, then every broadcast.
    let mut writer = tokio::spawn(async move {
        if let Some(msg) = greeting {
            if ws_sink.send(Message::Text(msg.to_string())).await.is_err() {
                return;
            }
        }
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(Message::Text(msg.to_string())).await.is_err() {
                break;
            }
        }
    });

    // Counts changed for everybody else.
    state.publisher.publish();

    let reader = async {
        while let Some(Ok(msg)) = ws_stream.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        _ = reader => writer.abort(),
        _ = &mut writer => {}
    }

    state.subscribers.detach(id);
    state.publisher.publish();
    tracing::info!(subscriber = id, "status subscriber disconnected");
}
