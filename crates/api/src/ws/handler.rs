use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use docpipe_core::types::UserId;
use docpipe_events::{ConnectionRegistry, Frame};
use futures::{SinkExt, StreamExt};

use crate::middleware::identity::UserIdentity;
use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The caller's identity is resolved before the upgrade; the connection is
/// then registered under that user for the lifetime of the socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    caller: UserIdentity,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, caller.user_id, state.registry))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Close => Message::Close(None),
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// 1. Registers the connection with the registry.
/// 2. Spawns a sender task that forwards queued frames to the socket.
/// 3. Drains inbound messages on the current task (clients only send
///    pongs and close frames).
/// 4. Unregisters on disconnect.
async fn handle_socket(socket: WebSocket, user_id: UserId, registry: Arc<ConnectionRegistry>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "WebSocket connected");

    let mut rx = registry.connect(conn_id.clone(), user_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = frame == Frame::Close;
            if sink.send(to_message(frame)).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_msg) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    registry.unregister(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "WebSocket disconnected");
}
