use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path,
    },
    response::{IntoResponse, Response},
};
use disparador_core::ChangeStream;
use disparador_dispatch::{Actor, DispatchService};
use futures_util::{SinkExt, StreamExt};
use tracing;
use uuid::Uuid;

use crate::errors::ApiError;

/// Access is checked before the upgrade so a refused observer gets a plain HTTP error.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(service): Extension<DispatchService>,
    Extension(actor): Extension<Actor>,
    Path(dispatch_id): Path<Uuid>,
) -> Response {
    let changes = match service.changes(&actor, dispatch_id).await {
        Ok(changes) => changes,
        Err(e) => return ApiError(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, actor, dispatch_id, changes))
}

async fn handle_socket(socket: WebSocket, actor: Actor, dispatch_id: Uuid, mut changes: ChangeStream) {
    tracing::info!(
        "WebSocket connection established for user {} on dispatch {}",
        actor.user_id,
        dispatch_id
    );

    let (mut sender, mut receiver) = socket.split();

    // Forward row changes to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            let payload = match serde_json::to_string(&change) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("Failed to serialize change event: {}", e);
                    continue;
                }
            };

            if let Err(e) = sender.send(Message::Text(payload)).await {
                tracing::debug!("Failed to send WebSocket message: {}", e);
                return;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears the other one down
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(
        "WebSocket connection closed for user {} on dispatch {}",
        actor.user_id,
        dispatch_id
    );
}
