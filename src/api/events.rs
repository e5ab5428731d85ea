//! WebSocket stream of readings and warnings delivered to the top tier

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};

use super::{ApiResult, ApiState};
use crate::Error;
use crate::events::{EventHub, Subscription};

/// Build event stream router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/events", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let hub = state
        .manager
        .hub()
        .cloned()
        .ok_or_else(|| Error::NotFound("this tier has no event stream".to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub)))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, hub: EventHub) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription: Subscription = hub.subscribe("websocket");
    let subscriber_id = subscription.id();
    tracing::info!(subscriber_id = %subscriber_id, "event stream connected");

    let mut broadcast_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
        }
    });

    // Incoming frames are ignored apart from close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut broadcast_task => recv_task.abort(),
        _ = &mut recv_task => broadcast_task.abort(),
    }

    tracing::info!(subscriber_id = %subscriber_id, "event stream disconnected");
}
