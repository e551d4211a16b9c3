//! The subscriber channel: registers a connecting viewer, waits briefly for its handshake,
//! announces itself, then forwards whatever the viewer registry fans out until the socket
//! closes.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::AppState;
use crate::events::ViewerEvent;
use crate::utils::now_millis;
use crate::viewers::OutboundMessage;

/// Inbound handshake payload a connecting viewer may send within the handshake window.
#[derive(Debug, Deserialize, Default)]
struct HandshakeRequest {
    #[serde(default)]
    viewer_id: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let handshake = match tokio::time::timeout(
        state.config.handshake_timeout(),
        socket.next(),
    )
    .await
    {
        Ok(Some(Ok(Message::Text(text)))) => {
            serde_json::from_str::<HandshakeRequest>(&text).unwrap_or_default()
        }
        Ok(Some(Ok(_))) | Err(_) => HandshakeRequest::default(),
        Ok(Some(Err(_))) | Ok(None) => return,
    };

    let viewer_id = handshake
        .viewer_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let label = handshake.label.unwrap_or_else(|| "Unknown Device".to_string());
    let connected_at = now_millis() as f64 / 1000.0;

    let mut guard = state
        .viewer_registry
        .register(viewer_id.clone(), label.clone(), connected_at);
    let _ = crate::events::EventEmitter::emit_viewer(
        state.event_bridge.as_ref(),
        ViewerEvent::Connected {
            viewer_id: viewer_id.clone(),
            label,
            timestamp: now_millis(),
        },
    );

    let allowed = state.viewer_registry.is_allowed(&viewer_id);
    let announcement = json!({
        "type": "system",
        "status": "connected",
        "message": "connected",
        "viewer_id": viewer_id,
        "allowed": allowed,
    });
    let _ = state
        .viewer_registry
        .send_to(&viewer_id, OutboundMessage::Text(announcement.to_string()))
        .await;

    let (mut sink, mut stream) = socket.split();
    let cancel = guard.cancel.clone();

    let send_loop = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = guard.receiver.recv() => {
                    match msg {
                        Some(OutboundMessage::Text(text)) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(OutboundMessage::Binary(bytes)) => {
                            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    };

    let recv_loop = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break,
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = send_loop => {}
        _ = recv_loop => {}
    }

    let _ = crate::events::EventEmitter::emit_viewer(
        state.event_bridge.as_ref(),
        ViewerEvent::Disconnected {
            viewer_id,
            timestamp: now_millis(),
        },
    );
    // `guard` drops here, unregistering the viewer from the registry.
}
