//! The phone ingress channel: accepts one upstream phone camera connection at a time, decodes
//! each uploaded JPEG frame, and pushes it into the currently attached [`crate::source::PhoneSource`].
//!
//! Mirrors `api::ws`'s handshake/select-loop shape, generalized to single-upstream eviction
//! instead of multi-subscriber fan-out: a newly connecting phone cancels whichever phone
//! connection (if any) is already active, closing it before the new one starts receiving.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::AppState;
use crate::events::{EventEmitter, PhoneEvent};
use crate::protocol_constants::PHONE_THROTTLE_FACTOR;
use crate::utils::now_millis;

/// Only one phone upload connection is served at a time. Connecting replaces whichever
/// `(id, token)` pair is currently active and cancels its token; the identifier lets the
/// evicted connection's own cleanup tell whether it is still the active one or was already
/// replaced, without requiring `CancellationToken` to be comparable.
static ACTIVE_PHONE: Mutex<Option<(Uuid, CancellationToken)>> = Mutex::new(None);

/// Inbound frame payload uploaded by the phone app.
#[derive(Debug, Deserialize)]
struct PhoneFrame {
    frame: String,
}

pub async fn ws_phone_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let my_id = Uuid::new_v4();
    let my_token = CancellationToken::new();
    let evicted_previous = ACTIVE_PHONE
        .lock()
        .replace((my_id, my_token.clone()))
        .is_some();
    if evicted_previous {
        log::info!("[PhoneIngress] kicked previous phone connection for new connection");
    }
    state
        .event_bridge
        .emit_phone(PhoneEvent::Connected { timestamp: now_millis() });

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(state.config.target_fps.max(1)));
    let mut last_frame_at: Option<Instant> = None;
    let mut frames_received: u64 = 0;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = my_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                state.event_bridge.emit_phone(PhoneEvent::Evicted { timestamp: now_millis() });
                return;
            }
            msg = stream.next() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        handle_frame_message(
                            &text,
                            &mut sink,
                            &state,
                            frame_interval,
                            &mut last_frame_at,
                            &mut frames_received,
                        )
                        .await;
                    }
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    // Only clear the active slot if we weren't already replaced by a newer connection; a
    // connection that was evicted returns from the `cancelled()` branch above instead.
    let mut active = ACTIVE_PHONE.lock();
    if active.as_ref().is_some_and(|(id, _)| *id == my_id) {
        *active = None;
    }
    drop(active);

    state.manager.notify_camera_disconnected().await;
}

/// Parses, throttles, decodes, and injects a single uploaded JSON frame message, sending any
/// feedback the phone should act on.
async fn handle_frame_message(
    text: &str,
    sink: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    frame_interval: Duration,
    last_frame_at: &mut Option<Instant>,
    frames_received: &mut u64,
) {
    let Ok(payload) = serde_json::from_str::<PhoneFrame>(text) else {
        return;
    };

    let now = Instant::now();
    if let Some(last) = *last_frame_at {
        if now.duration_since(last) < frame_interval.mul_f64(PHONE_THROTTLE_FACTOR) {
            let wait_ms = frame_interval.as_millis() as u64;
            let _ = sink
                .send(Message::Text(
                    json!({"status": "throttle", "wait_ms": wait_ms})
                        .to_string()
                        .into(),
                ))
                .await;
            state.event_bridge.emit_phone(PhoneEvent::Throttled {
                wait_ms,
                timestamp: now_millis(),
            });
            return;
        }
    }
    *last_frame_at = Some(now);

    let Ok(jpeg) = base64::engine::general_purpose::STANDARD.decode(payload.frame) else {
        return;
    };
    let Ok(decoded) = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg) else {
        return;
    };
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let pixels = bytes::Bytes::from(rgb.into_raw());

    let Some(phone_source) = state.manager.phone_source().await else {
        return;
    };
    let accepted = phone_source.inject(pixels, width, height);
    state.manager.on_frame_received();
    *frames_received += 1;

    if !accepted {
        let wait_ms = (frame_interval.as_millis() as u64) * 2;
        let _ = sink
            .send(Message::Text(
                json!({"status": "slow_down", "wait_ms": wait_ms})
                    .to_string()
                    .into(),
            ))
            .await;
        state.event_bridge.emit_phone(PhoneEvent::SlowDown {
            wait_ms,
            timestamp: now_millis(),
        });
    }

    if *frames_received % 30 == 0 {
        log::debug!("[PhoneIngress] received {frames_received} frames (accepted={accepted})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_frame_parses_minimal_payload() {
        let parsed: PhoneFrame = serde_json::from_str(r#"{"frame":"aGVsbG8="}"#).unwrap();
        assert_eq!(parsed.frame, "aGVsbG8=");
    }
}
