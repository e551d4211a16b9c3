//! Composition root: wires the inference client, worker, source manager, viewer registry,
//! and event bridge into one running set of services.
//!
//! Grounded on the host project's `bootstrap_services`/`BootstrappedServices` composition-root
//! pattern: a single fallible constructor that returns an owning bundle plus a `shutdown()` that
//! tears the bundle back down in the right order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{LocalIpDetector, NetworkContext};
use crate::error::CoreResult;
use crate::events::BroadcastEventBridge;
use crate::inference::{HttpInferenceClient, InferenceClient, InferenceWorker};
use crate::manager::SourceManager;
use crate::runtime::TokioSpawner;
use crate::scheduler::{EnhancedEmission, RawEmission};
use crate::viewers::ViewerRegistry;

/// The fully wired set of long-lived services for one process.
pub struct BootstrappedServices {
    pub manager: Arc<SourceManager>,
    pub worker: Arc<InferenceWorker>,
    pub viewer_registry: Arc<ViewerRegistry>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub network: NetworkContext,
    pub raw_tx: broadcast::Sender<RawEmission>,
    pub enhanced_tx: broadcast::Sender<EnhancedEmission>,
    pub spawner: TokioSpawner,
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Cancels every long-lived task and closes all viewer connections. Safe to call once;
    /// subsequent calls are no-ops since the token is already cancelled.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.viewer_registry.close_all();
        self.worker.stop();
    }
}

/// Spawns the fan-out task bridging the raw/enhanced frame broadcasts to the viewer registry
/// as the wire-shaped JSON payloads described by the external interface.
fn spawn_fanout(
    mut raw_rx: broadcast::Receiver<RawEmission>,
    mut enhanced_rx: broadcast::Receiver<EnhancedEmission>,
    registry: Arc<ViewerRegistry>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                raw = raw_rx.recv() => {
                    match raw {
                        Ok(emission) => {
                            match emission.frame.to_jpeg(crate::protocol_constants::RAW_STREAM_JPEG_QUALITY) {
                                Ok(jpeg) => {
                                    let payload = serde_json::json!({
                                        "type": "RAW_FRAME",
                                        "frame_id": emission.frame.frame_id,
                                        "timestamp": emission.frame.source_ts,
                                        "image": base64::Engine::encode(
                                            &base64::engine::general_purpose::STANDARD,
                                            &jpeg,
                                        ),
                                        "resolution": [emission.frame.height, emission.frame.width],
                                    });
                                    registry
                                        .broadcast(crate::viewers::OutboundMessage::Text(payload.to_string()))
                                        .await;
                                }
                                Err(e) => log::warn!("[Fanout] failed to encode raw frame as jpeg: {e}"),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                enhanced = enhanced_rx.recv() => {
                    match enhanced {
                        Ok(emission) => {
                            let payload = serde_json::json!({
                                "type": "data",
                                "status": "success",
                                "message": "inference result",
                                "payload": emission,
                            });
                            registry
                                .broadcast(crate::viewers::OutboundMessage::Text(payload.to_string()))
                                .await;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });
}

/// Subscribes to the domain event bus and broadcasts the one-time `{type:"system",
/// status:"safe_mode"}` / recovery announcements whenever the inference worker crosses the
/// NORMAL/SAFE_MODE boundary.
fn spawn_safe_mode_announcer(
    mut events: broadcast::Receiver<crate::events::BroadcastEvent>,
    registry: Arc<ViewerRegistry>,
    cancel: CancellationToken,
) {
    use crate::events::{BroadcastEvent, InferenceEvent};

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Ok(BroadcastEvent::Inference(InferenceEvent::EnteredSafeMode { reason, .. })) => {
                            let payload = serde_json::json!({
                                "type": "system",
                                "status": "safe_mode",
                                "message": reason,
                                "payload": { "ml_available": false },
                            });
                            registry
                                .broadcast(crate::viewers::OutboundMessage::Text(payload.to_string()))
                                .await;
                        }
                        Ok(BroadcastEvent::Inference(InferenceEvent::Recovered { .. })) => {
                            let payload = serde_json::json!({
                                "type": "system",
                                "status": "connected",
                                "message": "inference collaborator recovered",
                                "payload": { "ml_available": true },
                            });
                            registry
                                .broadcast(crate::viewers::OutboundMessage::Text(payload.to_string()))
                                .await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });
}

/// Wires every long-lived service in dependency order: inference client, worker, manager,
/// viewer registry, event bridge, network context, and the fan-out task bridging frame
/// broadcasts to the viewer registry.
pub fn bootstrap(config: &Config) -> CoreResult<BootstrappedServices> {
    config
        .validate()
        .map_err(|e| crate::error::CoreError::Configuration(e.to_string()))?;

    let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(16));
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(event_tx));

    let client: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(
        config.inference_base_url.clone(),
        config.timeout_cold(),
        config.timeout_warm(),
        config.health_interval(),
        config.max_failures_before_safe_mode,
    ));
    let worker = InferenceWorker::spawn_with_emitter(client, event_bridge.clone());

    let (raw_tx, raw_rx) = broadcast::channel(config.event_channel_capacity.max(16));
    let (enhanced_tx, enhanced_rx) = broadcast::channel(config.event_channel_capacity.max(16));

    let manager = Arc::new(SourceManager::new(
        worker.clone(),
        raw_tx.clone(),
        enhanced_tx.clone(),
        config.target_fps,
        config.camera_timeout(),
        config.phone_slot_capacity,
        config.clear_last_result_on_detach,
    ));

    let viewer_registry = Arc::new(ViewerRegistry::new(16, config.subscriber_send_timeout()));

    let network = match config.advertise_ip {
        Some(ip) => NetworkContext::explicit(config.bind_port, ip),
        None => NetworkContext::auto_detect(config.bind_port, LocalIpDetector::arc())
            .map_err(|e| crate::error::CoreError::Network(e.to_string()))?,
    };

    let cancel_token = CancellationToken::new();
    spawn_fanout(
        raw_rx,
        enhanced_rx,
        viewer_registry.clone(),
        cancel_token.child_token(),
    );
    spawn_safe_mode_announcer(
        event_bridge.subscribe(),
        viewer_registry.clone(),
        cancel_token.child_token(),
    );

    let watchdog_manager = manager.clone();
    let watchdog_poll = Duration::from_secs(config.watchdog_poll_secs);
    let watchdog_cancel = cancel_token.child_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = watchdog_cancel.cancelled() => {}
            _ = watchdog_manager.run_watchdog(watchdog_poll) => {}
        }
    });

    Ok(BootstrappedServices {
        manager,
        worker,
        viewer_registry,
        event_bridge,
        network,
        raw_tx,
        enhanced_tx,
        spawner: TokioSpawner::current(),
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.inference_base_url = "http://127.0.0.1:1".to_string();
        cfg
    }

    #[tokio::test]
    async fn bootstrap_wires_services_and_starts_idle() {
        let services = bootstrap(&test_config()).expect("bootstrap should succeed");
        assert_eq!(services.manager.state(), crate::manager::SourceState::Idle);
        services.shutdown();
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let mut cfg = Config::default();
        cfg.inference_base_url = String::new();
        assert!(bootstrap(&cfg).is_err());
    }
}
