//! Viewer registry and non-blocking broadcaster.
//!
//! Grounded on `WsConnectionManager`/`ConnectionGuard` (DashMap-backed registry, RAII
//! unregister-on-drop, hierarchical `CancellationToken` for force-close-all), extended with
//! real per-viewer fields (`label`, `connected_at`, `allowed`) beyond a bare connection handle.
//! The per-send timeout/drop-not-disconnect broadcast policy is grounded on the Python
//! reference's `video_stream_manager.py::broadcast_raw_frame` (`asyncio.wait_for(...,
//! timeout=0.1)`), translated here to `tokio::time::timeout`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An outbound message to a viewer's connection.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Per-viewer registry state.
pub struct Viewer {
    pub viewer_id: String,
    pub label: RwLock<String>,
    pub connected_at: f64,
    pub allowed: AtomicBool,
    sender: mpsc::Sender<OutboundMessage>,
    cancel: CancellationToken,
}

/// A snapshot-safe, serializable view of a viewer for the REST listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerInfo {
    pub viewer_id: String,
    pub label: String,
    pub allowed: bool,
    pub connected_at: f64,
}

impl From<&Arc<Viewer>> for ViewerInfo {
    fn from(v: &Arc<Viewer>) -> Self {
        Self {
            viewer_id: v.viewer_id.clone(),
            label: v.label.read().clone(),
            allowed: v.allowed.load(Ordering::Relaxed),
            connected_at: v.connected_at,
        }
    }
}

/// RAII handle returned by [`ViewerRegistry::register`]; unregisters automatically when
/// dropped, and exposes the child cancellation token used to tear down the WS handler.
pub struct ConnectionGuard {
    registry: Arc<ViewerRegistry>,
    viewer_id: String,
    pub cancel: CancellationToken,
    pub receiver: mpsc::Receiver<OutboundMessage>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.viewer_id);
    }
}

/// `DashMap`-backed viewer registry with a global cancellation token for force-close-all.
pub struct ViewerRegistry {
    viewers: DashMap<String, Arc<Viewer>>,
    global_cancel: RwLock<CancellationToken>,
    mailbox_capacity: usize,
    send_timeout: Duration,
}

impl ViewerRegistry {
    #[must_use]
    pub fn new(mailbox_capacity: usize, send_timeout: Duration) -> Self {
        Self {
            viewers: DashMap::new(),
            global_cancel: RwLock::new(CancellationToken::new()),
            mailbox_capacity: mailbox_capacity.max(1),
            send_timeout,
        }
    }

    /// Registers a new viewer, defaulting `allowed` to `true`.
    #[must_use]
    pub fn register(self: &Arc<Self>, viewer_id: String, label: String, connected_at: f64) -> ConnectionGuard {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity.max(16));
        let cancel = self.global_cancel.read().child_token();

        let viewer = Arc::new(Viewer {
            viewer_id: viewer_id.clone(),
            label: RwLock::new(label),
            connected_at,
            allowed: AtomicBool::new(true),
            sender: tx,
            cancel: cancel.clone(),
        });
        self.viewers.insert(viewer_id.clone(), viewer);

        ConnectionGuard {
            registry: self.clone(),
            viewer_id,
            cancel,
            receiver: rx,
        }
    }

    pub fn unregister(&self, viewer_id: &str) {
        self.viewers.remove(viewer_id);
    }

    #[must_use]
    pub fn is_allowed(&self, viewer_id: &str) -> bool {
        self.viewers
            .get(viewer_id)
            .is_some_and(|v| v.allowed.load(Ordering::Relaxed))
    }

    pub fn allow(&self, viewer_id: &str) -> bool {
        if let Some(v) = self.viewers.get(viewer_id) {
            v.allowed.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn revoke(&self, viewer_id: &str) -> bool {
        if let Some(v) = self.viewers.get(viewer_id) {
            v.allowed.store(false, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<ViewerInfo> {
        self.viewers.iter().map(|e| ViewerInfo::from(e.value())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Broadcasts `message` to every allowed viewer, with a 100ms per-send deadline. A viewer
    /// whose send times out just drops that message; a viewer whose channel is closed (the
    /// receiving WS task has exited) is unregistered. Sends fan out concurrently so one stalled
    /// viewer's deadline can't delay delivery to the rest.
    pub async fn broadcast(&self, message: OutboundMessage) {
        let snapshot: Vec<Arc<Viewer>> = self
            .viewers
            .iter()
            .filter(|e| e.value().allowed.load(Ordering::Relaxed))
            .map(|e| e.value().clone())
            .collect();

        let send_timeout = self.send_timeout;
        let results = futures::future::join_all(snapshot.iter().map(|viewer| {
            let message = message.clone();
            async move {
                let outcome = tokio::time::timeout(send_timeout, viewer.sender.send(message)).await;
                (viewer.viewer_id.clone(), outcome)
            }
        }))
        .await;

        for (viewer_id, outcome) in results {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Receiver gone: the WS handler has already exited.
                    self.unregister(&viewer_id);
                }
                Err(_) => {
                    log::debug!(
                        "[ViewerRegistry] dropped a message to viewer {viewer_id} ({send_timeout:?} deadline exceeded)",
                    );
                }
            }
        }
    }

    /// Sends a single message to one viewer (used for the "connected" system announcement).
    pub async fn send_to(&self, viewer_id: &str, message: OutboundMessage) {
        if let Some(viewer) = self.viewers.get(viewer_id) {
            let _ = tokio::time::timeout(self.send_timeout, viewer.sender.send(message)).await;
        }
    }

    /// Forcibly closes every current connection (used on shutdown) and replaces the global
    /// token so any subsequent registrations start from a fresh, uncancelled token.
    pub fn close_all(&self) {
        self.global_cancel.read().cancel();
        *self.global_cancel.write() = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ViewerRegistry> {
        Arc::new(ViewerRegistry::new(8, Duration::from_millis(100)))
    }

    #[tokio::test]
    async fn register_defaults_to_allowed() {
        let reg = registry();
        let _guard = reg.register("v1".into(), "Unknown Device".into(), 0.0);
        assert!(reg.is_allowed("v1"));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn revoke_then_allow_round_trips() {
        let reg = registry();
        let _guard = reg.register("v1".into(), "Unknown Device".into(), 0.0);
        assert!(reg.revoke("v1"));
        assert!(!reg.is_allowed("v1"));
        assert!(reg.allow("v1"));
        assert!(reg.is_allowed("v1"));
    }

    #[tokio::test]
    async fn dropping_guard_unregisters() {
        let reg = registry();
        {
            let _guard = reg.register("v1".into(), "Unknown Device".into(), 0.0);
            assert_eq!(reg.len(), 1);
        }
        assert_eq!(reg.len(), 0);
    }

    #[tokio::test]
    async fn broadcast_skips_disallowed_viewers() {
        let reg = registry();
        let mut guard_a = reg.register("a".into(), "A".into(), 0.0);
        reg.revoke("a");
        let mut guard_b = reg.register("b".into(), "B".into(), 0.0);

        reg.broadcast(OutboundMessage::Text("hello".into())).await;

        assert!(guard_a.receiver.try_recv().is_err());
        assert!(guard_b.receiver.try_recv().is_ok());
    }
}
