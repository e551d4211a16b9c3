//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for various domains (source, inference, viewer, phone)
//!
//! The actual transport implementation (WebSocket, SSE, etc.) is handled
//! separately in the `api` module using [`BroadcastEventBridge`].

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::manager::SourceState;

/// Events broadcast to clients.
///
/// This enum categorizes all real-time events that can be sent to connected
/// clients. Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events from the source lifecycle (attach, detach, watchdog).
    Source(SourceEvent),

    /// Events from the inference collaborator (safe-mode transitions, results).
    Inference(InferenceEvent),

    /// Events from the viewer registry.
    Viewer(ViewerEvent),

    /// Events from the phone ingress endpoint.
    Phone(PhoneEvent),
}

/// Events from the source lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceEvent {
    /// The manager's state machine transitioned.
    StateChanged {
        from: SourceState,
        to: SourceState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A new source was attached.
    Attached {
        kind: &'static str,
        timestamp: u64,
    },
    /// The bound source was detached.
    Detached { timestamp: u64 },
    /// The frame-driven watchdog fired and triggered a detach.
    WatchdogTimeout {
        #[serde(rename = "secondsSinceLastFrame")]
        seconds_since_last_frame: f64,
        timestamp: u64,
    },
}

/// Events from the inference collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InferenceEvent {
    /// The client entered SAFE_MODE after consecutive failures.
    EnteredSafeMode { reason: String, timestamp: u64 },
    /// The client recovered from SAFE_MODE.
    Recovered { timestamp: u64 },
    /// A new inference result completed.
    ResultReady {
        #[serde(rename = "frameId")]
        frame_id: u64,
        #[serde(rename = "mlLatencyMs")]
        ml_latency_ms: f64,
        timestamp: u64,
    },
}

/// Events from the viewer registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewerEvent {
    Connected {
        #[serde(rename = "viewerId")]
        viewer_id: String,
        label: String,
        timestamp: u64,
    },
    Disconnected {
        #[serde(rename = "viewerId")]
        viewer_id: String,
        timestamp: u64,
    },
    Allowed {
        #[serde(rename = "viewerId")]
        viewer_id: String,
        timestamp: u64,
    },
    Revoked {
        #[serde(rename = "viewerId")]
        viewer_id: String,
        timestamp: u64,
    },
}

/// Events from the phone ingress endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PhoneEvent {
    Connected { timestamp: u64 },
    /// A new phone connection evicted the previous one.
    Evicted { timestamp: u64 },
    Throttled {
        #[serde(rename = "waitMs")]
        wait_ms: u64,
        timestamp: u64,
    },
    SlowDown {
        #[serde(rename = "waitMs")]
        wait_ms: u64,
        timestamp: u64,
    },
}

impl From<SourceEvent> for BroadcastEvent {
    fn from(event: SourceEvent) -> Self {
        BroadcastEvent::Source(event)
    }
}

impl From<InferenceEvent> for BroadcastEvent {
    fn from(event: InferenceEvent) -> Self {
        BroadcastEvent::Inference(event)
    }
}

impl From<ViewerEvent> for BroadcastEvent {
    fn from(event: ViewerEvent) -> Self {
        BroadcastEvent::Viewer(event)
    }
}

impl From<PhoneEvent> for BroadcastEvent {
    fn from(event: PhoneEvent) -> Self {
        BroadcastEvent::Phone(event)
    }
}
