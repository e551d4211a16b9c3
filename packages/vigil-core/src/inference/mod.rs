//! The inference collaborator: an external HTTP service that turns raw frames into
//! detections. This module covers only the request/response contract and the single-inflight
//! background consumer built on top of it; the collaborator's own model/runtime is out of
//! scope.

mod client;
mod worker;

pub use client::{HttpInferenceClient, InferenceClient};
pub use worker::InferenceWorker;

use serde::{Deserialize, Serialize};

/// A single detected object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    /// `[x, y, w, h]`.
    pub bbox: [f64; 4],
}

/// Inference health state attached to every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InferenceState {
    Normal,
    SafeMode,
}

/// The outcome of one inference call, or a synthetic placeholder while the collaborator is
/// unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub frame_id: u64,
    pub detections: Vec<Detection>,
    pub max_confidence: f64,
    pub state: InferenceState,
    /// Base64-encoded JPEG, if the collaborator was asked to return one.
    pub enhanced_image: Option<String>,
    pub ml_latency_ms: f64,
    pub ml_fps: f64,
    pub completion_ts: f64,
}

impl InferenceResult {
    /// Builds the synthetic placeholder returned while the collaborator is unavailable.
    #[must_use]
    pub fn safe_mode(frame_id: u64, completion_ts: f64) -> Self {
        Self {
            frame_id,
            detections: Vec::new(),
            max_confidence: 0.0,
            state: InferenceState::SafeMode,
            enhanced_image: None,
            ml_latency_ms: 0.0,
            ml_fps: 0.0,
            completion_ts,
        }
    }
}
