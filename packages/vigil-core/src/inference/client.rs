//! HTTP adapter to the external inference collaborator.
//!
//! Follows a trait-for-DI pattern: services depend on [`InferenceClient`], not on `reqwest`
//! directly, so tests can swap in a fake collaborator.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::multipart;

use crate::frame::Frame;
use crate::inference::{InferenceResult, InferenceState};

/// Request/response adapter to the inference collaborator, with health tracking and a
/// SAFE_MODE fallback.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Synchronous health probe; caches availability on success.
    async fn probe(&self) -> bool;

    /// Runs inference on `frame`, returning a SAFE_MODE placeholder if the collaborator is
    /// unavailable or the call fails.
    async fn infer(&self, frame: &Frame, send_enhanced: bool) -> InferenceResult;

    /// Whether the client currently believes the collaborator is reachable.
    fn is_available(&self) -> bool;
}

/// `reqwest`-backed [`InferenceClient`].
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
    timeout_cold: Duration,
    timeout_warm: Duration,
    health_interval: Duration,
    max_failures_before_safe_mode: u32,

    available: AtomicBool,
    warmed_up: AtomicBool,
    consecutive_failures: AtomicU32,
    last_health_check: Mutex<std::time::Instant>,
}

impl HttpInferenceClient {
    /// Builds a client pointed at `base_url` (the collaborator's root, e.g.
    /// `http://127.0.0.1:9000`).
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        timeout_cold: Duration,
        timeout_warm: Duration,
        health_interval: Duration,
        max_failures_before_safe_mode: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout_cold,
            timeout_warm,
            health_interval,
            max_failures_before_safe_mode,
            available: AtomicBool::new(false),
            warmed_up: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_health_check: Mutex::new(std::time::Instant::now() - Duration::from_secs(3600)),
        }
    }

    fn current_timeout(&self) -> Duration {
        if self.warmed_up.load(Ordering::Relaxed) {
            self.timeout_warm
        } else {
            self.timeout_cold
        }
    }

    fn health_check_due(&self) -> bool {
        self.last_health_check.lock().elapsed() >= self.health_interval
    }

    fn record_success(&self) {
        self.available.store(true, Ordering::Relaxed);
        self.warmed_up.store(true, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self, immediate_unavailable: bool) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if immediate_unavailable || failures >= self.max_failures_before_safe_mode {
            self.available.store(false, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn probe(&self) -> bool {
        *self.last_health_check.lock() = std::time::Instant::now();
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                true
            }
            _ => {
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    async fn infer(&self, frame: &Frame, send_enhanced: bool) -> InferenceResult {
        let completion_ts = frame.source_ts;

        if !self.available.load(Ordering::Relaxed) {
            if self.health_check_due() {
                self.probe().await;
            }
            if !self.available.load(Ordering::Relaxed) {
                return InferenceResult::safe_mode(frame.frame_id, completion_ts);
            }
        }

        let jpeg = match frame.to_jpeg(crate::protocol_constants::INFERENCE_JPEG_QUALITY) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[InferenceClient] failed to encode frame for inference: {e}");
                return InferenceResult::safe_mode(frame.frame_id, completion_ts);
            }
        };

        let form = multipart::Form::new()
            .part(
                "frame",
                multipart::Part::bytes(jpeg)
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")
                    .unwrap_or_else(|_| multipart::Part::bytes(Vec::new())),
            )
            .text("frame_id", frame.frame_id.to_string())
            .text("timestamp", frame.source_ts.to_string())
            .text("send_enhanced", send_enhanced.to_string());

        let url = format!("{}/infer", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .timeout(self.current_timeout())
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<InferenceResult>().await {
                Ok(mut result) => {
                    self.record_success();
                    result.ml_latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                    result.state = InferenceState::Normal;
                    result.frame_id = frame.frame_id;
                    result
                }
                Err(e) => {
                    log::warn!("[InferenceClient] malformed response: {e}");
                    self.record_failure(false);
                    InferenceResult::safe_mode(frame.frame_id, completion_ts)
                }
            },
            Ok(resp) => {
                log::warn!("[InferenceClient] non-success status: {}", resp.status());
                self.record_failure(false);
                InferenceResult::safe_mode(frame.frame_id, completion_ts)
            }
            Err(e) if e.is_timeout() => {
                log::warn!("[InferenceClient] request timed out");
                self.record_failure(false);
                InferenceResult::safe_mode(frame.frame_id, completion_ts)
            }
            Err(e) => {
                log::warn!("[InferenceClient] connection error: {e}");
                self.record_failure(true);
                InferenceResult::safe_mode(frame.frame_id, completion_ts)
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_frame(frame_id: u64) -> Frame {
        Frame::new(Bytes::from(vec![0u8; 3 * 4 * 4]), 4, 4, frame_id, 0.0)
    }

    #[tokio::test]
    async fn infer_returns_safe_mode_when_unavailable_and_no_probe_due() {
        let client = HttpInferenceClient::new(
            "http://127.0.0.1:1",
            Duration::from_millis(50),
            Duration::from_millis(20),
            Duration::from_secs(3600),
            2,
        );
        let result = client.infer(&make_frame(0), false).await;
        assert_eq!(result.state, InferenceState::SafeMode);
        assert_eq!(result.max_confidence, 0.0);
    }

    #[tokio::test]
    async fn connection_error_marks_unavailable_immediately() {
        let client = HttpInferenceClient::new(
            "http://127.0.0.1:1",
            Duration::from_millis(50),
            Duration::from_millis(20),
            Duration::from_secs(0),
            5,
        );
        client.available.store(true, Ordering::Relaxed);
        let _ = client.infer(&make_frame(0), false).await;
        assert!(!client.is_available());
    }
}
