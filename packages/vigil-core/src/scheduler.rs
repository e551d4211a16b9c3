//! The Paced Scheduler: drives a bound frame source at a fixed cadence, fanning raw frames and
//! cached-enhanced results out to subscribers.
//!
//! Pacing is pace-driven, not catch-up: each tick computes `sleep = frame_interval -
//! elapsed_since_tick_start` and sleeps only if positive. This deliberately does not use
//! `tokio::time::interval` with `MissedTickBehavior::Burst` — bursting to catch up on missed
//! ticks is exactly the cumulative-drift behavior the source design forbids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::frame::Frame;
use crate::inference::InferenceWorker;
use crate::source::FrameSource;

/// A raw-stream payload: the frame as delivered by the source, unmodified.
#[derive(Debug, Clone)]
pub struct RawEmission {
    pub frame: Frame,
}

/// An enhanced-stream payload, synthesized each tick from the worker's `last_result`.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedEmission {
    pub frame_id: u64,
    pub timestamp: f64,
    pub detections: Vec<crate::inference::Detection>,
    pub max_confidence: f64,
    pub state: crate::inference::InferenceState,
    pub image_data: Option<String>,
    pub system: SystemInfo,
    pub is_cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub fps: f64,
    pub latency_ms: f64,
    pub ml_fps: f64,
    pub ml_available: bool,
}

/// Drives one bound [`FrameSource`] until it closes or shutdown is requested.
pub struct PacedScheduler {
    target_fps: u32,
    worker: Arc<InferenceWorker>,
    raw_tx: broadcast::Sender<RawEmission>,
    enhanced_tx: broadcast::Sender<EnhancedEmission>,
    stopped: Arc<AtomicBool>,
}

impl PacedScheduler {
    #[must_use]
    pub fn new(
        target_fps: u32,
        worker: Arc<InferenceWorker>,
        raw_tx: broadcast::Sender<RawEmission>,
        enhanced_tx: broadcast::Sender<EnhancedEmission>,
    ) -> Self {
        Self {
            target_fps: target_fps.max(1),
            worker,
            raw_tx,
            enhanced_tx,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests the run loop exit at the next opportunity.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Drives `source` until it closes (returns `None`) or `request_stop` is called.
    ///
    /// Each iteration: pull, emit raw, submit to the worker per the admission rule, emit a
    /// cached-enhanced payload (substituting the current `frame_id`), then pace without
    /// accumulating drift.
    pub async fn run(&self, mut source: Box<dyn FrameSource>) {
        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(self.target_fps));
        let mut last_fps_log = Instant::now();
        let mut frames_since_log: u64 = 0;

        while !self.stopped.load(Ordering::Acquire) {
            let tick_start = Instant::now();

            let Some(frame) = source.next_frame().await else {
                log::info!("[Scheduler] source closed, exiting run loop");
                break;
            };

            let is_cached = !self.worker.is_ready();

            // Emit raw: non-blocking, best-effort (no receivers is not an error).
            let _ = self.raw_tx.send(RawEmission {
                frame: frame.clone(),
            });

            let current_frame_id = frame.frame_id;
            self.worker.submit(frame);

            if let Some(result) = self.worker.last_result() {
                let enhanced = EnhancedEmission {
                    frame_id: current_frame_id,
                    timestamp: crate::utils::now_millis() as f64 / 1000.0,
                    detections: result.detections,
                    max_confidence: result.max_confidence,
                    state: result.state,
                    image_data: result.enhanced_image,
                    system: SystemInfo {
                        fps: f64::from(self.target_fps),
                        latency_ms: result.ml_latency_ms,
                        ml_fps: result.ml_fps,
                        ml_available: true,
                    },
                    is_cached,
                };
                let _ = self.enhanced_tx.send(enhanced);
            }

            frames_since_log += 1;
            if last_fps_log.elapsed() >= Duration::from_secs(1) {
                log::debug!(
                    "[Scheduler] ~{} fps over last interval",
                    frames_since_log
                );
                frames_since_log = 0;
                last_fps_log = Instant::now();
            }

            let elapsed = tick_start.elapsed();
            if let Some(remaining) = frame_interval.checked_sub(elapsed) {
                tokio::time::sleep(remaining).await;
            }
        }

        source.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceClient;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicU64;

    struct CountingSource {
        remaining: AtomicU64,
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn next_frame(&mut self) -> Option<Frame> {
            let n = self.remaining.fetch_sub(1, Ordering::SeqCst);
            if n == 0 {
                return None;
            }
            Some(Frame::new(Bytes::new(), 1, 1, n, 0.0))
        }

        fn stop(&mut self) {}

        fn kind(&self) -> &'static str {
            "test"
        }
    }

    struct StubClient;
    #[async_trait]
    impl InferenceClient for StubClient {
        async fn probe(&self) -> bool {
            true
        }
        async fn infer(
            &self,
            frame: &Frame,
            _send_enhanced: bool,
        ) -> crate::inference::InferenceResult {
            crate::inference::InferenceResult::safe_mode(frame.frame_id, 0.0)
        }
        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_exits_cleanly_when_source_closes() {
        let worker = InferenceWorker::spawn(Arc::new(StubClient));
        let (raw_tx, _raw_rx) = broadcast::channel(16);
        let (enhanced_tx, _enhanced_rx) = broadcast::channel(16);
        let scheduler = PacedScheduler::new(12, worker, raw_tx, enhanced_tx);

        let source: Box<dyn FrameSource> = Box::new(CountingSource {
            remaining: AtomicU64::new(3),
        });

        let run = scheduler.run(source);
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("scheduler should exit once the source closes");
    }
}
