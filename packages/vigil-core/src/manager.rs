//! The Source Manager: a singleton state machine serializing source lifecycle and hot-swapping
//! the bound [`crate::source::FrameSource`] while the worker and viewer registry persist.
//!
//! Grounded on the host project's composition-root wiring discipline (`bootstrap.rs`) and
//! `StreamCoordinator`'s session create/stop/replace pattern, generalized from multi-speaker
//! playback sessions to a single bound frame source; the transition table and the frame-driven
//! watchdog are cross-checked against the Python reference's `source_manager.py`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::frame::Frame;
use crate::inference::InferenceWorker;
use crate::scheduler::{EnhancedEmission, PacedScheduler, RawEmission};
use crate::source::{EofBehavior, FileSource, FrameSource, PhoneSource};

/// The manager's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceState {
    Idle,
    VideoActive,
    CameraWaiting,
    CameraActive,
    Error,
}

/// What to attach: a video file, or the phone camera.
#[derive(Debug, Clone)]
pub enum SourceRequest {
    Video { path: String },
    Camera,
}

/// Wraps a bound [`FrameSource`] to stamp a shared "last frame seen" clock on every
/// successfully produced frame, independent of the scheduler's own pacing.
struct WatchedSource {
    inner: Box<dyn FrameSource>,
    last_frame_millis: Arc<AtomicU64>,
    epoch: Instant,
}

#[async_trait]
impl FrameSource for WatchedSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.inner.next_frame().await;
        if frame.is_some() {
            self.last_frame_millis.store(
                self.epoch.elapsed().as_millis() as u64,
                Ordering::Relaxed,
            );
        }
        frame
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}

struct Attachment {
    scheduler: Arc<PacedScheduler>,
    run_handle: JoinHandle<()>,
    phone_source: Option<PhoneSource>,
    kind: &'static str,
}

/// Singleton source lifecycle state machine.
pub struct SourceManager {
    state: RwLock<SourceState>,
    attachment: tokio::sync::Mutex<Option<Attachment>>,
    last_frame_millis: Arc<AtomicU64>,
    watchdog_epoch: Instant,

    worker: Arc<InferenceWorker>,
    raw_tx: tokio::sync::broadcast::Sender<RawEmission>,
    enhanced_tx: tokio::sync::broadcast::Sender<EnhancedEmission>,

    target_fps: u32,
    camera_timeout: Duration,
    phone_slot_capacity: usize,
    clear_last_result_on_detach: bool,
}

impl SourceManager {
    #[must_use]
    pub fn new(
        worker: Arc<InferenceWorker>,
        raw_tx: tokio::sync::broadcast::Sender<RawEmission>,
        enhanced_tx: tokio::sync::broadcast::Sender<EnhancedEmission>,
        target_fps: u32,
        camera_timeout: Duration,
        phone_slot_capacity: usize,
        clear_last_result_on_detach: bool,
    ) -> Self {
        Self {
            state: RwLock::new(SourceState::Idle),
            attachment: tokio::sync::Mutex::new(None),
            last_frame_millis: Arc::new(AtomicU64::new(0)),
            watchdog_epoch: Instant::now(),
            worker,
            raw_tx,
            enhanced_tx,
            target_fps,
            camera_timeout,
            phone_slot_capacity,
            clear_last_result_on_detach,
        }
    }

    #[must_use]
    pub fn state(&self) -> SourceState {
        *self.state.read()
    }

    /// Milliseconds (on the manager's internal monotonic clock) since the last frame was
    /// observed from the bound source, or `0` if none has been observed since the last attach.
    #[must_use]
    pub fn last_frame_millis(&self) -> u64 {
        self.last_frame_millis.load(Ordering::Relaxed)
    }

    /// The `kind()` of the currently bound source (`"file"`, `"phone"`), if any.
    pub async fn source_kind(&self) -> Option<&'static str> {
        self.attachment.lock().await.as_ref().map(|a| a.kind)
    }

    /// Returns the bound phone source, if the manager currently has a camera attach.
    pub async fn phone_source(&self) -> Option<PhoneSource> {
        self.attachment
            .lock()
            .await
            .as_ref()
            .and_then(|a| a.phone_source.clone())
    }

    /// Switches to a new source, detaching the current one first if any is bound.
    ///
    /// Returns immediately; the detach/attach sequence is bounded (sub-second) and never waits
    /// on the inference collaborator.
    pub async fn switch(self: &Arc<Self>, request: SourceRequest) -> Result<(), String> {
        self.detach().await;

        let (boxed_source, phone_source, next_state, kind) = match request {
            SourceRequest::Video { path } => {
                let file =
                    FileSource::open(&path, EofBehavior::Loop).map_err(|e| e.to_string())?;
                (
                    Box::new(file) as Box<dyn FrameSource>,
                    None,
                    SourceState::VideoActive,
                    "file",
                )
            }
            SourceRequest::Camera => {
                let phone = PhoneSource::new(self.phone_slot_capacity);
                (
                    Box::new(phone.clone()) as Box<dyn FrameSource>,
                    Some(phone),
                    SourceState::CameraWaiting,
                    "phone",
                )
            }
        };

        self.last_frame_millis.store(0, Ordering::Relaxed);
        let watched = WatchedSource {
            inner: boxed_source,
            last_frame_millis: self.last_frame_millis.clone(),
            epoch: self.watchdog_epoch,
        };

        let scheduler = Arc::new(PacedScheduler::new(
            self.target_fps,
            self.worker.clone(),
            self.raw_tx.clone(),
            self.enhanced_tx.clone(),
        ));
        let scheduler_for_run = scheduler.clone();
        let run_handle = tokio::spawn(async move {
            scheduler_for_run.run(Box::new(watched)).await;
        });

        *self.attachment.lock().await = Some(Attachment {
            scheduler,
            run_handle,
            phone_source,
            kind,
        });
        *self.state.write() = next_state;
        Ok(())
    }

    /// Called by the phone ingress handler when the first (or any) frame arrives while waiting.
    pub fn on_frame_received(&self) {
        let mut state = self.state.write();
        if *state == SourceState::CameraWaiting {
            *state = SourceState::CameraActive;
        }
    }

    /// Called by the phone ingress handler when the upstream phone disconnects.
    pub async fn notify_camera_disconnected(self: &Arc<Self>) {
        if matches!(
            self.state(),
            SourceState::CameraWaiting | SourceState::CameraActive
        ) {
            self.detach().await;
        }
    }

    /// Stops the current scheduler (if any), waits up to 2s for it to exit, clears
    /// `last_frame_ts`, and returns to IDLE. The worker keeps running.
    pub async fn detach(&self) {
        let attachment = self.attachment.lock().await.take();
        if let Some(attachment) = attachment {
            attachment.scheduler.request_stop();
            if let Some(phone) = &attachment.phone_source {
                phone.request_stop();
            }
            let _ = tokio::time::timeout(Duration::from_secs(2), attachment.run_handle).await;
        }
        self.last_frame_millis.store(0, Ordering::Relaxed);
        if self.clear_last_result_on_detach {
            self.worker.clear_last_result();
        }
        *self.state.write() = SourceState::Idle;
    }

    /// Transitions to `ERROR` on an unrecoverable condition, detaching first.
    pub async fn fail(&self) {
        self.detach().await;
        *self.state.write() = SourceState::Error;
    }

    fn seconds_since_last_frame(&self) -> f64 {
        let last = self.last_frame_millis.load(Ordering::Relaxed);
        let now = self.watchdog_epoch.elapsed().as_millis() as u64;
        now.saturating_sub(last) as f64 / 1000.0
    }

    /// Runs the frame-driven watchdog loop: polls every `poll_interval`; if the state is
    /// `CAMERA_WAITING` or `CAMERA_ACTIVE` and no frame has been seen for more than
    /// `camera_timeout`, detaches back to `IDLE`.
    pub async fn run_watchdog(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let watching = matches!(
                self.state(),
                SourceState::CameraWaiting | SourceState::CameraActive
            );
            if watching && self.seconds_since_last_frame() > self.camera_timeout.as_secs_f64() {
                log::warn!(
                    "[SourceManager] camera watchdog fired after {:.1}s with no frame, detaching",
                    self.seconds_since_last_frame()
                );
                self.detach().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{HttpInferenceClient, InferenceClient};
    use std::time::Duration as StdDuration;

    fn make_worker() -> Arc<InferenceWorker> {
        let client: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(
            "http://127.0.0.1:1",
            StdDuration::from_millis(10),
            StdDuration::from_millis(10),
            StdDuration::from_secs(3600),
            2,
        ));
        InferenceWorker::spawn(client)
    }

    #[tokio::test]
    async fn starts_idle() {
        let (raw_tx, _) = tokio::sync::broadcast::channel(8);
        let (enhanced_tx, _) = tokio::sync::broadcast::channel(8);
        let manager = SourceManager::new(
            make_worker(),
            raw_tx,
            enhanced_tx,
            12,
            StdDuration::from_secs(15),
            1,
            true,
        );
        assert_eq!(manager.state(), SourceState::Idle);
    }

    #[tokio::test]
    async fn switch_to_camera_enters_waiting_then_active_on_frame() {
        let (raw_tx, _) = tokio::sync::broadcast::channel(8);
        let (enhanced_tx, _) = tokio::sync::broadcast::channel(8);
        let manager = Arc::new(SourceManager::new(
            make_worker(),
            raw_tx,
            enhanced_tx,
            12,
            StdDuration::from_secs(15),
            1,
            true,
        ));
        manager.switch(SourceRequest::Camera).await.unwrap();
        assert_eq!(manager.state(), SourceState::CameraWaiting);
        manager.on_frame_received();
        assert_eq!(manager.state(), SourceState::CameraActive);
        manager.detach().await;
        assert_eq!(manager.state(), SourceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_detaches_after_camera_timeout_with_no_frames() {
        let (raw_tx, _) = tokio::sync::broadcast::channel(8);
        let (enhanced_tx, _) = tokio::sync::broadcast::channel(8);
        let manager = Arc::new(SourceManager::new(
            make_worker(),
            raw_tx,
            enhanced_tx,
            12,
            StdDuration::from_millis(500),
            1,
            true,
        ));
        manager.switch(SourceRequest::Camera).await.unwrap();

        let watchdog = tokio::spawn(manager.clone().run_watchdog(StdDuration::from_millis(100)));
        tokio::time::advance(StdDuration::from_secs(2)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(StdDuration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert_eq!(manager.state(), SourceState::Idle);
        watchdog.abort();
    }
}
