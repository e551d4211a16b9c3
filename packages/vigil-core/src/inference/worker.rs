//! Background single-inflight inference consumer.
//!
//! The slot-plus-admission-flag pair is implemented as one [`Mailbox`] type rather than a
//! separate mutex and `AtomicBool`, to avoid a race between "clear then store" and "store then
//! clear" on the producer side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::events::{EventEmitter, InferenceEvent, NoopEventEmitter};
use crate::frame::Frame;
use crate::inference::client::InferenceClient;
use crate::inference::{InferenceResult, InferenceState};

/// A single-slot, overwrite-on-push mailbox combined with a "ready for admission" flag.
struct Mailbox {
    slot: Mutex<Option<Frame>>,
    ready: AtomicBool,
    notify: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    /// Producer-side admission rule: if ready, this is a submit (slot filled, ready cleared).
    /// If not ready, the slot is simply overwritten (latest-wins); the in-flight call is
    /// unaffected and will pick up the newest value once it finishes.
    fn submit(&self, frame: Frame) {
        *self.slot.lock() = Some(frame);
        if self.ready.swap(false, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Worker-side: wait until there may be work, then take it.
    async fn take(&self) -> Frame {
        loop {
            if let Some(frame) = self.slot.lock().take() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    fn reopen(&self) {
        self.ready.store(true, Ordering::Release);
        // A frame may have been queued while admission was closed; wake the worker so it
        // doesn't wait for a submit that already happened.
        if self.slot.lock().is_some() {
            self.notify.notify_one();
        }
    }
}

/// Background consumer with single-inflight admission and a `last_result` cache.
pub struct InferenceWorker {
    mailbox: Arc<Mailbox>,
    last_result: Arc<Mutex<Option<InferenceResult>>>,
    stopped: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InferenceWorker {
    /// Spawns the worker loop against `client`, emitting no domain events.
    #[must_use]
    pub fn spawn(client: Arc<dyn InferenceClient>) -> Arc<Self> {
        Self::spawn_with_emitter(client, Arc::new(NoopEventEmitter))
    }

    /// Spawns the worker loop against `client`, returning an owning handle. `emitter` receives
    /// an [`InferenceEvent::EnteredSafeMode`]/[`InferenceEvent::Recovered`] on every NORMAL/
    /// SAFE_MODE edge so the API layer can broadcast a one-time system announcement.
    #[must_use]
    pub fn spawn_with_emitter(
        client: Arc<dyn InferenceClient>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        let worker = Arc::new(Self {
            mailbox: Arc::new(Mailbox::new()),
            last_result: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        });

        let mailbox = worker.mailbox.clone();
        let last_result = worker.last_result.clone();
        let stopped = worker.stopped.clone();
        let handle = tokio::spawn(async move {
            run_loop(client, mailbox, last_result, stopped, emitter).await;
        });
        *worker.handle.lock() = Some(handle);
        worker
    }

    /// Submits `frame` for inference per the admission rule (submit if ready, overwrite if
    /// busy).
    pub fn submit(&self, frame: Frame) {
        self.mailbox.submit(frame);
    }

    /// Returns a clone of the most recently completed result, if any.
    #[must_use]
    pub fn last_result(&self) -> Option<InferenceResult> {
        self.last_result.lock().clone()
    }

    /// Whether admission is currently open (the worker is idle and would accept a submit
    /// without overwriting anything in flight).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.mailbox.ready.load(Ordering::Acquire)
    }

    /// Clears the cached result, e.g. on source detach to avoid serving stale pixels under a
    /// new attach.
    pub fn clear_last_result(&self) {
        *self.last_result.lock() = None;
    }

    /// Signals the worker loop to stop after its current (if any) in-flight call completes.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.mailbox.notify.notify_waiters();
    }
}

async fn run_loop(
    client: Arc<dyn InferenceClient>,
    mailbox: Arc<Mailbox>,
    last_result: Arc<Mutex<Option<InferenceResult>>>,
    stopped: Arc<AtomicBool>,
    emitter: Arc<dyn EventEmitter>,
) {
    let mut last_completion: Option<Instant> = None;
    let mut previous_state: Option<InferenceState> = None;

    while !stopped.load(Ordering::Acquire) {
        let frame = tokio::select! {
            frame = mailbox.take() => frame,
        };
        if stopped.load(Ordering::Acquire) {
            break;
        }

        let call_start = Instant::now();
        let result = client.infer(&frame, true).await;

        let ml_fps = last_completion
            .map(|prev| {
                let delta = call_start.elapsed().as_secs_f64() + prev.elapsed().as_secs_f64();
                if delta > 0.0 {
                    1.0 / delta
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        last_completion = Some(Instant::now());

        let mut result = result;
        result.ml_fps = ml_fps;
        result.completion_ts = frame.source_ts;

        if previous_state != Some(result.state) {
            match result.state {
                InferenceState::SafeMode if previous_state != Some(InferenceState::SafeMode) => {
                    emitter.emit_inference(InferenceEvent::EnteredSafeMode {
                        reason: "inference collaborator unavailable".to_string(),
                        timestamp: crate::utils::now_millis(),
                    });
                }
                InferenceState::Normal if previous_state == Some(InferenceState::SafeMode) => {
                    emitter.emit_inference(InferenceEvent::Recovered {
                        timestamp: crate::utils::now_millis(),
                    });
                }
                _ => {}
            }
            previous_state = Some(result.state);
        }

        *last_result.lock() = Some(result);

        mailbox.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicU64;

    struct FakeClient {
        calls: AtomicU64,
    }

    #[async_trait]
    impl InferenceClient for FakeClient {
        async fn probe(&self) -> bool {
            true
        }

        async fn infer(&self, frame: &Frame, _send_enhanced: bool) -> InferenceResult {
            self.calls.fetch_add(1, Ordering::Relaxed);
            InferenceResult {
                frame_id: frame.frame_id,
                detections: Vec::new(),
                max_confidence: 0.9,
                state: InferenceState::Normal,
                enhanced_image: None,
                ml_latency_ms: 1.0,
                ml_fps: 0.0,
                completion_ts: frame.source_ts,
            }
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn frame(id: u64) -> Frame {
        Frame::new(Bytes::new(), 1, 1, id, 0.0)
    }

    #[tokio::test]
    async fn submit_and_result_roundtrip() {
        let client: Arc<dyn InferenceClient> = Arc::new(FakeClient {
            calls: AtomicU64::new(0),
        });
        let worker = InferenceWorker::spawn(client);
        worker.submit(frame(7));

        let mut attempts = 0;
        while worker.last_result().is_none() && attempts < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            attempts += 1;
        }

        let result = worker.last_result().expect("result should be populated");
        assert_eq!(result.frame_id, 7);
        worker.stop();
    }

    #[tokio::test]
    async fn clear_last_result_empties_cache() {
        let client: Arc<dyn InferenceClient> = Arc::new(FakeClient {
            calls: AtomicU64::new(0),
        });
        let worker = InferenceWorker::spawn(client);
        worker.submit(frame(1));
        let mut attempts = 0;
        while worker.last_result().is_none() && attempts < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            attempts += 1;
        }
        worker.clear_last_result();
        assert!(worker.last_result().is_none());
        worker.stop();
    }
}
