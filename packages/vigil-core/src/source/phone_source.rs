//! Push-fed source backed by a bounded, overwrite-on-push slot queue.
//!
//! The phone ingress WebSocket handler (`api::ws_phone`) calls [`PhoneSource::inject`] for
//! every decoded frame; the scheduler calls [`PhoneSource::next_frame`] (via the
//! [`crate::source::FrameSource`] trait) to pull them. Capacity is 1 or 2 — this keeps the
//! live-camera experience, where a stale frame is worse than no frame, instead of buffering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::frame::Frame;
use crate::source::FrameSource;

struct Slot {
    queue: Mutex<VecDeque<Frame>>,
    notify: Notify,
    capacity: usize,
    next_frame_id: std::sync::atomic::AtomicU64,
}

/// A bounded single/double-slot push source fed by the phone ingress endpoint.
///
/// Timestamps attached to injected frames use the server's monotonic clock
/// (`Instant`-derived), never the phone's self-reported timestamp, which is untrusted.
/// `frame_id` is assigned internally, starting at 0 for
/// this attach and surviving across phone reconnects within the same attach (the manager
/// creates a fresh `PhoneSource`, and therefore a fresh counter, on every new attach).
#[derive(Clone)]
pub struct PhoneSource {
    slot: Arc<Slot>,
    epoch: Instant,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl PhoneSource {
    /// Creates a new phone source with the given slot capacity (1 or 2).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Arc::new(Slot {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                capacity: capacity.max(1),
                next_frame_id: std::sync::atomic::AtomicU64::new(0),
            }),
            epoch: Instant::now(),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Pushes a newly decoded frame into the slot, assigning the next `frame_id`.
    ///
    /// Returns `true` if the slot had room, `false` if the oldest buffered frame had to be
    /// evicted to make room — this is the back-pressure signal relayed to the phone as a
    /// `slow_down` message.
    pub fn inject(&self, pixels: bytes::Bytes, width: u32, height: u32) -> bool {
        let source_ts = self.epoch.elapsed().as_secs_f64();
        let frame_id = self
            .slot
            .next_frame_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let frame = Frame::new(pixels, width, height, frame_id, source_ts);

        let mut queue = self.slot.queue.lock();
        let accepted = queue.len() < self.slot.capacity;
        if !accepted {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.slot.notify.notify_one();
        accepted
    }

    /// Marks the source stopped; any pending `next_frame` wakes up and returns `None`.
    pub fn request_stop(&self) {
        self.stopped
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.slot.notify.notify_waiters();
    }
}

#[async_trait]
impl FrameSource for PhoneSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return None;
            }

            if let Some(frame) = self.slot.queue.lock().pop_front() {
                return Some(frame);
            }

            self.slot.notify.notified().await;
        }
    }

    fn stop(&mut self) {
        self.request_stop();
    }

    fn kind(&self) -> &'static str {
        "phone"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_accepts_when_slot_has_room() {
        let source = PhoneSource::new(1);
        assert!(source.inject(bytes::Bytes::new(), 1, 1));
    }

    #[test]
    fn inject_evicts_and_signals_rejection_when_full() {
        let source = PhoneSource::new(1);
        assert!(source.inject(bytes::Bytes::from_static(b"a"), 1, 1));
        // Slot already occupied: this push evicts the previous frame and reports rejection.
        assert!(!source.inject(bytes::Bytes::from_static(b"b"), 1, 1));
        assert_eq!(source.slot.queue.lock().len(), 1);
        assert_eq!(source.slot.queue.lock()[0].frame_id, 1);
    }

    #[tokio::test]
    async fn next_frame_returns_none_after_stop() {
        let mut source = PhoneSource::new(1);
        source.stop();
        assert!(source.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn next_frame_returns_injected_frame_in_order() {
        let mut source = PhoneSource::new(2);
        source.inject(bytes::Bytes::from_static(b"a"), 1, 1);
        source.inject(bytes::Bytes::from_static(b"b"), 1, 1);
        let f1 = source.next_frame().await.unwrap();
        let f2 = source.next_frame().await.unwrap();
        assert_eq!(f1.frame_id, 0);
        assert_eq!(f2.frame_id, 1);
    }

    #[test]
    fn frame_id_continues_across_reconnect_of_same_attach() {
        let source = PhoneSource::new(1);
        source.inject(bytes::Bytes::from_static(b"a"), 1, 1);
        // Simulates the same attach's slot being reused by a second phone connection.
        let reconnected = source.clone();
        reconnected.inject(bytes::Bytes::from_static(b"b"), 1, 1);
        assert_eq!(source.slot.queue.lock()[0].frame_id, 1);
    }
}
