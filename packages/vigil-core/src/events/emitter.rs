//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{InferenceEvent, PhoneEvent, SourceEvent, ViewerEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients (WebSocket, SSE, etc.).
pub trait EventEmitter: Send + Sync {
    /// Emits a source lifecycle event.
    fn emit_source(&self, event: SourceEvent);

    /// Emits an inference collaborator event.
    fn emit_inference(&self, event: InferenceEvent);

    /// Emits a viewer registry event.
    fn emit_viewer(&self, event: ViewerEvent);

    /// Emits a phone ingress event.
    fn emit_phone(&self, event: PhoneEvent);
}

/// No-op emitter for headless operation or testing.
///
/// Events are silently discarded. In this server, events are typically delivered only via
/// WebSocket to connected clients, so this no-op emitter is used when there's no need to emit
/// to a separate UI frontend.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_source(&self, _event: SourceEvent) {}
    fn emit_inference(&self, _event: InferenceEvent) {}
    fn emit_viewer(&self, _event: ViewerEvent) {}
    fn emit_phone(&self, _event: PhoneEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Useful for debugging event flow or in development
/// environments.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_source(&self, event: SourceEvent) {
        tracing::debug!(?event, "source_event");
    }

    fn emit_inference(&self, event: InferenceEvent) {
        tracing::debug!(?event, "inference_event");
    }

    fn emit_viewer(&self, event: ViewerEvent) {
        tracing::debug!(?event, "viewer_event");
    }

    fn emit_phone(&self, event: PhoneEvent) {
        tracing::debug!(?event, "phone_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        source_count: AtomicUsize,
        inference_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                source_count: AtomicUsize::new(0),
                inference_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_source(&self, _event: SourceEvent) {
            self.source_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_inference(&self, _event: InferenceEvent) {
            self.inference_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_viewer(&self, _event: ViewerEvent) {}
        fn emit_phone(&self, _event: PhoneEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_source(SourceEvent::Detached { timestamp: 0 });
        emitter.emit_source(SourceEvent::WatchdogTimeout {
            seconds_since_last_frame: 16.0,
            timestamp: 0,
        });
        emitter.emit_inference(InferenceEvent::Recovered { timestamp: 0 });

        assert_eq!(emitter.source_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.inference_count.load(Ordering::SeqCst), 1);
    }
}
