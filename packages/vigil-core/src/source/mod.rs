//! Frame sources: the polymorphic producer side of the pipeline.
//!
//! A [`FrameSource`] is anything the [`crate::scheduler::PacedScheduler`] can pull frames
//! from. Two variants exist: [`FileSource`] (pull, decodes a media container) and
//! [`PhoneSource`] (push, fed by the phone ingress WebSocket). Both share the same trait so
//! the scheduler and [`crate::manager::SourceManager`] stay generic over the bound source.

mod file_source;
mod phone_source;

pub use file_source::{EofBehavior, FileSource};
pub use phone_source::PhoneSource;

use async_trait::async_trait;

use crate::frame::Frame;

/// Capability set shared by every frame source variant.
///
/// `next_frame` is the only blocking point: it suspends until a frame is available or the
/// source is exhausted/stopped, at which point it returns `None` and the scheduler loop exits.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Pulls the next frame, or `None` if the source has closed.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Signals the source to stop producing and release any underlying resources.
    fn stop(&mut self);

    /// A short label for logging (`"file"`, `"phone"`).
    fn kind(&self) -> &'static str;
}
