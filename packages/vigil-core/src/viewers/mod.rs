//! Subscriber tracking and non-blocking fan-out.

mod registry;

pub use registry::{ConnectionGuard, OutboundMessage, Viewer, ViewerInfo, ViewerRegistry};
