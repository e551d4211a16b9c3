//! Fixed wire-level constants.
//!
//! Everything here is part of the wire contract between this server and its phone/browser
//! clients or the inference collaborator — changing a value changes what those other parties
//! must also agree on. Tunables that operators are expected to adjust per deployment live in
//! [`crate::config::Config`] instead.

/// Identifies this server to the browser extension / phone app's own discovery probe.
///
/// The phone app probes `/health` and expects this exact string to identify a valid server.
pub const SERVICE_ID: &str = "vigil-core";

/// Human-readable application name used nowhere except diagnostics.
pub const APP_NAME: &str = "Vigil";

/// JPEG quality used when encoding a frame for the inference collaborator.
pub const INFERENCE_JPEG_QUALITY: u8 = 85;

/// JPEG quality used when encoding a frame for the raw-stream fan-out to subscribers.
pub const RAW_STREAM_JPEG_QUALITY: u8 = 85;

/// A phone upload whose inter-frame interval exceeds `PHONE_THROTTLE_FACTOR * nominal_interval`
/// triggers a `{status: "throttle"}` feedback message to the uploader.
pub const PHONE_THROTTLE_FACTOR: f64 = 0.5;

/// File extensions accepted by `POST /api/source/upload`.
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Capacity of the domain-event broadcast channel (source/inference/viewer/phone events).
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
