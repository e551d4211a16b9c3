//! The frame type that flows from a source through the scheduler to subscribers.

use bytes::Bytes;

/// A single decoded image frame.
///
/// `frame_id` is monotonically increasing per source attach and resets to zero whenever
/// the [`crate::manager::SourceManager`] attaches a new source. `pixels` dimensions are
/// source-defined but constant for the lifetime of an attach.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw RGB pixel buffer. Cheap to clone (`Bytes` is refcounted) since every
    /// subscriber and the inference worker each hold their own copy.
    pub pixels: Bytes,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Monotonically increasing id, reset to 0 on each source attach.
    pub frame_id: u64,
    /// Source timestamp in seconds. For `PhoneSource` this is the server's monotonic
    /// clock, never the phone's self-reported timestamp, which is untrusted.
    pub source_ts: f64,
}

impl Frame {
    /// Builds a new frame.
    #[must_use]
    pub fn new(pixels: Bytes, width: u32, height: u32, frame_id: u64, source_ts: f64) -> Self {
        Self {
            pixels,
            width,
            height,
            frame_id,
            source_ts,
        }
    }

    /// Encodes the RGB buffer as a JPEG at `quality`, used both for the inference collaborator
    /// request body and for the raw-stream wire payload sent to viewers.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let buffer = image::RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .ok_or(image::ImageError::Parameter(
                image::error::ParameterError::from_kind(
                    image::error::ParameterErrorKind::DimensionMismatch,
                ),
            ))?;
        let mut out = Vec::new();
        let cursor = std::io::Cursor::new(&mut out);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(cursor, quality);
        buffer.write_with_encoder(encoder)?;
        Ok(out)
    }
}
