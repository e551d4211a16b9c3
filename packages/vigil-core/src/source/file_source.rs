//! Decodes a video file into a sequence of RGB frames at the container's native rate.

use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg::format::context::Input;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

use crate::frame::Frame;
use crate::source::FrameSource;

/// Behavior when the underlying file reaches end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofBehavior {
    /// Seek back to the start and keep decoding (the default).
    Loop,
    /// Close the sequence; the scheduler observes closure and exits.
    Terminate,
}

/// A file-backed [`FrameSource`] that decodes a video container in order.
///
/// `frame_id` is assigned starting at 0 and increments per decoded frame; it is scoped to
/// this attach only, never to the file's own internal timestamps.
pub struct FileSource {
    path: String,
    eof_behavior: EofBehavior,
    input: Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    next_frame_id: u64,
    stopped: bool,
}

impl FileSource {
    /// Opens `path` for decoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be opened, has no video stream, or the
    /// decoder/scaler cannot be constructed.
    pub fn open(path: &str, eof_behavior: EofBehavior) -> Result<Self, ffmpeg::Error> {
        let input = ffmpeg::format::input(&path)?;
        let stream = input
            .streams()
            .best(MediaType::Video)
            .ok_or(ffmpeg::Error::StreamNotFound)?;
        let stream_index = stream.index();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )?;

        Ok(Self {
            path: path.to_string(),
            eof_behavior,
            input,
            stream_index,
            decoder,
            scaler,
            next_frame_id: 0,
            stopped: false,
        })
    }

    fn rewind(&mut self) -> Result<(), ffmpeg::Error> {
        self.input.seek(0, ..)?;
        self.decoder.flush();
        self.next_frame_id = 0;
        Ok(())
    }

    /// Pulls and decodes the next raw frame from the container, looping or terminating on
    /// EOF per `eof_behavior`. Returns `None` only when terminating at EOF or on
    /// unrecoverable decode error.
    fn decode_next(&mut self) -> Option<Frame> {
        loop {
            let mut decoded = VideoFrame::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = VideoFrame::empty();
                if self.scaler.run(&decoded, &mut rgb).is_err() {
                    continue;
                }
                let frame_id = self.next_frame_id;
                self.next_frame_id += 1;
                let pts_secs = decoded
                    .timestamp()
                    .map(|pts| pts as f64 * f64::from(self.decoder.time_base()))
                    .unwrap_or(0.0);
                return Some(Frame::new(
                    Bytes::copy_from_slice(rgb.data(0)),
                    rgb.width(),
                    rgb.height(),
                    frame_id,
                    pts_secs,
                ));
            }

            match self.input.packets().find(|(s, _)| s.index() == self.stream_index) {
                Some((_, packet)) => {
                    if self.decoder.send_packet(&packet).is_err() {
                        continue;
                    }
                }
                None => {
                    // EOF: flush any buffered frames, then loop or terminate.
                    let _ = self.decoder.send_eof();
                    let mut decoded = VideoFrame::empty();
                    if self.decoder.receive_frame(&mut decoded).is_ok() {
                        let mut rgb = VideoFrame::empty();
                        if self.scaler.run(&decoded, &mut rgb).is_ok() {
                            let frame_id = self.next_frame_id;
                            self.next_frame_id += 1;
                            return Some(Frame::new(
                                Bytes::copy_from_slice(rgb.data(0)),
                                rgb.width(),
                                rgb.height(),
                                frame_id,
                                0.0,
                            ));
                        }
                    }

                    return match self.eof_behavior {
                        EofBehavior::Loop => {
                            if self.rewind().is_err() {
                                log::warn!("[FileSource] Failed to rewind {}", self.path);
                                None
                            } else {
                                continue;
                            }
                        }
                        EofBehavior::Terminate => None,
                    };
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for FileSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        // Decoding is CPU-bound and synchronous by nature of the ffmpeg bindings. At the
        // target frame rates this module is built for, a single decode is short enough
        // that running it inline costs less than handing the non-`Send` decoder state
        // across a `spawn_blocking` boundary.
        let frame = self.decode_next();
        if frame.is_none() {
            log::info!("[FileSource] {} exhausted (terminate on EOF)", self.path);
        }
        frame
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
