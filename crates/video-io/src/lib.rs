//! Video plumbing around ffmpeg subprocesses: decoding sources into raw RGB
//! frames on the way in, and the FIFO + transcoder pair on the way out.

pub mod egress;
pub mod ffmpeg;
mod types;

pub use egress::{Transcoder, TranscoderConfig, open_fifo_writer, prepare_fifo, remove_conduit};
pub use ffmpeg::{DecodeOptions, DecoderHandle, FfmpegSource, SourceKind, parse_device_index};
pub use types::{CaptureError, EgressError, Frame};

/// Anything that yields decoded frames in order.
///
/// `Ok(None)` signals a clean end of stream; errors are terminal for the
/// source.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}
