pub mod convert;
pub mod ffmpeg;
pub mod frame_data;
#[cfg(feature = "opencv")]
pub mod video;

#[cfg(test)]
pub mod scripted;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::player::PlayerState;

pub use ffmpeg::FfmpegSource;
pub use frame_data::{Frame, PixelFormat, StreamInfo, TARGET_FORMAT};
#[cfg(feature = "opencv")]
pub use video::OpenCvSource;

/// What a source produced for one decodable unit.
pub enum SourceEvent<'a> {
    Frame(&'a Frame),
    EndOfStream,
    /// The unit could not be decoded. The stream itself is still usable.
    DecodeError(anyhow::Error),
}

/// A negotiated, open stream of decoded video frames.
///
/// Implementations are opened by their own constructors, which perform the
/// probe/codec negotiation and fail with a [`StartupError`]. After that the
/// source is owned by the producer thread alone.
pub trait FrameSource: Send {
    fn stream_info(&self) -> &StreamInfo;

    /// Decodes the next unit. The returned frame borrows the source's own
    /// buffer and is only valid until the next call.
    fn next_unit(&mut self) -> SourceEvent<'_>;

    /// Releases decoder resources. Safe to call more than once.
    fn close(&mut self);
}

/// Fatal errors before playback starts. Nothing has been spawned when one is returned.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not open input {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("no video stream found in {}", .0.display())]
    NoVideoTrack(PathBuf),

    #[error("unsupported codec `{0}`")]
    UnsupportedCodec(String),

    #[error("could not open codec `{codec}`: {reason}")]
    CodecOpen { codec: String, reason: String },

    #[error("failed to initialise renderer: {0:#}")]
    Renderer(anyhow::Error),

    #[error("failed to start decode worker")]
    Worker(#[source] std::io::Error),

    #[error("player cannot start from state {0:?}")]
    InvalidState(PlayerState),
}
