//! Media source and frame conversion
//!
//! The periodic job only sees the [`MediaSource`] trait: a lazy, finite
//! sequence of encoded packets plus a decoder that turns them into frames.
//! Container and codec handling live in the FFmpeg implementation.

pub mod convert;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame_stage;
#[cfg(test)]
pub mod memory;

pub use convert::{ConversionError, PixelLayout, TargetFormat};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use frame_stage::{AllocationError, ConvertedFrame, FrameStage};

use std::path::PathBuf;
use thiserror::Error;

/// Index of a stream inside the container
pub type StreamIndex = usize;

/// Fatal setup and demux errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unable to open video file {path}: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("unable to read stream information: {0}")]
    Probe(String),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("could not open codec: {0}")]
    DecoderOpen(String),
    #[error("failed to read packet: {0}")]
    Read(String),
    #[error("source used before {0}")]
    NotReady(&'static str),
}

/// Decode errors; fatal for the job that hits them
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder is not open")]
    NotOpen,
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Width, height and pixel layout declared by the selected stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: usize,
    pub height: usize,
    pub layout: PixelLayout,
}

/// One plane of a decoded picture
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
}

impl<'a> PlaneRef<'a> {
    pub const EMPTY: Self = PlaneRef {
        data: &[],
        stride: 0,
    };
}

/// Borrowed view of a decoded picture
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub layout: PixelLayout,
    pub planes: [PlaneRef<'a>; 3],
}

/// A fully reconstructed frame produced by a decoder
pub trait DecodedFrame {
    /// Run `f` with a borrowed view of the picture
    fn with_view<R>(&self, f: impl FnOnce(&FrameView<'_>) -> R) -> R;
}

/// Encoded packet read from the container
pub trait StreamPacket {
    fn stream_index(&self) -> StreamIndex;
}

/// Container plus decoder consumed by the periodic job
pub trait MediaSource {
    type Packet: StreamPacket;
    type Frame: DecodedFrame;

    /// Probe the container for its streams
    fn find_streams(&mut self) -> Result<(), SourceError>;

    /// Index of the first video stream
    fn select_video_stream(&mut self) -> Result<StreamIndex, SourceError>;

    /// Open a decoder for `stream` and report its declared geometry
    fn open_decoder(&mut self, stream: StreamIndex) -> Result<StreamGeometry, SourceError>;

    /// Next packet, `None` once the container is exhausted
    fn read_packet(&mut self) -> Result<Option<Self::Packet>, SourceError>;

    /// Feed one packet; returns a frame once one is fully reconstructed
    fn decode(&mut self, packet: Self::Packet) -> Result<Option<Self::Frame>, DecodeError>;

    /// Frames still buffered in the decoder after the last packet
    fn drain(&mut self) -> Result<Option<Self::Frame>, DecodeError> {
        Ok(None)
    }

    /// Decoded frames discarded inside the source so far
    fn frames_dropped(&self) -> u64 {
        0
    }

    /// True when the source knows that neither packets nor buffered frames
    /// remain. Sources that can only find out by reading keep the default.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Release the container and decoder
    fn close(self)
    where
        Self: Sized,
    {
    }
}
