//! Scripted in-memory source for tests

use std::collections::VecDeque;

use super::{
    DecodeError, DecodedFrame, FrameView, MediaSource, PixelLayout, PlaneRef, SourceError,
    StreamGeometry, StreamIndex, StreamPacket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Planar picture with chroma planes sized for its layout
#[derive(Debug, Clone)]
pub struct MemoryFrame {
    width: usize,
    height: usize,
    layout: PixelLayout,
    planes: [Vec<u8>; 3],
    strides: [usize; 3],
}

impl MemoryFrame {
    /// Uniform picture with the given luma and neutral chroma
    pub fn solid(width: usize, height: usize, layout: PixelLayout, luma: u8) -> Self {
        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        let (planes, strides) = match layout {
            PixelLayout::Yuv420p | PixelLayout::Yuvj420p => (
                [
                    vec![luma; width * height],
                    vec![128; cw * ch],
                    vec![128; cw * ch],
                ],
                [width, cw, cw],
            ),
            PixelLayout::Nv12 => (
                [vec![luma; width * height], vec![128; cw * 2 * ch], Vec::new()],
                [width, cw * 2, 0],
            ),
            PixelLayout::Gray8 | PixelLayout::Unsupported => (
                [vec![luma; width * height], Vec::new(), Vec::new()],
                [width, 0, 0],
            ),
        };
        Self {
            width,
            height,
            layout,
            planes,
            strides,
        }
    }
}

impl DecodedFrame for MemoryFrame {
    fn with_view<R>(&self, f: impl FnOnce(&FrameView<'_>) -> R) -> R {
        let (planes, strides) = (&self.planes, self.strides);
        let plane = move |i: usize| PlaneRef {
            data: planes[i].as_slice(),
            stride: strides[i],
        };
        f(&FrameView {
            width: self.width,
            height: self.height,
            layout: self.layout,
            planes: [plane(0), plane(1), plane(2)],
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPacket {
    stream: StreamIndex,
    frame: Option<MemoryFrame>,
}

impl StreamPacket for MemoryPacket {
    fn stream_index(&self) -> StreamIndex {
        self.stream
    }
}

/// Source whose packets, frames and failures are scripted up front
pub struct MemorySource {
    streams: Vec<StreamKind>,
    geometry: StreamGeometry,
    packets: VecDeque<MemoryPacket>,
    delayed: VecDeque<MemoryFrame>,
    probed: bool,
    selected: Option<StreamIndex>,
    decoder_open: bool,
    unsupported_codec: bool,
    fail_decode_at: Option<u64>,
    exact_exhaustion: bool,
    decode_calls: u64,
    dropped: u64,
}

impl MemorySource {
    /// Single video stream with the given declared geometry and no packets
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            streams: vec![StreamKind::Video],
            geometry: StreamGeometry {
                width,
                height,
                layout: PixelLayout::Yuv420p,
            },
            packets: VecDeque::new(),
            delayed: VecDeque::new(),
            probed: false,
            selected: None,
            decoder_open: false,
            unsupported_codec: false,
            fail_decode_at: None,
            exact_exhaustion: true,
            decode_calls: 0,
            dropped: 0,
        }
    }

    /// Single video stream carrying `frames` packets, one frame each
    pub fn with_frames(width: usize, height: usize, frames: usize) -> Self {
        let mut source = Self::new(width, height);
        for _ in 0..frames {
            source.push_frame(MemoryFrame::solid(width, height, PixelLayout::Yuv420p, 128));
        }
        source
    }

    pub fn with_streams(mut self, streams: Vec<StreamKind>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_unsupported_codec(mut self) -> Self {
        self.unsupported_codec = true;
        self
    }

    /// Fail the `n`th decode call (1-based)
    pub fn failing_decode_at(mut self, n: u64) -> Self {
        self.fail_decode_at = Some(n);
        self
    }

    /// Report `n` frames discarded inside the decoder
    pub fn dropping_frames(mut self, n: u64) -> Self {
        self.dropped = n;
        self
    }

    /// Only learn about the end of the container by reading past it
    pub fn without_exhaustion_hint(mut self) -> Self {
        self.exact_exhaustion = false;
        self
    }

    fn video_stream(&self) -> StreamIndex {
        self.streams
            .iter()
            .position(|kind| *kind == StreamKind::Video)
            .unwrap_or(0)
    }

    pub fn push_frame(&mut self, frame: MemoryFrame) {
        let stream = self.video_stream();
        self.packets.push_back(MemoryPacket {
            stream,
            frame: Some(frame),
        });
    }

    /// Video packet that does not complete a frame
    pub fn push_partial(&mut self) {
        let stream = self.video_stream();
        self.packets.push_back(MemoryPacket {
            stream,
            frame: None,
        });
    }

    pub fn push_foreign(&mut self, stream: StreamIndex) {
        self.packets.push_back(MemoryPacket {
            stream,
            frame: None,
        });
    }

    /// Frame held back by the decoder until it is drained
    pub fn push_delayed(&mut self, frame: MemoryFrame) {
        self.delayed.push_back(frame);
    }

    pub fn decode_calls(&self) -> u64 {
        self.decode_calls
    }
}

impl MediaSource for MemorySource {
    type Packet = MemoryPacket;
    type Frame = MemoryFrame;

    fn find_streams(&mut self) -> Result<(), SourceError> {
        self.probed = true;
        Ok(())
    }

    fn select_video_stream(&mut self) -> Result<StreamIndex, SourceError> {
        if !self.probed {
            return Err(SourceError::NotReady("find_streams"));
        }
        let index = self
            .streams
            .iter()
            .position(|kind| *kind == StreamKind::Video)
            .ok_or(SourceError::NoVideoStream)?;
        self.selected = Some(index);
        Ok(index)
    }

    fn open_decoder(&mut self, stream: StreamIndex) -> Result<StreamGeometry, SourceError> {
        if self.selected != Some(stream) {
            return Err(SourceError::NotReady("select_video_stream"));
        }
        if self.unsupported_codec {
            return Err(SourceError::UnsupportedCodec("memory/test".to_string()));
        }
        self.decoder_open = true;
        Ok(self.geometry)
    }

    fn read_packet(&mut self) -> Result<Option<MemoryPacket>, SourceError> {
        Ok(self.packets.pop_front())
    }

    fn decode(&mut self, packet: MemoryPacket) -> Result<Option<MemoryFrame>, DecodeError> {
        if !self.decoder_open {
            return Err(DecodeError::NotOpen);
        }
        self.decode_calls += 1;
        if self.fail_decode_at == Some(self.decode_calls) {
            return Err(DecodeError::Decode("scripted failure".to_string()));
        }
        Ok(packet.frame)
    }

    fn drain(&mut self) -> Result<Option<MemoryFrame>, DecodeError> {
        if !self.decoder_open {
            return Err(DecodeError::NotOpen);
        }
        Ok(self.delayed.pop_front())
    }

    fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    fn is_exhausted(&self) -> bool {
        self.exact_exhaustion && self.packets.is_empty() && self.delayed.is_empty()
    }
}
