//! FFmpeg-backed media source
//!
//! Container probing, packet demuxing and video decoding go through
//! `ac-ffmpeg`. Decoded pictures are handed to the job as they come out of
//! the decoder; their planes are only borrowed, never copied.

use std::collections::VecDeque;
use std::fs::File;
use std::mem;
use std::path::{Path, PathBuf};

use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::Packet;
use log::{debug, info, warn};

use super::{
    DecodeError, DecodedFrame, FrameView, MediaSource, PixelLayout, PlaneRef, SourceError,
    StreamGeometry, StreamIndex, StreamPacket,
};

/// Frames held between a packet push and the job taking them
const BACKLOG_CAPACITY: usize = 16;

enum Container {
    Opened(Demuxer<File>),
    Probed(DemuxerWithStreamInfo<File>),
    Closed,
}

pub struct FfmpegSource {
    path: PathBuf,
    container: Container,
    decoder: Option<VideoDecoder>,
    backlog: VecDeque<VideoFrame>,
    end_of_stream: bool,
    flushed: bool,
    dropped: u64,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let open_error = |reason: String| SourceError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let io = IO::from_seekable_read_stream(file);
        let demuxer = Demuxer::builder()
            .build(io)
            .map_err(|e| open_error(e.to_string()))?;

        info!("FfmpegSource: opened {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            container: Container::Opened(demuxer),
            decoder: None,
            backlog: VecDeque::with_capacity(BACKLOG_CAPACITY),
            end_of_stream: false,
            flushed: false,
            dropped: 0,
        })
    }

    fn probed(&mut self) -> Result<&mut DemuxerWithStreamInfo<File>, SourceError> {
        match &mut self.container {
            Container::Probed(demuxer) => Ok(demuxer),
            _ => Err(SourceError::NotReady("find_streams")),
        }
    }

    /// Move every frame the decoder has ready into the backlog
    fn collect_frames(&mut self) -> Result<(), DecodeError> {
        let decoder = self.decoder.as_mut().ok_or(DecodeError::NotOpen)?;
        while let Some(frame) = decoder
            .take()
            .map_err(|e| DecodeError::Decode(e.to_string()))?
        {
            if self.backlog.len() == BACKLOG_CAPACITY {
                self.backlog.pop_front();
                self.dropped += 1;
                warn!(
                    "FfmpegSource: frame backlog full, dropped oldest frame ({} so far)",
                    self.dropped
                );
            }
            self.backlog.push_back(frame);
        }
        Ok(())
    }
}

impl MediaSource for FfmpegSource {
    type Packet = Packet;
    type Frame = VideoFrame;

    fn find_streams(&mut self) -> Result<(), SourceError> {
        let demuxer = match mem::replace(&mut self.container, Container::Closed) {
            Container::Opened(demuxer) => demuxer,
            other => {
                self.container = other;
                return Err(SourceError::NotReady("open"));
            }
        };

        let demuxer = demuxer
            .find_stream_info(None)
            .map_err(|(_, e)| SourceError::Probe(e.to_string()))?;
        debug!(
            "FfmpegSource: {} has {} streams",
            self.path.display(),
            demuxer.streams().len()
        );
        self.container = Container::Probed(demuxer);
        Ok(())
    }

    fn select_video_stream(&mut self) -> Result<StreamIndex, SourceError> {
        let demuxer = self.probed()?;
        demuxer
            .streams()
            .iter()
            .position(|stream| stream.codec_parameters().is_video_codec())
            .ok_or(SourceError::NoVideoStream)
    }

    fn open_decoder(&mut self, stream: StreamIndex) -> Result<StreamGeometry, SourceError> {
        let demuxer = self.probed()?;
        let stream = demuxer
            .streams()
            .get(stream)
            .ok_or(SourceError::NoVideoStream)?;

        let params = stream.codec_parameters();
        let codec = params
            .decoder_name()
            .ok_or_else(|| SourceError::UnsupportedCodec("no decoder available".to_string()))?;
        let video = params
            .as_video_codec_parameters()
            .ok_or(SourceError::NoVideoStream)?;
        let geometry = StreamGeometry {
            width: video.width(),
            height: video.height(),
            layout: PixelLayout::from_name(video.pixel_format().name()),
        };

        let decoder = VideoDecoder::from_stream(stream)
            .and_then(|builder| builder.build())
            .map_err(|e| SourceError::DecoderOpen(e.to_string()))?;

        info!(
            "FfmpegSource: decoder {} opened for {}x{} {}",
            codec, geometry.width, geometry.height, geometry.layout
        );
        self.decoder = Some(decoder);
        Ok(geometry)
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        if self.end_of_stream {
            return Ok(None);
        }
        let packet = self
            .probed()?
            .take()
            .map_err(|e| SourceError::Read(e.to_string()))?;
        if packet.is_none() {
            debug!("FfmpegSource: end of container");
            self.end_of_stream = true;
        }
        Ok(packet)
    }

    fn decode(&mut self, packet: Packet) -> Result<Option<VideoFrame>, DecodeError> {
        // The decoder only accepts input once its pending output is taken
        self.collect_frames()?;
        self.decoder
            .as_mut()
            .ok_or(DecodeError::NotOpen)?
            .push(packet)
            .map_err(|e| DecodeError::Decode(e.to_string()))?;
        self.collect_frames()?;
        Ok(self.backlog.pop_front())
    }

    fn drain(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(Some(frame));
        }
        if self.decoder.is_none() {
            return Ok(None);
        }
        if !self.flushed {
            self.decoder
                .as_mut()
                .ok_or(DecodeError::NotOpen)?
                .flush()
                .map_err(|e| DecodeError::Decode(e.to_string()))?;
            self.flushed = true;
        }
        self.collect_frames()?;
        Ok(self.backlog.pop_front())
    }

    fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    fn is_exhausted(&self) -> bool {
        self.end_of_stream && self.flushed && self.backlog.is_empty()
    }

    fn close(mut self) {
        self.backlog.clear();
        self.decoder = None;
        self.container = Container::Closed;
        info!("FfmpegSource: closed {}", self.path.display());
    }
}

impl StreamPacket for Packet {
    fn stream_index(&self) -> StreamIndex {
        Packet::stream_index(self)
    }
}

impl DecodedFrame for VideoFrame {
    fn with_view<R>(&self, f: impl FnOnce(&FrameView<'_>) -> R) -> R {
        let planes = self.planes();
        let plane = |i: usize| {
            planes
                .get(i)
                .map(|p| PlaneRef {
                    data: p.data(),
                    stride: p.line_size(),
                })
                .unwrap_or(PlaneRef::EMPTY)
        };
        f(&FrameView {
            width: self.width(),
            height: self.height(),
            layout: PixelLayout::from_name(self.pixel_format().name()),
            planes: [plane(0), plane(1), plane(2)],
        })
    }
}
