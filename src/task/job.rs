//! Periodic decode/convert job
//!
//! One invocation per release: read packets from the selected stream, decode
//! them and convert every decoded frame, up to a fixed quota of frames. All
//! state that survives between invocations lives in [`JobState`].

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::health::TaskHealth;
use crate::media::{FrameStage, MediaSource, StreamIndex, StreamPacket};

/// Frames decoded per invocation unless configured otherwise
pub const DEFAULT_FRAME_QUOTA: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Continue,
    Terminate,
}

/// Number of frames decoded since the task started; never decreases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameCursor(u64);

impl FrameCursor {
    pub fn frames(&self) -> u64 {
        self.0
    }

    fn advance(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Display for FrameCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the job touches between releases
pub struct JobState<S: MediaSource> {
    source: S,
    stream: StreamIndex,
    frames: FrameStage<S::Frame>,
    cursor: FrameCursor,
    health: Arc<TaskHealth>,
    /// The container returned its last packet
    end_of_packets: bool,
}

impl<S: MediaSource> JobState<S> {
    pub fn new(
        source: S,
        stream: StreamIndex,
        frames: FrameStage<S::Frame>,
        health: Arc<TaskHealth>,
    ) -> Self {
        Self {
            source,
            stream,
            frames,
            cursor: FrameCursor::default(),
            health,
            end_of_packets: false,
        }
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn frames(&self) -> &FrameStage<S::Frame> {
        &self.frames
    }

    /// Hand back the source and buffers for teardown
    pub fn into_parts(self) -> (S, FrameStage<S::Frame>) {
        (self.source, self.frames)
    }

    fn accept(&mut self, frame: S::Frame) {
        self.cursor.advance();
        self.health.record_frame_decoded();
        self.frames.store_decoded(frame);
        match self.frames.convert() {
            Ok(()) => self.health.record_frame_converted(),
            Err(e) => {
                self.health.record_conversion_failure();
                warn!("Job: frame {} not converted: {}", self.cursor, e);
            }
        }
    }

    /// Next decoded frame, `None` once neither packets nor buffered frames
    /// remain
    fn next_frame(&mut self) -> Result<Option<S::Frame>, String> {
        loop {
            if self.end_of_packets {
                return self.source.drain().map_err(|e| e.to_string());
            }

            let Some(packet) = self.source.read_packet().map_err(|e| e.to_string())? else {
                debug!("Job: end of packets at frame {}", self.cursor);
                self.end_of_packets = true;
                continue;
            };
            if packet.stream_index() != self.stream {
                self.health.record_packet_skipped();
                continue;
            }
            if let Some(frame) = self.source.decode(packet).map_err(|e| e.to_string())? {
                return Ok(Some(frame));
            }
        }
    }
}

/// The unit of work run once per period
#[derive(Debug, Clone, Copy)]
pub struct PeriodicJob {
    quota: u32,
}

impl PeriodicJob {
    /// A quota of zero is raised to one frame
    pub fn new(quota: u32) -> Self {
        Self {
            quota: quota.max(1),
        }
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    pub fn invoke<S: MediaSource>(&self, state: &mut JobState<S>) -> JobOutcome {
        let outcome = self.decode_quota(state);
        state
            .health
            .record_frames_dropped(state.source.frames_dropped());
        outcome
    }

    fn decode_quota<S: MediaSource>(&self, state: &mut JobState<S>) -> JobOutcome {
        let mut decoded = 0;
        while decoded < self.quota {
            match state.next_frame() {
                Ok(Some(frame)) => {
                    decoded += 1;
                    state.accept(frame);
                }
                Ok(None) => {
                    info!("Job: source exhausted after {} frames", state.cursor);
                    return JobOutcome::Terminate;
                }
                Err(e) => {
                    state.health.record_decode_failure();
                    error!("Job: stopping at frame {}: {}", state.cursor, e);
                    return JobOutcome::Terminate;
                }
            }
        }

        if state.source.is_exhausted() {
            info!("Job: source exhausted after {} frames", state.cursor);
            JobOutcome::Terminate
        } else {
            JobOutcome::Continue
        }
    }
}

impl Default for PeriodicJob {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_QUOTA)
    }
}
