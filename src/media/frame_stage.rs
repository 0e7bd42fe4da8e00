use std::collections::TryReserveError;

use thiserror::Error;

use super::convert::{ConversionError, TargetFormat, convert_frame};
use super::DecodedFrame;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot size a {width}x{height} frame buffer")]
    ZeroGeometry { width: usize, height: usize },
    #[error("frame buffer size for {width}x{height} overflows")]
    Overflow { width: usize, height: usize },
    #[error("failed to allocate {size} bytes for the converted frame: {source}")]
    OutOfMemory {
        size: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Converted-frame buffer
///
/// Sized exactly once from the stream geometry and never resized. Pixel data
/// is tightly packed (`stride == width * bytes_per_pixel`) and only reachable
/// through bounds-checked accessors.
#[derive(Debug)]
pub struct ConvertedFrame {
    width: usize,
    height: usize,
    format: TargetFormat,
    data: Box<[u8]>,
}

impl ConvertedFrame {
    fn allocate(width: usize, height: usize, format: TargetFormat) -> Result<Self, AllocationError> {
        if width == 0 || height == 0 {
            return Err(AllocationError::ZeroGeometry { width, height });
        }
        let size = format
            .buffer_size(width, height)
            .ok_or(AllocationError::Overflow { width, height })?;

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|source| AllocationError::OutOfMemory { size, source })?;
        data.resize(size, 0);

        Ok(Self {
            width,
            height,
            format,
            data: data.into_boxed_slice(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.width * self.format.bytes_per_pixel()
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row(&self, y: usize) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.stride();
        self.data.get(y * stride..(y + 1) * stride)
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        self.row(y)?.get(x * bpp..(x + 1) * bpp)
    }
}

/// Owner of the decode/convert working buffers
///
/// Everything is allocated in [`setup`](Self::setup), before the task enters
/// real-time mode, and released by [`teardown`](Self::teardown), which
/// consumes the stage.
pub struct FrameStage<F> {
    decoded: Option<F>,
    converted: ConvertedFrame,
}

impl<F: DecodedFrame> FrameStage<F> {
    pub fn setup(width: usize, height: usize, format: TargetFormat) -> Result<Self, AllocationError> {
        let converted = ConvertedFrame::allocate(width, height, format)?;
        log::debug!(
            "FrameStage: {}x{} {} buffer of {} bytes",
            width,
            height,
            format,
            converted.len()
        );
        Ok(Self {
            decoded: None,
            converted,
        })
    }

    /// Replace the decoded-frame slot
    pub fn store_decoded(&mut self, frame: F) {
        self.decoded = Some(frame);
    }

    pub fn decoded(&self) -> Option<&F> {
        self.decoded.as_ref()
    }

    pub fn converted(&self) -> &ConvertedFrame {
        &self.converted
    }

    /// Convert the decoded frame into the converted buffer
    ///
    /// A frame whose geometry differs from the buffer's is rejected before
    /// anything is written.
    pub fn convert(&mut self) -> Result<(), ConversionError> {
        let frame = self.decoded.as_ref().ok_or(ConversionError::NoFrame)?;
        let converted = &mut self.converted;
        frame.with_view(|view| {
            let expected = (converted.width, converted.height);
            let actual = (view.width, view.height);
            if expected != actual {
                return Err(ConversionError::GeometryMismatch { expected, actual });
            }
            convert_frame(view, &mut converted.data, converted.format)
        })
    }

    /// Release all buffers; returns the number of converted-buffer bytes freed
    pub fn teardown(self) -> usize {
        let size = self.converted.len();
        drop(self);
        size
    }
}
