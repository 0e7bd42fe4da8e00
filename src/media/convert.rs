//! Pixel-format conversion into a pre-allocated buffer
//!
//! Converts planar/semi-planar YUV (BT.601, limited or full range) or grayscale
//! pictures into packed RGB variants. The destination is always a
//! caller-owned slice sized once at setup; nothing here allocates, and every
//! plane is validated before the first byte is written.

use std::fmt;

use thiserror::Error;

use super::{FrameView, PlaneRef};

/// Packed output format of the converted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    #[default]
    Rgb24,
    Bgr24,
    Rgba,
}

impl TargetFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TargetFormat::Rgb24 | TargetFormat::Bgr24 => 3,
            TargetFormat::Rgba => 4,
        }
    }

    /// Exact byte size of a tightly packed `width x height` picture
    pub fn buffer_size(&self, width: usize, height: usize) -> Option<usize> {
        width
            .checked_mul(height)?
            .checked_mul(self.bytes_per_pixel())
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetFormat::Rgb24 => "rgb24",
            TargetFormat::Bgr24 => "bgr24",
            TargetFormat::Rgba => "rgba",
        }
    }

    #[inline]
    fn write(&self, px: &mut [u8], (r, g, b): (u8, u8, u8)) {
        match self {
            TargetFormat::Rgb24 => px.copy_from_slice(&[r, g, b]),
            TargetFormat::Bgr24 => px.copy_from_slice(&[b, g, r]),
            TargetFormat::Rgba => px.copy_from_slice(&[r, g, b, 0xFF]),
        }
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(TargetFormat::Rgb24),
            "bgr24" | "bgr" => Ok(TargetFormat::Bgr24),
            "rgba" => Ok(TargetFormat::Rgba),
            other => Err(format!("unsupported target pixel format '{other}'")),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory layout of a decoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Y, U, V planes with 2x2 chroma subsampling
    Yuv420p,
    /// Same planes as `Yuv420p`, full-range (JPEG) levels
    Yuvj420p,
    /// Y plane followed by an interleaved UV plane, 2x2 subsampled
    Nv12,
    /// Single luma plane
    Gray8,
    /// Anything the converter does not handle
    Unsupported,
}

impl PixelLayout {
    pub fn from_name(name: &str) -> Self {
        match name {
            "yuv420p" => PixelLayout::Yuv420p,
            "yuvj420p" => PixelLayout::Yuvj420p,
            "nv12" => PixelLayout::Nv12,
            "gray" | "gray8" => PixelLayout::Gray8,
            _ => PixelLayout::Unsupported,
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelLayout::Yuv420p => "yuv420p",
            PixelLayout::Yuvj420p => "yuvj420p",
            PixelLayout::Nv12 => "nv12",
            PixelLayout::Gray8 => "gray8",
            PixelLayout::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("frame geometry {actual:?} does not match buffer geometry {expected:?}")]
    GeometryMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("unsupported source pixel layout {0}")]
    UnsupportedFormat(PixelLayout),
    #[error("plane {plane} holds {available} bytes, {needed} needed")]
    PlaneTooShort {
        plane: usize,
        needed: usize,
        available: usize,
    },
    #[error("destination holds {available} bytes, {needed} needed")]
    DestinationTooSmall { needed: usize, available: usize },
    #[error("no decoded frame to convert")]
    NoFrame,
}

/// Check that `plane` can supply `rows` rows of `row_bytes` bytes
fn check_plane(
    index: usize,
    plane: &PlaneRef<'_>,
    rows: usize,
    row_bytes: usize,
) -> Result<(), ConversionError> {
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    let needed = plane
        .stride
        .saturating_mul(rows - 1)
        .saturating_add(row_bytes);
    if plane.stride < row_bytes || plane.data.len() < needed {
        return Err(ConversionError::PlaneTooShort {
            plane: index,
            needed,
            available: plane.data.len(),
        });
    }
    Ok(())
}

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 limited-range YCbCr to RGB, 8-bit fixed point
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    (
        clamp((c + 409 * e + 128) >> 8),
        clamp((c - 100 * d - 208 * e + 128) >> 8),
        clamp((c + 516 * d + 128) >> 8),
    )
}

/// BT.601 full-range YCbCr to RGB, 8-bit fixed point
#[inline]
pub fn yuv_full_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = (y as i32) << 8;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    (
        clamp((c + 359 * e + 128) >> 8),
        clamp((c - 88 * d - 183 * e + 128) >> 8),
        clamp((c + 454 * d + 128) >> 8),
    )
}

/// Convert `src` into the packed `dst` buffer
///
/// `dst` is interpreted as `src.height` rows of `src.width * bpp` bytes.
/// Fails without touching `dst` if any plane or the destination is too small.
pub fn convert_frame(
    src: &FrameView<'_>,
    dst: &mut [u8],
    format: TargetFormat,
) -> Result<(), ConversionError> {
    let (w, h) = (src.width, src.height);
    let bpp = format.bytes_per_pixel();
    let dst_stride = w.saturating_mul(bpp);
    let needed = dst_stride.saturating_mul(h);
    if dst.len() < needed {
        return Err(ConversionError::DestinationTooSmall {
            needed,
            available: dst.len(),
        });
    }

    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let [luma, p1, p2] = &src.planes;
    match src.layout {
        PixelLayout::Yuv420p | PixelLayout::Yuvj420p => {
            check_plane(0, luma, h, w)?;
            check_plane(1, p1, ch, cw)?;
            check_plane(2, p2, ch, cw)?;
        }
        PixelLayout::Nv12 => {
            check_plane(0, luma, h, w)?;
            check_plane(1, p1, ch, cw * 2)?;
        }
        PixelLayout::Gray8 => check_plane(0, luma, h, w)?,
        PixelLayout::Unsupported => return Err(ConversionError::UnsupportedFormat(src.layout)),
    }

    if w == 0 {
        return Ok(());
    }
    for (row, out) in dst[..needed].chunks_exact_mut(dst_stride).enumerate() {
        let y_row = &luma.data[row * luma.stride..row * luma.stride + w];
        let crow = row / 2;
        match src.layout {
            PixelLayout::Yuv420p | PixelLayout::Yuvj420p => {
                let to_rgb = if src.layout == PixelLayout::Yuvj420p {
                    yuv_full_to_rgb
                } else {
                    yuv_to_rgb
                };
                let u_row = &p1.data[crow * p1.stride..crow * p1.stride + cw];
                let v_row = &p2.data[crow * p2.stride..crow * p2.stride + cw];
                for (x, px) in out.chunks_exact_mut(bpp).enumerate() {
                    format.write(px, to_rgb(y_row[x], u_row[x / 2], v_row[x / 2]));
                }
            }
            PixelLayout::Nv12 => {
                let uv_row = &p1.data[crow * p1.stride..crow * p1.stride + cw * 2];
                for (x, px) in out.chunks_exact_mut(bpp).enumerate() {
                    let c = (x / 2) * 2;
                    format.write(px, yuv_to_rgb(y_row[x], uv_row[c], uv_row[c + 1]));
                }
            }
            PixelLayout::Gray8 => {
                for (x, px) in out.chunks_exact_mut(bpp).enumerate() {
                    let l = y_row[x];
                    format.write(px, (l, l, l));
                }
            }
            PixelLayout::Unsupported => unreachable!("rejected above"),
        }
    }
    Ok(())
}
