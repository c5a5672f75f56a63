//! Frame container shared by sources, detectors and annotation.
//!
//! - `Frame`: RGB8 raster plus its position in the session (index, timestamp).
//!
//! The timestamp is an offset on the session clock, assigned by the source at
//! capture time. Webcam sources use monotonic wall time since connect; file
//! sources use media time (index / fps). The debouncer consumes these offsets
//! directly, so sources must hand out non-decreasing timestamps.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::time::Duration;

/// Bytes per pixel for every frame (packed RGB).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded frame in packed RGB8 layout.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position within the session.
    pub index: u64,
    /// Offset from session start.
    pub timestamp: Duration,
}

impl Frame {
    /// Build a frame, checking that the buffer matches the dimensions.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} expects {} RGB bytes, received {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            timestamp,
        })
    }

    /// Frame filled with a single colour. Used by synthetic sources.
    pub fn solid(
        width: u32,
        height: u32,
        rgb: [u8; 3],
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let len = expected_len(width, height)?;
        let pixels = rgb.iter().copied().cycle().take(len).collect();
        Self::new(pixels, width, height, index, timestamp)
    }

    /// Convert a decoded image into a frame.
    pub fn from_rgb_image(image: RgbImage, index: u64, timestamp: Duration) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, index, timestamp)
    }

    /// Pack RGB24 rows that are `stride` bytes apart (row padding is dropped).
    pub fn from_rgb_rows(
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let row_bytes = width as usize * CHANNELS;
        if stride < row_bytes {
            return Err(anyhow!(
                "RGB stride {} is shorter than a {}-pixel row",
                stride,
                width
            ));
        }
        let mut pixels = Vec::with_capacity(expected_len(width, height)?);
        for row in 0..height as usize {
            let start = row * stride;
            let line = data
                .get(start..start + row_bytes)
                .ok_or_else(|| anyhow!("RGB buffer ends before row {}", row))?;
            pixels.extend_from_slice(line);
        }
        Self::new(pixels, width, height, index, timestamp)
    }

    /// Convert packed YUYV 4:2:2 (BT.601, limited range) rows to RGB.
    pub fn from_yuyv(
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let row_bytes = (width as usize).div_ceil(2) * 4;
        if stride < row_bytes {
            return Err(anyhow!(
                "YUYV stride {} is shorter than a {}-pixel row",
                stride,
                width
            ));
        }
        let mut pixels = Vec::with_capacity(expected_len(width, height)?);
        for row in 0..height as usize {
            let start = row * stride;
            let line = data
                .get(start..start + row_bytes)
                .ok_or_else(|| anyhow!("YUYV buffer ends before row {}", row))?;
            for x in 0..width as usize {
                let pair = &line[(x / 2) * 4..(x / 2) * 4 + 4];
                let y = if x % 2 == 0 { pair[0] } else { pair[2] };
                pixels.extend_from_slice(&yuv_to_rgb(y, pair[1], pair[3]));
            }
        }
        Self::new(pixels, width, height, index, timestamp)
    }

    /// Decode one JPEG image (e.g. an MJPG capture buffer).
    pub fn from_jpeg(bytes: &[u8], index: u64, timestamp: Duration) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .context("decode jpeg frame")?;
        Self::from_rgb_image(image.into_rgb8(), index, timestamp)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy into an `image` buffer for drawing and encoding.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
