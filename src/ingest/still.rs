//! Single still-image source.
//!
//! Decodes one image file (JPEG, PNG, BMP) into a single frame at timestamp
//! zero, then reports exhaustion.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::FrameSource;
use crate::frame::Frame;

pub struct ImageSource {
    path: PathBuf,
    image: Option<image::RgbImage>,
    delivered: bool,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: None,
            delivered: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for ImageSource {
    /// Decodes the file so unreadable images fail before any frame is processed.
    fn connect(&mut self) -> Result<()> {
        let decoded = image::open(&self.path)
            .with_context(|| format!("failed to read image {}", self.path.display()))?;
        let rgb = decoded.into_rgb8();
        log::info!(
            "ImageSource: loaded {} ({}x{})",
            self.path.display(),
            rgb.width(),
            rgb.height()
        );
        self.image = Some(rgb);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.delivered {
            return Ok(None);
        }
        let image = self
            .image
            .take()
            .context("image source not connected; call connect() first")?;
        self.delivered = true;
        Frame::from_rgb_image(image, 0, Duration::ZERO).map(Some)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn frames_captured(&self) -> u64 {
        u64::from(self.delivered)
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(1)
    }
}
