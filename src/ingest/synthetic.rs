//! Synthetic frame source.
//!
//! Generates patterned frames at a fixed rate with media-time timestamps.
//! Backs `stub://` webcam and video paths so sessions can run without devices.

use anyhow::Result;
use std::time::Duration;

use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Label reported by `describe`.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second of the simulated clock.
    pub fps: u32,
    /// Stop after this many frames. `None` runs until the session stops.
    pub frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://synthetic".to_string(),
            width: 64,
            height: 48,
            fps: 10,
            frames: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn timestamp_for(&self, index: u64) -> Duration {
        let fps = self.config.fps.max(1) as u64;
        Duration::from_nanos(index.saturating_mul(1_000_000_000) / fps)
    }

    /// Simulates a scene that shifts every 50 frames.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .config
            .frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        let index = self.frame_count;
        let pixels = self.generate_synthetic_pixels();
        self.frame_count += 1;
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            index,
            self.timestamp_for(index),
        )?;
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        self.config.name.clone()
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.config.frames
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(f64::from(self.config.fps.max(1)))
    }
}
