//! Local video file source.
//!
//! This module provides `VideoSource` for reading frames from local video files.
//! Timestamps are media time (frame index / stream fps), so a file processed
//! faster or slower than real time still sees the same sustain and cooldown
//! windows.
//!
//! `stub://` paths produce synthetic frames; real files need the
//! video-ffmpeg feature.

use anyhow::{anyhow, bail, Result};

use super::synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "video-ffmpeg")]
use super::video_ffmpeg::FfmpegVideoSource;
use super::FrameSource;
use crate::frame::Frame;

/// Used when the container does not report a usable frame rate.
pub const FALLBACK_FPS: f64 = 25.0;

/// Frames generated for `stub://` video paths.
const SYNTHETIC_VIDEO_FRAMES: u64 = 250;

/// Configuration for a local video file.
#[derive(Clone, Debug)]
pub struct VideoConfig {
    /// Local file path (e.g., "recordings/hallway.mp4").
    pub path: String,
    /// Frame rate assumed when the stream reports none.
    pub fallback_fps: f64,
}

impl VideoConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fallback_fps: FALLBACK_FPS,
        }
    }
}

/// Local video frame source.
pub struct VideoSource {
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegVideoSource),
}

impl VideoSource {
    pub fn new(config: VideoConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video input only supports local paths (no URL schemes)"
            ));
        }
        if !config.fallback_fps.is_finite() || config.fallback_fps <= 0.0 {
            bail!(
                "fallback fps must be a positive number, got {}",
                config.fallback_fps
            );
        }
        if config.path.starts_with("stub://") {
            let fps = config.fallback_fps.round().max(1.0) as u32;
            Ok(Self {
                backend: VideoBackend::Synthetic(SyntheticSource::new(SyntheticConfig {
                    name: config.path,
                    fps,
                    frames: Some(SYNTHETIC_VIDEO_FRAMES),
                    ..SyntheticConfig::default()
                })),
            })
        } else {
            #[cfg(feature = "video-ffmpeg")]
            {
                Ok(Self {
                    backend: VideoBackend::Ffmpeg(FfmpegVideoSource::new(config)?),
                })
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                Err(anyhow!(
                    "video input requires the video-ffmpeg feature"
                ))
            }
        }
    }
}

impl FrameSource for VideoSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.path().to_string(),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.frames_captured(),
        }
    }

    fn frame_count_hint(&self) -> Option<u64> {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.frame_count_hint(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.frame_count_hint(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.frame_rate(),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => Some(source.fps()),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        let err = VideoSource::new(VideoConfig::new("rtsp://camera/stream"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("local paths"));
        assert!(VideoSource::new(VideoConfig::new("  ")).is_err());
    }

    #[test]
    fn stub_video_is_finite_with_media_time() -> Result<()> {
        let mut source = VideoSource::new(VideoConfig::new("stub://hallway"))?;
        source.connect()?;
        let mut last = None;
        while let Some(frame) = source.next_frame()? {
            last = Some(frame);
        }
        let last = last.expect("stub video has frames");
        assert_eq!(source.frames_captured(), SYNTHETIC_VIDEO_FRAMES);
        assert_eq!(last.index, SYNTHETIC_VIDEO_FRAMES - 1);
        // 249 frames at 25 fps
        assert_eq!(last.timestamp.as_millis(), 9_960);
        Ok(())
    }

    #[test]
    fn unusable_fallback_fps_is_rejected() {
        for fps in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = VideoConfig {
                fallback_fps: fps,
                ..VideoConfig::new("stub://hallway")
            };
            let err = VideoSource::new(config).err().expect("fps rejected");
            assert!(err.to_string().contains("fallback fps"), "{}", err);
        }

        let config = VideoConfig {
            fallback_fps: 12.0,
            ..VideoConfig::new("stub://hallway")
        };
        assert_eq!(VideoSource::new(config).unwrap().frame_rate(), Some(12.0));
    }
}
