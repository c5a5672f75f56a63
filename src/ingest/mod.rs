//! Frame sources.
//!
//! This module provides the sources a session can pull frames from:
//! - Webcam devices (feature: webcam-v4l2)
//! - Local video files (feature: video-ffmpeg)
//! - Single still images
//! - Synthetic source (`stub://` paths, testing and demos)
//!
//! Every source assigns frame timestamps on the session clock at capture time
//! and hands them out in non-decreasing order. Finite sources report
//! exhaustion with `Ok(None)`; webcam sources run until the session stops.

pub mod still;
pub mod synthetic;
pub mod video;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod video_ffmpeg;
pub mod webcam;

use anyhow::Result;
use std::path::PathBuf;

use crate::frame::Frame;

pub use still::ImageSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use video::{VideoConfig, VideoSource};
pub use webcam::{WebcamConfig, WebcamSource};

/// A lazy sequence of frames.
pub trait FrameSource: Send {
    /// Open the underlying device or file.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame, or `None` once a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human-readable origin (device path, file path, ...).
    fn describe(&self) -> String;

    /// Frames produced so far.
    fn frames_captured(&self) -> u64;

    /// Total number of frames, when the source knows it up front.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }

    /// Nominal frames per second for file and synthetic sources.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }

    fn frame_count_hint(&self) -> Option<u64> {
        (**self).frame_count_hint()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

/// What a session should read from.
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Webcam(WebcamConfig),
    Video(VideoConfig),
    Image(PathBuf),
    Synthetic(SyntheticConfig),
}

/// Build the source described by `spec`. The caller still has to `connect`.
pub fn open_source(spec: SourceSpec) -> Result<Box<dyn FrameSource>> {
    Ok(match spec {
        SourceSpec::Webcam(config) => Box::new(WebcamSource::new(config)?),
        SourceSpec::Video(config) => Box::new(VideoSource::new(config)?),
        SourceSpec::Image(path) => Box::new(ImageSource::new(path)),
        SourceSpec::Synthetic(config) => Box::new(SyntheticSource::new(config)),
    })
}
