//! Annotated video output.
//!
//! Video sessions hand every annotated frame to a [`FrameRecorder`]; when the
//! source is exhausted the recorder closes `<stem>_annotated_<timestamp>.mp4`
//! in the output directory and the session sends it along with the summary.
//!
//! Encoding needs the video-ffmpeg feature. Without it [`video_recorder`]
//! returns `None` and the session reports completion as text only.

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;

use anyhow::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::annotate::{source_stem, unique_output_path};

#[cfg(feature = "video-ffmpeg")]
pub use self::ffmpeg::FfmpegVideoWriter;

/// Sink for annotated frames.
pub trait FrameRecorder: Send {
    fn record(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush buffered frames and close the file.
    fn finish(&mut self) -> Result<PathBuf>;
}

impl<R: FrameRecorder + ?Sized> FrameRecorder for Box<R> {
    fn record(&mut self, image: &RgbImage) -> Result<()> {
        (**self).record(image)
    }

    fn finish(&mut self) -> Result<PathBuf> {
        (**self).finish()
    }
}

/// Output path for the annotated copy of `source`.
pub fn annotated_video_path(output_dir: &Path, source: &str) -> Result<PathBuf> {
    unique_output_path(
        output_dir,
        &format!("{}_annotated", source_stem(source)),
        "mp4",
    )
}

/// Recorder writing the annotated copy of `source` at `fps`, or `None` when
/// this build cannot encode video.
#[cfg(feature = "video-ffmpeg")]
pub fn video_recorder(
    output_dir: &Path,
    source: &str,
    fps: f64,
) -> Result<Option<Box<dyn FrameRecorder>>> {
    let path = annotated_video_path(output_dir, source)?;
    Ok(Some(Box::new(FfmpegVideoWriter::new(path, fps)?)))
}

#[cfg(not(feature = "video-ffmpeg"))]
pub fn video_recorder(
    _output_dir: &Path,
    source: &str,
    _fps: f64,
) -> Result<Option<Box<dyn FrameRecorder>>> {
    log::warn!(
        "annotated video for {} not written: built without the video-ffmpeg feature",
        source
    );
    Ok(None)
}
