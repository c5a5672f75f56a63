//! Video file decoding using FFmpeg.
//!
//! Frames are decoded in-memory and converted to RGB24. Timestamps are derived
//! from the frame index and the stream's average frame rate.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::video::VideoConfig;
use crate::frame::Frame;

pub(crate) struct FfmpegVideoSource {
    config: VideoConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    total_frames: Option<u64>,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegVideoSource {
    pub(crate) fn new(config: VideoConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
            f64::from(rate.numerator()) / f64::from(rate.denominator())
        } else {
            config.fallback_fps
        };
        if !fps.is_finite() || fps <= 0.0 {
            anyhow::bail!("video '{}' has no usable frame rate ({})", config.path, fps);
        }
        let total_frames = u64::try_from(input_stream.frames()).ok().filter(|n| *n > 0);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            total_frames,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "VideoSource: opened {} ({:.2} fps, {} frames)",
            self.config.path,
            self.fps,
            self.total_frames
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut sent = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                sent = true;
                break;
            }
            if !sent {
                // Flush frames still buffered in the decoder.
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;

        let index = self.frame_count;
        self.frame_count += 1;
        let timestamp = Duration::try_from_secs_f64(index as f64 / self.fps)
            .with_context(|| format!("frame {} has no valid media time at {} fps", index, self.fps))?;
        Frame::from_rgb_rows(
            rgb_frame.data(0),
            rgb_frame.width(),
            rgb_frame.height(),
            rgb_frame.stride(0),
            index,
            timestamp,
        )
    }

    pub(crate) fn path(&self) -> &str {
        &self.config.path
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn frame_count_hint(&self) -> Option<u64> {
        self.total_frames
    }

    pub(crate) fn fps(&self) -> f64 {
        self.fps
    }
}
