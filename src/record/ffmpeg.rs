//! MPEG-4 encoding of annotated frames using FFmpeg.
//!
//! The encoder opens on the first frame, once the frame size is known. Odd
//! dimensions are scaled down to the nearest even size (YUV 4:2:0).

use anyhow::{anyhow, bail, Context, Result};
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::PathBuf;

use super::FrameRecorder;

const BIT_RATE: usize = 4_000_000;

/// Writes annotated frames to an MP4 file at a fixed frame rate.
pub struct FfmpegVideoWriter {
    path: PathBuf,
    fps: f64,
    state: Option<EncoderState>,
    frames: i64,
    finished: bool,
}

struct EncoderState {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    source_width: u32,
    source_height: u32,
}

impl FfmpegVideoWriter {
    pub fn new(path: impl Into<PathBuf>, fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            bail!("video output needs a positive frame rate, got {}", fps);
        }
        ffmpeg::init().context("initialize ffmpeg")?;
        Ok(Self {
            path: path.into(),
            fps,
            state: None,
            frames: 0,
            finished: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames as u64
    }
}

impl FrameRecorder for FfmpegVideoWriter {
    fn record(&mut self, image: &RgbImage) -> Result<()> {
        if self.finished {
            bail!("{} is already closed", self.path.display());
        }
        if self.state.is_none() {
            self.state = Some(EncoderState::open(
                &self.path,
                self.fps,
                image.width(),
                image.height(),
            )?);
        }
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("video encoder for {} not open", self.path.display()))?;
        state.encode(image, self.frames)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf> {
        if self.finished {
            bail!("{} is already closed", self.path.display());
        }
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("no frames recorded for {}", self.path.display()))?;
        state.encoder.send_eof().context("flush video encoder")?;
        state.drain()?;
        state
            .output
            .write_trailer()
            .with_context(|| format!("finalize {}", self.path.display()))?;
        self.finished = true;
        log::info!(
            "annotated video written to {} ({} frames)",
            self.path.display(),
            self.frames
        );
        Ok(self.path.clone())
    }
}

impl EncoderState {
    fn open(path: &std::path::Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        let out_width = width & !1;
        let out_height = height & !1;
        if out_width == 0 || out_height == 0 {
            bail!("frame {}x{} is too small to encode", width, height);
        }

        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create video '{}'", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg has no MPEG-4 encoder"))?;
        let rate = ffmpeg::Rational::from(fps);
        let encoder_time_base = rate.invert();

        let (stream_index, encoder) = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            let mut encoder =
                ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                    .context("load video encoder parameters")?
                    .encoder()
                    .video()
                    .context("create video encoder")?;
            encoder.set_width(out_width);
            encoder.set_height(out_height);
            encoder.set_format(Pixel::YUV420P);
            encoder.set_frame_rate(Some(rate));
            encoder.set_time_base(encoder_time_base);
            encoder.set_bit_rate(BIT_RATE);
            if global_header {
                encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
            }
            let encoder = encoder.open_as(codec).context("open MPEG-4 encoder")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            (stream.index(), encoder)
        };

        output
            .write_header()
            .with_context(|| format!("write header of {}", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("video stream disappeared after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            out_width,
            out_height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            source_width: width,
            source_height: height,
        })
    }

    fn encode(&mut self, image: &RgbImage, pts: i64) -> Result<()> {
        if image.dimensions() != (self.source_width, self.source_height) {
            bail!(
                "frame size changed from {}x{} to {}x{}",
                self.source_width,
                self.source_height,
                image.width(),
                image.height()
            );
        }

        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, image.width(), image.height());
        let row_bytes = image.width() as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data_mut(0);
        for (row, line) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane
                .get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(line);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV")?;
        yuv.set_pts(Some(pts));
        self.encoder
            .send_frame(&yuv)
            .context("send frame to video encoder")?;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }
}
