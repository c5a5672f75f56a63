//! Webcam frame source.
//!
//! This module provides `WebcamSource` for live capture from a local V4L2 device.
//! Timestamps are monotonic time elapsed since `connect`, so the session clock
//! matches wall-clock sustain and cooldown windows.
//!
//! `stub://` devices produce synthetic frames without hardware; real devices
//! need the webcam-v4l2 feature.

use anyhow::Result;
#[cfg(feature = "webcam-v4l2")]
use anyhow::Context;
#[cfg(not(feature = "webcam-v4l2"))]
use anyhow::anyhow;
#[cfg(feature = "webcam-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "webcam-v4l2")]
use std::time::{Duration, Instant};

use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a webcam source.
#[derive(Clone, Debug)]
pub struct WebcamConfig {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Devices may ignore it.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Webcam frame source. Runs until the session stops.
pub struct WebcamSource {
    backend: WebcamBackend,
}

enum WebcamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "webcam-v4l2")]
    Device(DeviceWebcamSource),
}

impl WebcamSource {
    pub fn new(config: WebcamConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: WebcamBackend::Synthetic(SyntheticSource::new(SyntheticConfig {
                    name: config.device,
                    width: config.width,
                    height: config.height,
                    fps: config.target_fps,
                    frames: None,
                })),
            });
        }
        #[cfg(feature = "webcam-v4l2")]
        {
            Ok(Self {
                backend: WebcamBackend::Device(DeviceWebcamSource::new(config)),
            })
        }
        #[cfg(not(feature = "webcam-v4l2"))]
        {
            Err(anyhow!(
                "webcam capture of {} requires the webcam-v4l2 feature",
                config.device
            ))
        }
    }
}

impl FrameSource for WebcamSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "webcam-v4l2")]
            WebcamBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            WebcamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "webcam-v4l2")]
            WebcamBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "webcam-v4l2")]
            WebcamBackend::Device(source) => source.config.device.clone(),
        }
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "webcam-v4l2")]
            WebcamBackend::Device(source) => source.frame_count,
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            WebcamBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "webcam-v4l2")]
            WebcamBackend::Device(source) => source.is_healthy(),
        }
    }
}

// ----------------------------------------------------------------------------
// Capture buffer layouts
// ----------------------------------------------------------------------------

/// Pixel layouts accepted from capture devices, in order of preference.
#[cfg_attr(not(feature = "webcam-v4l2"), allow(dead_code))]
const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

/// How a negotiated capture buffer maps to RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(feature = "webcam-v4l2"), allow(dead_code))]
enum CaptureLayout {
    Rgb3 { stride: usize },
    Yuyv { stride: usize },
    Mjpeg,
}

#[cfg_attr(not(feature = "webcam-v4l2"), allow(dead_code))]
impl CaptureLayout {
    /// Layout for a negotiated fourcc. A zero stride means tightly packed rows.
    fn for_fourcc(fourcc: &[u8; 4], width: u32, stride: u32) -> Option<Self> {
        let packed = |bytes_per_pixel: usize| {
            if stride == 0 {
                width as usize * bytes_per_pixel
            } else {
                stride as usize
            }
        };
        match fourcc {
            b"RGB3" => Some(CaptureLayout::Rgb3 { stride: packed(3) }),
            b"YUYV" => Some(CaptureLayout::Yuyv { stride: packed(2) }),
            b"MJPG" => Some(CaptureLayout::Mjpeg),
            _ => None,
        }
    }

    fn decode(
        &self,
        buffer: &[u8],
        width: u32,
        height: u32,
        index: u64,
        timestamp: std::time::Duration,
    ) -> Result<Frame> {
        match *self {
            CaptureLayout::Rgb3 { stride } => {
                Frame::from_rgb_rows(buffer, width, height, stride, index, timestamp)
            }
            CaptureLayout::Yuyv { stride } => {
                Frame::from_yuyv(buffer, width, height, stride, index, timestamp)
            }
            CaptureLayout::Mjpeg => Frame::from_jpeg(buffer, index, timestamp),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device capture
// ----------------------------------------------------------------------------

#[cfg(feature = "webcam-v4l2")]
struct DeviceWebcamSource {
    config: WebcamConfig,
    state: Option<DeviceState>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    layout: CaptureLayout,
}

#[cfg(feature = "webcam-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "webcam-v4l2")]
impl DeviceWebcamSource {
    fn new(config: WebcamConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            connected_at: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            layout: CaptureLayout::Mjpeg,
        }
    }

    /// Try each preferred layout; drivers answer `set_format` with the
    /// closest format they support, which may differ from the request.
    fn negotiate(&self, device: &v4l::Device) -> Result<(v4l::Format, CaptureLayout)> {
        use v4l::video::Capture;

        let mut offered = Vec::new();
        for fourcc in PREFERRED_FOURCCS {
            let mut request = device.format().context("read webcam format")?;
            request.width = self.config.width;
            request.height = self.config.height;
            request.fourcc = v4l::FourCC::new(fourcc);

            let format = match device.set_format(&request) {
                Ok(format) => format,
                Err(err) => {
                    log::debug!(
                        "WebcamSource: {} rejected {}: {}",
                        self.config.device,
                        request.fourcc,
                        err
                    );
                    continue;
                }
            };
            if let Some(layout) =
                CaptureLayout::for_fourcc(&format.fourcc.repr, format.width, format.stride)
            {
                return Ok((format, layout));
            }
            offered.push(format.fourcc.to_string());
        }

        // Some drivers refuse every S_FMT; keep whatever the device is already set to.
        let current = device.format().context("read webcam format")?;
        if let Some(layout) =
            CaptureLayout::for_fourcc(&current.fourcc.repr, current.width, current.stride)
        {
            log::warn!(
                "WebcamSource: {} kept its current format {}",
                self.config.device,
                current.fourcc
            );
            return Ok((current, layout));
        }
        offered.push(current.fourcc.to_string());
        anyhow::bail!(
            "webcam {} offers no supported pixel format (got {}; need RGB3, YUYV or MJPG)",
            self.config.device,
            if offered.is_empty() {
                "none".to_string()
            } else {
                offered.join(", ")
            }
        )
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("cannot open webcam {}", self.config.device))?;
        let (format, layout) = self.negotiate(&device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "WebcamSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.layout = layout;
        self.last_error = None;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create webcam buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.connected_at = Some(Instant::now());

        log::info!(
            "WebcamSource: connected to {} ({}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            format.fourcc
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let connected_at = self.connected_at.context("webcam not connected")?;
        let state = self.state.as_mut().context("webcam not connected")?;
        let buffer = state
            .with_stream_mut(|stream| {
                stream.next().map(|(buf, meta)| {
                    // MJPG payloads are shorter than the mapped buffer.
                    let used = (meta.bytesused as usize).min(buf.len());
                    if used == 0 {
                        buf.to_vec()
                    } else {
                        buf[..used].to_vec()
                    }
                })
            })
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture webcam frame")
            })?;

        let now = Instant::now();
        let index = self.frame_count;
        self.frame_count += 1;
        self.last_frame_at = Some(now);

        self.layout
            .decode(
                &buffer,
                self.active_width,
                self.active_height,
                index,
                now.duration_since(connected_at),
            )
            .with_context(|| format!("webcam {} frame {}", self.config.device, index))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
