#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

/// Candidates below this score never reach NMS.
const DEFAULT_SCORE_FLOOR: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Settings for the ONNX detector.
#[derive(Clone, Debug)]
pub struct TractConfig {
    pub model_path: PathBuf,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Class id to label. Ids past the end are labeled by their number.
    pub class_names: Vec<String>,
    pub score_floor: f32,
    pub iou_threshold: f32,
}

impl TractConfig {
    pub fn new(model_path: impl Into<PathBuf>, input_size: u32, class_names: Vec<String>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size,
            class_names,
            score_floor: DEFAULT_SCORE_FLOOR,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output shaped `[1, 4 + classes, anchors]` (or its transpose)
/// holding `cx, cy, w, h` in input pixels followed by per-class scores.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    config: TractConfig,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(config: TractConfig) -> Result<Self> {
        let model = load_model(&config.model_path, config.input_size)?;
        log::info!(
            "TractBackend: loaded {} ({}x{}, {} classes)",
            config.model_path.display(),
            config.input_size,
            config.input_size,
            config.class_names.len()
        );
        Ok(Self { model, config })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let size = self.config.input_size;
        let image = frame.to_rgb_image()?;
        let resized = imageops::resize(&image, size, size, FilterType::Triangle);

        let side = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn label_for(&self, class_id: usize) -> String {
        self.config
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        // Channel-first is the usual export; fall back to anchors-first.
        let (channels, anchors, channel_first) = if shape[1] < shape[2] {
            (shape[1], shape[2], true)
        } else {
            (shape[2], shape[1], false)
        };
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, need at least 5", channels));
        }
        let at = |c: usize, i: usize| {
            if channel_first {
                view[[0, c, i]]
            } else {
                view[[0, i, c]]
            }
        };

        let sx = frame.width as f32 / self.config.input_size as f32;
        let sy = frame.height as f32 / self.config.input_size as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, at(c, i)))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < self.config.score_floor {
                continue;
            }
            let bbox = BoundingBox::from_center(at(0, i), at(1, i), at(2, i), at(3, i))
                .scaled(sx, sy);
            candidates.push((class_id, Detection::new(self.label_for(class_id), score, bbox)));
        }

        Ok(DetectionResult::new(non_max_suppression(
            candidates,
            self.config.iou_threshold,
        )))
    }
}

fn load_model(model_path: &Path, input_size: u32) -> Result<TypedRunnableModel<TypedModel>> {
    let side = input_size as usize;
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<(usize, Detection)>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_id, det) in candidates {
        let overlaps = kept
            .iter()
            .any(|(k_class, k)| *k_class == class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            kept.push((class_id, det));
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.config.input_size;
        let blank = Frame::solid(side, side, [0, 0, 0], 0, std::time::Duration::ZERO)?;
        self.detect(&blank).map(|_| ())
    }
}
