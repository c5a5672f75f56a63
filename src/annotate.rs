//! Bounding-box rendering and output files.
//!
//! Boxes are drawn in red when they satisfy the watched condition and green
//! otherwise, each with a `"<label> <confidence>"` tag when a font is
//! available. Output names carry a local timestamp and never overwrite an
//! existing file.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

use crate::detect::{BoundingBox, Detection, DetectionResult, FallCondition};
use crate::frame::Frame;

/// Boxes that satisfy the watched condition.
pub const MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Every other box.
pub const OTHER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const LINE_WIDTH: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Searched when no label font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Draw every detection onto a copy of the frame. Labels are skipped when
/// `font` is `None`.
pub fn annotate(
    frame: &Frame,
    result: &DetectionResult,
    condition: &FallCondition,
    font: Option<&FontVec>,
) -> Result<RgbImage> {
    let mut image = frame.to_rgb_image()?;
    for detection in result.iter() {
        let color = if condition.matches(detection) {
            MATCH_COLOR
        } else {
            OTHER_COLOR
        };
        draw_box(&mut image, &detection.bbox, color, LINE_WIDTH);
        if let Some(font) = font {
            draw_label(&mut image, &detection.bbox, &label_text(detection), color, font);
        }
    }
    Ok(image)
}

/// Tag drawn above a box, e.g. `fall 0.87`.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Load the label font from `configured`, or the first system font found.
///
/// Returns `None` (boxes without text) when nothing usable can be read.
pub fn load_label_font(configured: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = configured {
        return match read_font(path) {
            Ok(font) => Some(font),
            Err(err) => {
                log::warn!("label font unavailable, drawing boxes only: {:#}", err);
                None
            }
        };
    }
    let found = SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|path| path.is_file())
        .find_map(|path| read_font(path).ok());
    if found.is_none() {
        log::info!("no system font found; set label_font to draw box labels");
    }
    found
}

fn read_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    FontVec::try_from_vec(bytes)
        .with_context(|| format!("{} is not a TrueType font", path.display()))
}

/// Filled tag with white text, above the box when there is room, else inside it.
fn draw_label(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    text: &str,
    color: Rgb<u8>,
    font: &FontVec,
) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = text_size(scale, font, text);
    let tag_w = text_w + 2 * LABEL_PADDING;
    let tag_h = text_h.max(1) + 2 * LABEL_PADDING;

    let left = bbox.x1.min(bbox.x2).round().clamp(0.0, (width - 1) as f32) as i32;
    let top = bbox.y1.min(bbox.y2).round().clamp(0.0, (height - 1) as f32) as i32;
    let y = if top >= tag_h as i32 { top - tag_h as i32 } else { top };

    draw_filled_rect_mut(image, Rect::at(left, y).of_size(tag_w, tag_h), color);
    draw_text_mut(
        image,
        LABEL_TEXT_COLOR,
        left + LABEL_PADDING as i32,
        y + LABEL_PADDING as i32,
        scale,
        font,
        text,
    );
}

/// Outline `bbox` with a `thickness`-pixel border, clipped to the image.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.round().clamp(0.0, (max - 1) as f32) as u32 };
    let x1 = clamp(bbox.x1.min(bbox.x2), width);
    let x2 = clamp(bbox.x1.max(bbox.x2), width);
    let y1 = clamp(bbox.y1.min(bbox.y2), height);
    let y2 = clamp(bbox.y1.max(bbox.y2), height);

    for t in 0..thickness {
        let top = (y1 + t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        let left = (x1 + t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for x in x1..=x2 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        for y in y1..=y2 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}

/// Local-time tag used in output file names, e.g. `20241031_142501`.
pub fn timestamp_tag() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `<dir>/<stem>_<timestamp>.<extension>`, with a numeric suffix when a file
/// written within the same second already holds that name. Creates `dir`.
pub fn unique_output_path(dir: &Path, stem: &str, extension: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let tag = timestamp_tag();
    let mut path = dir.join(format!("{stem}_{tag}.{extension}"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{tag}_{n}.{extension}"));
        n += 1;
    }
    Ok(path)
}

/// Write `image` as `<dir>/<stem>_<timestamp>.jpg` and return the path.
pub fn save_jpeg(image: &RgbImage, dir: &Path, stem: &str) -> Result<PathBuf> {
    let path = unique_output_path(dir, stem, "jpg")?;
    image
        .save_with_format(&path, ImageFormat::Jpeg)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// File stem of a source path, used to name its annotated output.
pub fn source_stem(describe: &str) -> String {
    Path::new(describe)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "image".to_string())
}
