mod tesseract;

use anyhow::{Context, Result};
use image::DynamicImage;
use std::io::Write;

pub(crate) use tesseract::parse_tsv_detections;

/// One raw OCR hit before classification. The detector reports four corner
/// points per region; the axis-aligned box is derived from them.
#[derive(Debug, Clone)]
pub(crate) struct RawDetection {
    pub(crate) corners: [(f32, f32); 4],
    pub(crate) text: String,
    pub(crate) confidence: f32,
}

/// Runs the external OCR engine over the image and returns hits at or above
/// `min_confidence` (0.0..=1.0).
pub(crate) fn detect(
    image: &DynamicImage,
    languages: &str,
    min_confidence: f32,
) -> Result<Vec<RawDetection>> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    image
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();

    let tsv = tesseract::run_tesseract_tsv(tmp.path(), languages)?;
    let detections = parse_tsv_detections(&tsv)?;
    Ok(detections
        .into_iter()
        .filter(|detection| detection.confidence > min_confidence)
        .collect())
}

/// Min/max projection of the corner points onto the axes.
pub(crate) fn bounds_from_corners(corners: &[(f32, f32); 4]) -> (u32, u32, u32, u32) {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for &(x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let x1 = min_x.max(0.0) as u32;
    let y1 = min_y.max(0.0) as u32;
    let x2 = max_x.max(0.0) as u32;
    let y2 = max_y.max(0.0) as u32;
    (x1, y1, x2.max(x1), y2.max(y1))
}
