use anyhow::Result;
use image::DynamicImage;
use imageproc::contrast::{ThresholdType, otsu_level, threshold};

use super::engine;
use super::{FontWeight, TextArea};

/// Detects text regions and classifies each with its foreground color and
/// estimated stroke weight. The source image is not mutated.
pub fn detect_text_areas(
    image: &DynamicImage,
    languages: &str,
    min_confidence: f32,
) -> Result<Vec<TextArea>> {
    let detections = engine::detect(image, languages, min_confidence)?;
    let (width, height) = (image.width(), image.height());

    let mut areas = Vec::new();
    for detection in detections {
        let (x1, y1, x2, y2) = engine::bounds_from_corners(&detection.corners);
        let area = TextArea {
            x1,
            y1,
            x2,
            y2,
            text: detection.text,
            color: [0, 0, 0],
            weight: FontWeight::Regular,
        }
        .clamped(width, height);
        if area.is_empty() {
            continue;
        }
        let color = text_color(image, &area);
        let weight = estimate_weight(image, &area);
        areas.push(TextArea {
            color,
            weight,
            ..area
        });
    }
    Ok(areas)
}

/// Black on bright backgrounds, white on dark ones, split at mid-gray.
pub fn text_color(image: &DynamicImage, area: &TextArea) -> [u8; 3] {
    let region = image
        .crop_imm(area.x1, area.y1, area.width(), area.height())
        .to_luma8();
    let total: u64 = region.pixels().map(|pixel| pixel[0] as u64).sum();
    let count = (region.width() as u64 * region.height() as u64).max(1);
    let average = total / count;
    if average > 127 { [0, 0, 0] } else { [255, 255, 255] }
}

/// Otsu-binarizes the box so ink pixels become foreground and buckets the
/// resulting ink ratio.
pub fn estimate_weight(image: &DynamicImage, area: &TextArea) -> FontWeight {
    let region = image
        .crop_imm(area.x1, area.y1, area.width(), area.height())
        .to_luma8();
    let level = otsu_level(&region);
    let binary = threshold(&region, level, ThresholdType::BinaryInverted);
    let ink = binary.pixels().filter(|pixel| pixel[0] == 255).count();
    let total = (binary.width() as usize * binary.height() as usize).max(1);
    FontWeight::from_ink_ratio(ink as f32 / total as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn area(x1: u32, y1: u32, x2: u32, y2: u32) -> TextArea {
        TextArea {
            x1,
            y1,
            x2,
            y2,
            text: String::new(),
            color: [0, 0, 0],
            weight: FontWeight::Regular,
        }
    }

    fn flat_image(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn bright_background_gets_black_text() {
        let mut img = flat_image(100, 40, 240);
        // A thin dark stroke does not drag the average below mid-gray.
        for x in 10..90 {
            img.put_pixel(x, 20, Rgba([10, 10, 10, 255]));
        }
        let image = DynamicImage::ImageRgba8(img);
        assert_eq!(text_color(&image, &area(0, 0, 100, 40)), [0, 0, 0]);
    }

    #[test]
    fn dark_background_gets_white_text() {
        let image = DynamicImage::ImageRgba8(flat_image(100, 40, 30));
        assert_eq!(text_color(&image, &area(0, 0, 100, 40)), [255, 255, 255]);
    }

    #[test]
    fn ink_coverage_maps_to_weight_bucket() {
        // 100x40 box with the left 32% filled dark: ink ratio 0.32 -> SemiBold.
        let mut img = flat_image(100, 40, 255);
        for y in 0..40 {
            for x in 0..32 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let image = DynamicImage::ImageRgba8(img);
        assert_eq!(estimate_weight(&image, &area(0, 0, 100, 40)), FontWeight::SemiBold);
    }

    #[test]
    fn sparse_ink_is_thin() {
        let mut img = flat_image(100, 40, 255);
        for x in 0..100 {
            img.put_pixel(x, 20, Rgba([0, 0, 0, 255]));
        }
        let image = DynamicImage::ImageRgba8(img);
        assert_eq!(estimate_weight(&image, &area(0, 0, 100, 40)), FontWeight::Thin);
    }
}
