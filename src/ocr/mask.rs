use image::{GrayImage, Luma};

use super::TextArea;

/// Single-channel mask with every detected box interior filled. Boxes are
/// clamped to the image bounds; the output depends only on the inputs, so
/// repeated calls are bit-identical.
pub fn build_text_mask(width: u32, height: u32, areas: &[TextArea]) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, Luma([0]));
    for area in areas {
        let area = area.clamped(width, height);
        for y in area.y1..area.y2 {
            for x in area.x1..area.x2 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// Inverts the mask into the alpha channel expected by inpainting: 0 where
/// text was detected, opaque elsewhere.
pub fn mask_to_alpha(mask: &GrayImage) -> GrayImage {
    let mut alpha = mask.clone();
    for pixel in alpha.pixels_mut() {
        pixel[0] = 255 - pixel[0];
    }
    alpha
}
