use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage, imageops};

/// Left-anchored crop to `width` keeping the full height. Screenshots keep a
/// scrollbar on the right edge at mobile widths; the crop discards it.
pub fn crop_to_width(image: &DynamicImage, width: u32) -> DynamicImage {
    let crop = width.min(image.width());
    image.crop_imm(0, 0, crop, image.height())
}

/// Resizes to `target_width` preserving the aspect ratio. A zero target is
/// treated as 1 so the output stays encodable.
pub fn resize_to_width(image: &DynamicImage, target_width: u32) -> DynamicImage {
    let target_width = target_width.max(1);
    let source_width = image.width().max(1);
    let height = ((target_width as u64 * image.height() as u64) / source_width as u64).max(1);
    image.resize_exact(target_width, height as u32, FilterType::Lanczos3)
}

/// Stitches the images vertically, in order. Output width is the widest
/// input, output height the sum of input heights; image `i` lands at vertical
/// offset `sum(h_1..h_{i-1})`.
pub fn stitch(images: &[RgbaImage]) -> Option<RgbaImage> {
    if images.is_empty() {
        return None;
    }
    let width = images.iter().map(|image| image.width()).max()?;
    let height: u32 = images.iter().map(|image| image.height()).sum();
    let mut stitched = RgbaImage::new(width, height);
    let mut y_offset = 0i64;
    for image in images {
        imageops::replace(&mut stitched, image, 0, y_offset);
        y_offset += image.height() as i64;
    }
    Some(stitched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn flat(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn crop_is_left_anchored_and_full_height() {
        let image = DynamicImage::ImageRgba8(flat(400, 120, 10));
        let cropped = crop_to_width(&image, 350);
        assert_eq!((cropped.width(), cropped.height()), (350, 120));
    }

    #[test]
    fn crop_wider_than_image_is_a_noop() {
        let image = DynamicImage::ImageRgba8(flat(200, 50, 10));
        let cropped = crop_to_width(&image, 350);
        assert_eq!((cropped.width(), cropped.height()), (200, 50));
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let image = DynamicImage::ImageRgba8(flat(350, 700, 10));
        let resized = resize_to_width(&image, 860);
        assert_eq!(resized.width(), 860);
        assert_eq!(resized.height(), 1720);
    }

    #[test]
    fn zero_target_width_is_clamped() {
        let image = DynamicImage::ImageRgba8(flat(100, 50, 10));
        let resized = resize_to_width(&image, 0);
        assert_eq!(resized.width(), 1);
        assert!(resized.height() >= 1);
    }

    #[test]
    fn stitch_heights_sum_and_offsets_accumulate() {
        let images = vec![flat(860, 100, 10), flat(860, 250, 120), flat(860, 40, 240)];
        let stitched = stitch(&images).expect("stitched");
        assert_eq!(stitched.width(), 860);
        assert_eq!(stitched.height(), 390);
        // Sample a pixel inside each band.
        assert_eq!(stitched.get_pixel(0, 50)[0], 10);
        assert_eq!(stitched.get_pixel(0, 100)[0], 120);
        assert_eq!(stitched.get_pixel(0, 349)[0], 120);
        assert_eq!(stitched.get_pixel(0, 350)[0], 240);
    }

    #[test]
    fn stitch_width_is_widest_input() {
        let images = vec![flat(300, 10, 1), flat(860, 10, 2), flat(500, 10, 3)];
        let stitched = stitch(&images).expect("stitched");
        assert_eq!(stitched.width(), 860);
        assert_eq!(stitched.height(), 30);
    }

    #[test]
    fn stitch_of_nothing_is_none() {
        assert!(stitch(&[]).is_none());
    }
}
