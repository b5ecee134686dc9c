use anyhow::{Result, anyhow};
use image::{GrayImage, Rgba, RgbaImage};

const SMOOTHING_PASSES: usize = 4;

/// Regenerates every pixel whose alpha-channel value is 0 with plausible
/// background content (the text mask arrives inverted, opaque outside the
/// detected boxes).
///
/// Fills inward from the region boundary, each step averaging the
/// already-known neighbors, then runs a few smoothing passes over the filled
/// region. The result is deterministic; pixels opaque in `alpha` are returned
/// untouched.
pub fn fill_transparent(image: &RgbaImage, alpha: &GrayImage) -> Result<RgbaImage> {
    if image.dimensions() != alpha.dimensions() {
        return Err(anyhow!(
            "inpaint alpha size {:?} does not match image size {:?}",
            alpha.dimensions(),
            image.dimensions()
        ));
    }

    let (width, height) = image.dimensions();
    let mut output = image.clone();
    let mut known = vec![false; (width * height) as usize];
    let mut pending = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            if alpha.get_pixel(x, y)[0] == 0 {
                pending.push((x, y));
            } else {
                known[idx] = true;
            }
        }
    }

    // Peel the masked region layer by layer from its boundary.
    while !pending.is_empty() {
        let mut next_pending = Vec::new();
        let mut filled = Vec::new();
        for &(x, y) in &pending {
            match neighbor_average(&output, &known, width, height, x, y) {
                Some(color) => {
                    output.put_pixel(x, y, color);
                    filled.push((x, y));
                }
                None => next_pending.push((x, y)),
            }
        }
        if filled.is_empty() {
            // Nothing known anywhere, the whole image was masked.
            for &(x, y) in &next_pending {
                output.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
            break;
        }
        for &(x, y) in &filled {
            known[(y * width + x) as usize] = true;
        }
        pending = next_pending;
    }

    for _ in 0..SMOOTHING_PASSES {
        let snapshot = output.clone();
        for y in 0..height {
            for x in 0..width {
                if alpha.get_pixel(x, y)[0] != 0 {
                    continue;
                }
                if let Some(color) = full_neighbor_average(&snapshot, width, height, x, y) {
                    output.put_pixel(x, y, color);
                }
            }
        }
    }

    Ok(output)
}

fn neighbor_average(
    image: &RgbaImage,
    known: &[bool],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
) -> Option<Rgba<u8>> {
    let mut sum = [0u32; 4];
    let mut count = 0u32;
    for (nx, ny) in neighbors(width, height, x, y) {
        if known[(ny * width + nx) as usize] {
            let pixel = image.get_pixel(nx, ny);
            for channel in 0..4 {
                sum[channel] += pixel[channel] as u32;
            }
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(Rgba([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
        (sum[3] / count) as u8,
    ]))
}

fn full_neighbor_average(
    image: &RgbaImage,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
) -> Option<Rgba<u8>> {
    let mut sum = [0u32; 4];
    let mut count = 0u32;
    for (nx, ny) in neighbors(width, height, x, y) {
        let pixel = image.get_pixel(nx, ny);
        for channel in 0..4 {
            sum[channel] += pixel[channel] as u32;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(Rgba([
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
        (sum[3] / count) as u8,
    ]))
}

fn neighbors(width: u32, height: u32, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
    let (x, y) = (x as i64, y as i64);
    [
        (x - 1, y),
        (x + 1, y),
        (x, y - 1),
        (x, y + 1),
        (x - 1, y - 1),
        (x + 1, y - 1),
        (x - 1, y + 1),
        (x + 1, y + 1),
    ]
    .into_iter()
    .filter(move |&(nx, ny)| nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64)
    .map(|(nx, ny)| (nx as u32, ny as u32))
}
