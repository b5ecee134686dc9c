use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::font::{fit_font_size, line_height_px, resolve_weight_font};
use super::{FontWeight, TextArea};

/// Draws the replacement strings over a previously cleared image.
///
/// Each string is anchored at its box's top-left corner with a size shrunk
/// until it fits the box, using the face resolved for the area's weight
/// bucket and the client-supplied color. The overlay is composed as SVG and
/// rasterized to PNG.
pub fn draw_replacements(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    areas: &[TextArea],
    new_texts: &[String],
    colors: &[[u8; 3]],
    font_dir: Option<&Path>,
) -> Result<Vec<u8>> {
    let encoded = BASE64.encode(image_bytes);
    let data_uri = format!("data:{};base64,{}", image_mime, encoded);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    let mut resolved: HashMap<FontWeight, super::font::ResolvedFont> = HashMap::new();
    let mut font_payloads: Vec<Vec<u8>> = Vec::new();

    for ((area, text), color) in areas.iter().zip(new_texts).zip(colors) {
        let area = area.clamped(width, height);
        if area.is_empty() || text.trim().is_empty() {
            continue;
        }
        let font = resolved
            .entry(area.weight)
            .or_insert_with(|| resolve_weight_font(area.weight, font_dir));
        if let Some(metrics) = font.metrics.as_ref() {
            if !font_payloads
                .iter()
                .any(|payload| payload.as_slice() == metrics.data())
            {
                font_payloads.push(metrics.data().to_vec());
            }
        }

        let box_w = area.width() as f32;
        let box_h = area.height() as f32;
        let font_size = fit_font_size(text, box_w, box_h, font.metrics.as_ref());
        let ascent = font
            .metrics
            .as_ref()
            .map(|metrics| metrics.ascent_px(font_size))
            .unwrap_or(font_size * 0.8);
        let baseline_y = area.y1 as f32 + ascent.min(box_h);
        let fill = format!("rgb({},{},{})", color[0], color[1], color[2]);

        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" fill="{fill}" font-family="{family}">{text}</text>"#,
            x = area.x1,
            y = baseline_y,
            size = font_size,
            fill = fill,
            family = escape_xml(&font.family),
            text = escape_xml(text)
        ));
        // Sanity invariant from the fit loop.
        debug_assert!(line_height_px(font_size, font.metrics.as_ref()) <= box_h + 1.0);
    }

    svg.push_str("</svg>");
    render_svg_to_png(&svg, &font_payloads)
}

fn render_svg_to_png(svg: &str, font_payloads: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    for payload in font_payloads {
        db.load_font_data(payload.clone());
    }
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse overlay SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode rendered image")?;
    Ok(bytes)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32, value: u8) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode");
        bytes
    }

    fn area(x1: u32, y1: u32, x2: u32, y2: u32, weight: FontWeight) -> TextArea {
        TextArea {
            x1,
            y1,
            x2,
            y2,
            text: String::new(),
            color: [0, 0, 0],
            weight,
        }
    }

    #[test]
    fn renders_replacements_to_png_of_same_size() {
        let base = png_bytes(200, 100, 230);
        let areas = vec![area(10, 10, 150, 40, FontWeight::Regular)];
        let texts = vec!["Hello".to_string()];
        let colors = vec![[0u8, 0, 0]];
        let rendered =
            draw_replacements(&base, "image/png", 200, 100, &areas, &texts, &colors, None)
                .expect("render");
        let decoded = image::load_from_memory(&rendered).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn empty_text_leaves_image_unchanged() {
        let base = png_bytes(60, 30, 128);
        let areas = vec![area(5, 5, 50, 25, FontWeight::Bold)];
        let texts = vec![String::new()];
        let colors = vec![[255u8, 0, 0]];
        let rendered =
            draw_replacements(&base, "image/png", 60, 30, &areas, &texts, &colors, None)
                .expect("render");
        let decoded = image::load_from_memory(&rendered).expect("decode").to_rgba8();
        for pixel in decoded.pixels() {
            assert_eq!(pixel, &Rgba([128, 128, 128, 255]));
        }
    }

    #[test]
    fn escape_handles_markup_characters() {
        assert_eq!(escape_xml("<b>&'\""), "&lt;b&gt;&amp;&apos;&quot;");
    }
}
