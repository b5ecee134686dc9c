use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use super::FontWeight;

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Baseline offset from the top of the em box, in pixels at `font_size`.
    pub fn ascent_px(&self, font_size: f32) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        self.ascender as f32 * (font_size / units)
    }
}

/// The face chosen for a weight bucket, with the family name resvg should be
/// told to use.
pub struct ResolvedFont {
    pub metrics: Option<FontMetrics>,
    pub family: String,
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(&data)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Picks a face for the weight bucket: a weight-suffixed file from the
/// configured font directory when one exists, otherwise a system face queried
/// by css weight. Failure falls back down the chain instead of raising; the
/// final fallback carries no metrics and measurement uses per-char estimates.
pub fn resolve_weight_font(weight: FontWeight, font_dir: Option<&Path>) -> ResolvedFont {
    if let Some(dir) = font_dir {
        match find_weight_file(dir, weight) {
            Ok(Some(path)) => match load_font_metrics(&path) {
                Ok(metrics) => {
                    let family = metrics
                        .family()
                        .map(|name| name.to_string())
                        .unwrap_or_else(|| "sans-serif".to_string());
                    return ResolvedFont {
                        metrics: Some(metrics),
                        family,
                    };
                }
                Err(err) => {
                    tracing::warn!("font file for {:?} unusable: {}", weight, err);
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("failed to scan font dir {}: {}", dir.display(), err);
            }
        }
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    match load_system_face_by_weight(&db, weight) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::warn!("no system face for {:?}: {}; using estimated metrics", weight, err);
            ResolvedFont {
                metrics: None,
                family: "sans-serif".to_string(),
            }
        }
    }
}

/// Shrinks from 80% of the box height until the measured text bounds fit.
pub fn fit_font_size(text: &str, box_w: f32, box_h: f32, metrics: Option<&FontMetrics>) -> f32 {
    let mut size = (box_h * 0.8).max(1.0);
    loop {
        let width = measure_text_width_px(text, size, metrics);
        let height = line_height_px(size, metrics);
        if (width <= box_w && height <= box_h) || size <= 1.0 {
            return size.max(1.0);
        }
        size -= 1.0;
    }
}

pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, font.face_index) {
            let mut advance = 0u32;
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                if ch == ' ' {
                    advance = advance.saturating_add(font.space_advance as u32);
                    continue;
                }
                if let Some(glyph) = face.glyph_index(ch) {
                    let glyph_advance = face.glyph_hor_advance(glyph).unwrap_or(font.space_advance);
                    advance = advance.saturating_add(glyph_advance as u32);
                } else {
                    advance = advance.saturating_add(font.space_advance as u32);
                }
            }
            let units = font.units_per_em.max(1) as f32;
            return advance as f32 * (font_size / units);
        }
    }
    estimate_text_width_units(text) * font_size
}

pub(crate) fn line_height_px(font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        let units = font.units_per_em.max(1) as f32;
        let span = (font.ascender as i32 - font.descender as i32).max(1) as f32;
        return span * (font_size / units);
    }
    font_size
}

fn find_weight_file(dir: &Path, weight: FontWeight) -> Result<Option<std::path::PathBuf>> {
    let suffix = format!("-{}", weight.file_suffix());
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read font dir: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| "failed to read font dir entry")?;
        let path = entry.path();
        let is_font = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("ttf") | Some("otf")
        );
        if !is_font {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|value| value.to_str()) {
            if stem.ends_with(&suffix) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

fn load_system_face_by_weight(db: &fontdb::Database, weight: FontWeight) -> Result<ResolvedFont> {
    let query = fontdb::Query {
        families: &[fontdb::Family::SansSerif],
        weight: fontdb::Weight(weight.css_weight()),
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("no sans-serif face at weight {}", weight.css_weight()))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load face data at weight {}", weight.css_weight()))?;
    let metrics = load_font_metrics_from_data(&data)?;
    let family = metrics
        .family()
        .map(|name| name.to_string())
        .unwrap_or_else(|| "sans-serif".to_string());
    Ok(ResolvedFont {
        metrics: Some(metrics),
        family,
    })
}

fn load_font_metrics_from_data(data: &[u8]) -> Result<FontMetrics> {
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(data, index) {
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            return Ok(FontMetrics {
                data: Arc::new(data.to_vec()),
                units_per_em,
                ascender: face.ascender(),
                descender: face.descender(),
                space_advance,
                family: extract_family_name(&face),
                face_index: index,
            });
        }
    }
    Err(anyhow!("failed to parse font data"))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xAC00..=0xD7AF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_size_never_overflows_box() {
        for text in ["Sale", "Limited offer ends today", "한정 수량"] {
            let (box_w, box_h) = (120.0, 40.0);
            let size = fit_font_size(text, box_w, box_h, None);
            assert!(size >= 1.0);
            assert!(measure_text_width_px(text, size, None) <= box_w || size == 1.0);
            assert!(line_height_px(size, None) <= box_h);
        }
    }

    #[test]
    fn fit_starts_from_box_height_fraction() {
        // Short text in a wide box keeps the initial 80% estimate.
        let size = fit_font_size("Hi", 400.0, 50.0, None);
        assert_eq!(size, 40.0);
    }

    #[test]
    fn estimate_width_scales_with_size() {
        let narrow = measure_text_width_px("abc", 10.0, None);
        let wide = measure_text_width_px("abc", 20.0, None);
        assert!((wide - narrow * 2.0).abs() < 1e-3);
    }

    #[test]
    fn missing_weight_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let found = find_weight_file(dir.path(), FontWeight::Bold).expect("scan");
        assert!(found.is_none());
    }

    #[test]
    fn weight_file_matches_by_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("NotoSansKR-Bold.ttf");
        std::fs::write(&path, b"not a real font").expect("write");
        let found = find_weight_file(dir.path(), FontWeight::Bold).expect("scan");
        assert_eq!(found, Some(path));
        let other = find_weight_file(dir.path(), FontWeight::Thin).expect("scan");
        assert!(other.is_none());
    }
}
