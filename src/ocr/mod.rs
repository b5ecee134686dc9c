mod classify;
mod engine;
mod font;
mod mask;
mod render;

pub use classify::{detect_text_areas, estimate_weight, text_color};
pub use font::{FontMetrics, ResolvedFont, fit_font_size, resolve_weight_font};
pub use mask::{build_text_mask, mask_to_alpha};
pub use render::draw_replacements;

use serde::{Deserialize, Serialize};

/// One detected text region. The client holds these between the process and
/// update calls; nothing is kept server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextArea {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub text: String,
    pub color: [u8; 3],
    pub weight: FontWeight,
}

impl TextArea {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Clamps the box to the image bounds. Client-supplied coordinates are not
    /// trusted on the update call.
    pub fn clamped(&self, image_width: u32, image_height: u32) -> TextArea {
        let mut area = self.clone();
        area.x1 = area.x1.min(image_width);
        area.y1 = area.y1.min(image_height);
        area.x2 = area.x2.clamp(area.x1, image_width);
        area.y2 = area.y2.clamp(area.y1, image_height);
        area
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Estimated stroke weight of the detected text, one bucket per Noto weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FontWeight {
    Thin,
    ExtraLight,
    Light,
    Regular,
    Medium,
    SemiBold,
    Bold,
    ExtraBold,
    Black,
}

impl FontWeight {
    /// Buckets the ratio of ink pixels to total pixels inside a detected box.
    pub fn from_ink_ratio(ratio: f32) -> FontWeight {
        if ratio < 0.10 {
            FontWeight::Thin
        } else if ratio < 0.15 {
            FontWeight::ExtraLight
        } else if ratio < 0.20 {
            FontWeight::Light
        } else if ratio < 0.25 {
            FontWeight::Regular
        } else if ratio < 0.30 {
            FontWeight::Medium
        } else if ratio < 0.35 {
            FontWeight::SemiBold
        } else if ratio < 0.40 {
            FontWeight::Bold
        } else if ratio < 0.45 {
            FontWeight::ExtraBold
        } else {
            FontWeight::Black
        }
    }

    pub fn css_weight(self) -> u16 {
        match self {
            FontWeight::Thin => 100,
            FontWeight::ExtraLight => 200,
            FontWeight::Light => 300,
            FontWeight::Regular => 400,
            FontWeight::Medium => 500,
            FontWeight::SemiBold => 600,
            FontWeight::Bold => 700,
            FontWeight::ExtraBold => 800,
            FontWeight::Black => 900,
        }
    }

    /// Suffix used when scanning a font directory for weight-specific faces,
    /// e.g. `NotoSansKR-Bold.ttf`.
    pub fn file_suffix(self) -> &'static str {
        match self {
            FontWeight::Thin => "Thin",
            FontWeight::ExtraLight => "ExtraLight",
            FontWeight::Light => "Light",
            FontWeight::Regular => "Regular",
            FontWeight::Medium => "Medium",
            FontWeight::SemiBold => "SemiBold",
            FontWeight::Bold => "Bold",
            FontWeight::ExtraBold => "ExtraBold",
            FontWeight::Black => "Black",
        }
    }
}
