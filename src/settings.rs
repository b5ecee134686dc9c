use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr_languages: String,
    pub max_size: u32,
    pub min_confidence: f32,
    pub font_dir: Option<String>,
    pub capture_selector: String,
    pub crop_width: u32,
    pub target_width: u32,
    pub capture_viewport: (u32, u32),
    pub capture_user_agent: Option<String>,
    pub capture_initial_wait_secs: u64,
    pub scroll_wait_secs: u64,
    pub element_wait_secs: u64,
    pub scratch_dir: Option<String>,
    pub info_viewport: (u32, u32),
    pub info_initial_wait_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_languages: "eng".to_string(),
            max_size: 2000,
            min_confidence: 0.5,
            font_dir: None,
            capture_selector: "section.component".to_string(),
            crop_width: 350,
            target_width: 860,
            capture_viewport: (375, 812),
            capture_user_agent: None,
            capture_initial_wait_secs: 3,
            scroll_wait_secs: 2,
            element_wait_secs: 2,
            scratch_dir: None,
            info_viewport: (860, 10_000),
            info_initial_wait_secs: 5,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    fonts: Option<FontSettings>,
    capture: Option<CaptureSettings>,
    fetch_info: Option<FetchInfoSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    max_size: Option<u32>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptureSettings {
    selector: Option<String>,
    crop_width: Option<u32>,
    target_width: Option<u32>,
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    user_agent: Option<String>,
    initial_wait_secs: Option<u64>,
    scroll_wait_secs: Option<u64>,
    element_wait_secs: Option<u64>,
    scratch_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchInfoSettings {
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    initial_wait_secs: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    let embedded: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse embedded settings")?;
    settings.merge(embedded);

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = ocr.languages {
                if !languages.trim().is_empty() {
                    self.ocr_languages = languages;
                }
            }
            if let Some(max_size) = ocr.max_size {
                if max_size > 0 {
                    self.max_size = max_size;
                }
            }
            if let Some(confidence) = ocr.min_confidence {
                if (0.0..=1.0).contains(&confidence) {
                    self.min_confidence = confidence;
                }
            }
        }
        if let Some(fonts) = incoming.fonts {
            if let Some(dir) = fonts.dir {
                if !dir.trim().is_empty() {
                    self.font_dir = Some(dir);
                }
            }
        }
        if let Some(capture) = incoming.capture {
            if let Some(selector) = capture.selector {
                if !selector.trim().is_empty() {
                    self.capture_selector = selector;
                }
            }
            if let Some(width) = capture.crop_width {
                if width > 0 {
                    self.crop_width = width;
                }
            }
            if let Some(width) = capture.target_width {
                if width > 0 {
                    self.target_width = width;
                }
            }
            if let Some(width) = capture.viewport_width {
                if width > 0 {
                    self.capture_viewport.0 = width;
                }
            }
            if let Some(height) = capture.viewport_height {
                if height > 0 {
                    self.capture_viewport.1 = height;
                }
            }
            if let Some(agent) = capture.user_agent {
                if !agent.trim().is_empty() {
                    self.capture_user_agent = Some(agent);
                }
            }
            if let Some(secs) = capture.initial_wait_secs {
                self.capture_initial_wait_secs = secs;
            }
            if let Some(secs) = capture.scroll_wait_secs {
                self.scroll_wait_secs = secs;
            }
            if let Some(secs) = capture.element_wait_secs {
                self.element_wait_secs = secs;
            }
            if let Some(dir) = capture.scratch_dir {
                if !dir.trim().is_empty() {
                    self.scratch_dir = Some(dir);
                }
            }
        }
        if let Some(info) = incoming.fetch_info {
            if let Some(width) = info.viewport_width {
                if width > 0 {
                    self.info_viewport.0 = width;
                }
            }
            if let Some(height) = info.viewport_height {
                if height > 0 {
                    self.info_viewport.1 = height;
                }
            }
            if let Some(secs) = info.initial_wait_secs {
                self.info_initial_wait_secs = secs;
            }
        }
    }
}
