use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

use crate::settings::Settings;

/// Scratch directories for one capture run, isolated under a generated run
/// id so concurrent runs never share files.
#[derive(Debug, Clone)]
pub(crate) struct RunDirs {
    root: PathBuf,
    run_id: String,
}

impl RunDirs {
    pub(crate) fn create(scratch_root: &Path) -> Result<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let root = scratch_root.join(&run_id);
        for dir in ["screenshots", "cropped", "enlarged"] {
            std::fs::create_dir_all(root.join(dir))
                .with_context(|| format!("failed to create scratch dir: {}", root.display()))?;
        }
        Ok(Self { root, run_id })
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    pub(crate) fn cropped_dir(&self) -> PathBuf {
        self.root.join("cropped")
    }

    pub(crate) fn enlarged_dir(&self) -> PathBuf {
        self.root.join("enlarged")
    }

    pub(crate) fn stitched_path(&self) -> PathBuf {
        self.root.join("stitched_image.png")
    }

    pub(crate) fn export_html_path(&self) -> PathBuf {
        self.root.join("export.html")
    }

    /// Resolves a download name against the run root, refusing anything that
    /// escapes it. Plain names are also looked up in the enlarged and
    /// screenshots subdirectories so section images stay addressable by name.
    pub(crate) fn resolve_export(&self, filename: &str) -> Result<PathBuf> {
        let canonical_root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("failed to resolve run dir: {}", self.root.display()))?;
        let candidate = [
            self.root.join(filename),
            self.enlarged_dir().join(filename),
            self.screenshots_dir().join(filename),
        ]
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow!("export file not found: {}", filename))?;
        let canonical = std::fs::canonicalize(&candidate)
            .with_context(|| format!("export file not found: {}", filename))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(anyhow!("export path is not allowed"));
        }
        Ok(canonical)
    }
}

pub(crate) fn scratch_root(settings: &Settings) -> PathBuf {
    if let Some(dir) = settings.scratch_dir.as_deref() {
        return PathBuf::from(dir);
    }
    std::env::temp_dir().join("untext")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_get_distinct_directories() {
        let base = tempfile::tempdir().expect("tempdir");
        let first = RunDirs::create(base.path()).expect("run");
        let second = RunDirs::create(base.path()).expect("run");
        assert_ne!(first.run_id(), second.run_id());
        assert!(first.screenshots_dir().is_dir());
        assert!(second.enlarged_dir().is_dir());
    }

    #[test]
    fn export_rejects_path_traversal() {
        let base = tempfile::tempdir().expect("tempdir");
        let outside = base.path().join("secret.txt");
        std::fs::write(&outside, b"nope").expect("write");
        let run = RunDirs::create(base.path()).expect("run");
        assert!(run.resolve_export("../secret.txt").is_err());
    }

    #[test]
    fn export_serves_files_inside_run_root() {
        let base = tempfile::tempdir().expect("tempdir");
        let run = RunDirs::create(base.path()).expect("run");
        std::fs::write(run.stitched_path(), b"png").expect("write");
        let resolved = run.resolve_export("stitched_image.png").expect("resolve");
        assert!(resolved.ends_with("stitched_image.png"));
    }

    #[test]
    fn export_finds_section_images_by_name() {
        let base = tempfile::tempdir().expect("tempdir");
        let run = RunDirs::create(base.path()).expect("run");
        let name = "enlarged_screenshot_section_0.png";
        std::fs::write(run.enlarged_dir().join(name), b"png").expect("write");
        let resolved = run.resolve_export(name).expect("resolve");
        assert!(resolved.ends_with(name));
    }

    #[test]
    fn missing_export_file_is_an_error() {
        let base = tempfile::tempdir().expect("tempdir");
        let run = RunDirs::create(base.path()).expect("run");
        assert!(run.resolve_export("stitched_image.png").is_err());
    }
}
