use crate::error::StrataResult;
use crate::step::{is_dir_empty, Step};
use std::path::{Path, PathBuf};

/// Filesystem layout of an output root.
///
/// Sweep runs write flat `step{N}.json` result files; publish runs write one
/// `{step-dir-name}/` directory per checkpoint plus transient shared assets at
/// the root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn result_path(&self, step: Step) -> PathBuf {
        self.root.join(format!("step{step}.json"))
    }

    #[must_use]
    pub fn step_output_dir(&self, step_dir_name: &str) -> PathBuf {
        self.root.join(step_dir_name)
    }

    /// A step counts as done once its output directory exists and is non-empty.
    pub fn is_step_completed(&self, step_dir_name: &str) -> StrataResult<bool> {
        Ok(!is_dir_empty(&self.step_output_dir(step_dir_name))?)
    }

    pub fn ensure_root(&self) -> StrataResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path().join("out"));

        assert!(layout.result_path(Step(128)).ends_with("step128.json"));
        assert!(layout.step_output_dir("step2000").ends_with("out/step2000"));
    }

    #[test]
    fn test_step_completed_requires_non_empty_dir() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path().to_path_buf());

        assert!(!layout.is_step_completed("step1").unwrap());
        std::fs::create_dir(layout.step_output_dir("step1")).unwrap();
        assert!(!layout.is_step_completed("step1").unwrap());
        std::fs::write(layout.step_output_dir("step1").join("model.safetensors"), b"w").unwrap();
        assert!(layout.is_step_completed("step1").unwrap());
    }
}
