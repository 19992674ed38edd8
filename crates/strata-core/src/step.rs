//! Step identifiers and checkpoint directory discovery.

use crate::error::StrataResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A training step number. Ordered by its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Step(pub u64);

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Step {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Extract a step number from a directory name or label.
///
/// All ASCII digits are concatenated in their original order and parsed as one
/// integer, so `global_step1000` is `1000` and `a1b2` is `12`. Returns `None`
/// when the name has no digits or the digits overflow `u64`.
#[must_use]
pub fn extract_step(name: &str) -> Option<Step> {
    let digits: String = name.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok().map(Step)
}

/// An ascending, duplicate-free list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Step>", into = "Vec<Step>")]
pub struct StepSequence(Vec<Step>);

impl StepSequence {
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let mut steps: Vec<Step> = steps.into_iter().collect();
        steps.sort_unstable();
        steps.dedup();
        Self(steps)
    }

    /// The checkpoint schedule used by the Pythia training runs: log-spaced
    /// early steps, then every thousand steps up to 20000.
    #[must_use]
    pub fn pythia_schedule() -> Self {
        let early = [0u64, 1, 2, 4, 8, 16, 32, 64, 128, 256, 512];
        let later = (1..=20).map(|k| k * 1000);
        Self::new(early.into_iter().chain(later).map(Step))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Step] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<Step>> for StepSequence {
    fn from(steps: Vec<Step>) -> Self {
        Self::new(steps)
    }
}

impl From<StepSequence> for Vec<Step> {
    fn from(seq: StepSequence) -> Self {
        seq.0
    }
}

/// A checkpoint directory discovered under the checkpoints root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDir {
    pub step: Step,
    /// Directory name, e.g. `step1000` or `global_step1000`.
    pub name: String,
    pub path: PathBuf,
}

/// List the immediate subdirectories of `root` that carry a step number,
/// sorted ascending by step. Subdirectories without digits are skipped.
pub fn discover_step_dirs(root: &Path) -> StrataResult<Vec<StepDir>> {
    let mut out = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match extract_step(&name) {
            Some(step) => out.push(StepDir { step, name, path }),
            None => {
                tracing::warn!(dir = %path.display(), "ignoring directory without a step number");
            }
        }
    }

    out.sort_by(|a, b| a.step.cmp(&b.step).then_with(|| a.name.cmp(&b.name)));
    Ok(out)
}

/// Whether `dir` has no entries. A missing directory counts as empty.
pub fn is_dir_empty(dir: &Path) -> StrataResult<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}
