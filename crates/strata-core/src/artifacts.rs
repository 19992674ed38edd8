use crate::error::{StrataError, StrataResult};
use crate::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Output directory already exists and is non-empty.
    OutputExists,
    /// No `configs/<name>` file inside the checkpoint directory.
    MissingConfig,
    /// Sweep result file for this step is already present.
    ResultExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Skipped { reason: SkipReason },
    /// Sweep: harness finished and the result file was archived.
    Evaluated,
    /// Publish: converter finished and shared assets were attached.
    Converted,
    Published { branch: String },
    /// The step that ended the run.
    Failed { reason: String },
}

/// Per-step record for one run. Status only moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepArtifact {
    pub step: Step,
    pub source_location: PathBuf,
    pub config_reference: Option<PathBuf>,
    pub output_location: PathBuf,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

impl StepArtifact {
    #[must_use]
    pub fn pending(step: Step, source_location: PathBuf, output_location: PathBuf) -> Self {
        Self {
            step,
            source_location,
            config_reference: None,
            output_location,
            status: ArtifactStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Path relative to the digested directory, `/`-separated.
    pub path: String,
    pub sha256: String,
}

pub fn sha256_file(path: &Path) -> StrataResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hash every regular file under `dir`, sorted by relative path.
pub fn digest_directory(dir: &Path) -> StrataResult<Vec<FileDigest>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StrataError::Other(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        out.push(FileDigest {
            path: relative_unix_path(dir, entry.path()),
            sha256: sha256_file(entry.path())?,
        });
    }
    Ok(out)
}

pub(crate) fn relative_unix_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedBranch {
    pub branch: String,
    pub step: Step,
    pub source: PathBuf,
    pub files: Vec<FileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<StepArtifact>,
}

impl SweepReport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            artifacts: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(&self) -> Option<&StepArtifact> {
        self.artifacts.iter().find(|a| matches!(a.status, ArtifactStatus::Failed { .. }))
    }

    /// Steps that produced a fresh result file in this run.
    pub fn evaluated(&self) -> impl Iterator<Item = &StepArtifact> {
        self.artifacts.iter().filter(|a| a.status == ArtifactStatus::Evaluated)
    }
}

impl Default for SweepReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReport {
    pub run_id: Uuid,
    pub repository: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<StepArtifact>,
    /// Step held aside for the default branch, if detachment was enabled.
    pub detached: Option<Step>,
    /// Branches uploaded in this run, in upload order. `main` is always last.
    pub branches: Vec<PublishedBranch>,
    /// Shared asset files that were successfully staged.
    pub shared_assets: Vec<String>,
}

impl PublishReport {
    #[must_use]
    pub fn new(repository: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repository: repository.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            artifacts: Vec::new(),
            detached: None,
            branches: Vec::new(),
            shared_assets: Vec::new(),
        }
    }

    #[must_use]
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.branch.clone()).collect()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepArtifact> {
        self.artifacts.iter().filter(|a| matches!(a.status, ArtifactStatus::Skipped { .. }))
    }

    #[must_use]
    pub fn failed(&self) -> Option<&StepArtifact> {
        self.artifacts.iter().find(|a| matches!(a.status, ArtifactStatus::Failed { .. }))
    }
}

/// Mark `artifact` as the step that ended the run and append it to `artifacts`.
pub(crate) fn record_failure(
    artifacts: &mut Vec<StepArtifact>,
    mut artifact: StepArtifact,
    error: &StrataError,
) {
    artifact.status = ArtifactStatus::Failed { reason: error.to_string() };
    artifacts.push(artifact);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_digest_directory_is_sorted_and_relative() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("b.json"), "{}").unwrap();
        std::fs::write(temp.path().join("a.bin"), [0u8, 1, 2]).unwrap();
        std::fs::write(temp.path().join("nested").join("c.txt"), "c").unwrap();

        let digests = digest_directory(temp.path()).unwrap();
        let paths: Vec<_> = digests.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.bin", "b.json", "nested/c.txt"]);
        assert_eq!(digests[1].sha256, sha256_file(&temp.path().join("b.json")).unwrap());
        assert_eq!(digests[1].sha256.len(), 64);
    }

    #[test]
    fn test_artifact_status_serializes_flat() {
        let mut artifact =
            StepArtifact::pending(Step(5), PathBuf::from("ckpt/step5"), PathBuf::from("out/step5"));
        artifact.status = ArtifactStatus::Skipped { reason: SkipReason::MissingConfig };

        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["step"], 5);
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "missing_config");
    }

    #[test]
    fn test_record_failure_names_the_step() {
        let mut report = PublishReport::new("org/model");
        let artifact =
            StepArtifact::pending(Step(7), PathBuf::from("ckpt/step7"), PathBuf::from("out/step7"));
        let err =
            StrataError::Converter { step: Step(7), reason: "exited with code 1".to_string() };

        record_failure(&mut report.artifacts, artifact, &err);

        let failed = report.failed().unwrap();
        assert_eq!(failed.step, Step(7));
        assert_eq!(
            failed.status,
            ArtifactStatus::Failed {
                reason: "converter failed for step 7: exited with code 1".to_string()
            }
        );
        let value = serde_json::to_value(failed).unwrap();
        assert_eq!(value["status"], "failed");
    }
}
