use crate::artifacts::{PublishReport, SweepReport};
use crate::step::Step;
use thiserror::Error;

pub type StrataResult<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("evaluation harness failed for step {step}: {reason}")]
    Harness { step: Step, reason: String },

    #[error("no result file found for step {step} under {root}")]
    MissingResult { step: Step, root: String },

    #[error("converter failed for step {step}: {reason}")]
    Converter { step: Step, reason: String },

    #[error("registry error: {0}")]
    Registry(String),

    /// A fatal error during a sweep. `report` holds every step recorded so
    /// far, the failing one marked `failed`.
    #[error(
        "sweep aborted at step {step} after {} evaluated step(s): {source}",
        .report.evaluated().count()
    )]
    Sweep {
        step: Step,
        report: Box<SweepReport>,
        #[source]
        source: Box<StrataError>,
    },

    /// A fatal error during a publish run. `report` holds the branches already
    /// uploaded and the failing step marked `failed`.
    #[error(
        "publish aborted at step {step} after {} published branch(es): {source}",
        .report.branches.len()
    )]
    Publish {
        step: Step,
        report: Box<PublishReport>,
        #[source]
        source: Box<StrataError>,
    },

    #[error("asset error: {0}")]
    Asset(String),

    #[error("run cancelled before step {0}")]
    Cancelled(Step),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Whether this error stopped the run at a step boundary rather than inside a step.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Sweep { source, .. } | Self::Publish { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::PublishedBranch;
    use std::path::PathBuf;

    fn branch(name: &str, step: u64) -> PublishedBranch {
        PublishedBranch {
            branch: name.to_string(),
            step: Step(step),
            source: PathBuf::from(format!("out/step{step}")),
            files: Vec::new(),
        }
    }

    #[test]
    fn test_publish_error_reports_partial_state() {
        let mut report = PublishReport::new("org/model");
        report.branches = vec![branch("1000", 1000), branch("2000", 2000)];
        let err = StrataError::Publish {
            step: Step(3000),
            report: Box::new(report),
            source: Box::new(StrataError::Registry("upload rejected".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("step 3000"));
        assert!(msg.contains("2 published branch(es)"));
        assert!(msg.contains("upload rejected"));
    }

    #[test]
    fn test_cancelled_is_detected_through_run_wrappers() {
        let publish = StrataError::Publish {
            step: Step(1),
            report: Box::new(PublishReport::new("org/model")),
            source: Box::new(StrataError::Cancelled(Step(1))),
        };
        let sweep = StrataError::Sweep {
            step: Step(4),
            report: Box::new(SweepReport::new()),
            source: Box::new(StrataError::Cancelled(Step(4))),
        };
        assert!(publish.is_cancelled());
        assert!(sweep.is_cancelled());
        assert!(!StrataError::Registry("x".to_string()).is_cancelled());
    }
}
