//! Evaluation sweep: run the harness once per step, in ascending order, and
//! archive each result as `step{N}.json`. The first failure ends the sweep.

use crate::artifacts::{record_failure, ArtifactStatus, SkipReason, StepArtifact, SweepReport};
use crate::config::SweepConfig;
use crate::error::{StrataError, StrataResult};
use crate::harness::{EvalHarness, EvalRequest};
use crate::layout::OutputLayout;
use crate::progress::{ProgressEvent, ProgressSink, RunKind};
use crate::step::Step;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

pub struct EvaluationSweep {
    config: SweepConfig,
    layout: OutputLayout,
    harness: Arc<dyn EvalHarness>,
    cancel: CancellationToken,
}

impl EvaluationSweep {
    #[must_use]
    pub fn new(config: SweepConfig, harness: Arc<dyn EvalHarness>) -> Self {
        let layout = OutputLayout::new(config.output_dir.clone());
        Self { config, layout, harness, cancel: CancellationToken::new() }
    }

    /// Checked between steps; an in-flight harness run is never interrupted.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, progress: &dyn ProgressSink) -> StrataResult<SweepReport> {
        self.config.validate()?;
        self.layout.ensure_root()?;

        let settings = &self.config.settings;
        let mut report = SweepReport::new();
        progress.on_event(ProgressEvent::Started {
            run: RunKind::Sweep,
            total: settings.steps.len(),
        });

        for step in settings.steps.iter() {
            if self.cancel.is_cancelled() {
                tracing::warn!(step = step.0, "sweep cancelled");
                return Err(abort(step, report, StrataError::Cancelled(step)));
            }

            let revision = format!("{}{}", settings.revision_prefix, step);
            let result_path = self.layout.result_path(step);
            let mut artifact =
                StepArtifact::pending(step, PathBuf::from(&revision), result_path.clone());

            if settings.skip_existing && result_path.is_file() {
                let reason = SkipReason::ResultExists;
                artifact.status = ArtifactStatus::Skipped { reason };
                progress.on_event(ProgressEvent::StepSkipped { step, label: revision, reason });
                report.artifacts.push(artifact);
                continue;
            }

            progress.on_event(ProgressEvent::StepStarted { step, label: revision.clone() });
            if let Err(e) = self.evaluate_step(step, &revision).await {
                record_failure(&mut report.artifacts, artifact, &e);
                return Err(abort(step, report, e));
            }

            artifact.status = ArtifactStatus::Evaluated;
            report.artifacts.push(artifact);
            progress.on_event(ProgressEvent::StepFinished { step, label: revision });
        }

        report.finished_at = Some(chrono::Utc::now());
        progress.on_event(ProgressEvent::Finished { run: RunKind::Sweep });
        Ok(report)
    }

    async fn evaluate_step(&self, step: Step, revision: &str) -> StrataResult<()> {
        let request = EvalRequest {
            step,
            model: &self.config.model,
            revision: revision.to_string(),
            tasks: &self.config.settings.tasks,
            output_root: self.layout.root(),
        };

        let outcome = self.harness.evaluate(&request).await?;
        if !outcome.success {
            let reason = match outcome.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            tracing::error!(step = step.0, %reason, "evaluation harness failed");
            return Err(StrataError::Harness { step, reason });
        }

        let found = match outcome.result_path {
            Some(path) if path.is_file() => Some(path),
            _ => find_result_file(self.layout.root())?,
        };
        let Some(found) = found else {
            tracing::error!(step = step.0, "no result file produced");
            return Err(StrataError::MissingResult {
                step,
                root: self.layout.root().display().to_string(),
            });
        };

        archive_result(&found, &self.layout.result_path(step))
    }
}

fn abort(step: Step, report: SweepReport, source: StrataError) -> StrataError {
    let evaluated = report.evaluated().count();
    tracing::error!(step = step.0, evaluated, error = %source, "sweep aborted");
    StrataError::Sweep { step, report: Box::new(report), source: Box::new(source) }
}

/// Newest `*.json` file directly inside any immediate subdirectory of `root`.
/// Ties on modification time go to the lexically greatest path.
pub fn find_result_file(root: &Path) -> StrataResult<Option<PathBuf>> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let subdir = entry?.path();
        if !subdir.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(&subdir)? {
            let path = file?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                let modified = std::fs::metadata(&path)?.modified()?;
                candidates.push((modified, path));
            }
        }
    }

    candidates.sort();
    if candidates.len() > 1 {
        tracing::warn!(
            count = candidates.len(),
            chosen = %candidates[candidates.len() - 1].1.display(),
            "multiple result files found, using the most recent"
        );
    }
    Ok(candidates.pop().map(|(_, path)| path))
}

/// Move `found` to `dest` and drop its parent directory if that left it empty.
fn archive_result(found: &Path, dest: &Path) -> StrataResult<()> {
    std::fs::rename(found, dest)?;

    if let Some(parent) = found.parent().filter(|p| Some(*p) != dest.parent()) {
        if let Err(e) = std::fs::remove_dir(parent) {
            tracing::warn!(dir = %parent.display(), error = %e, "left result directory in place");
        }
    }
    Ok(())
}
