//! Publish controller.
//!
//! Discovers checkpoint directories, converts each one, attaches the shared
//! assets and uploads it to a branch named after its step. The highest step can
//! be held aside so that the registry's default branch is written last.
//!
//! Error classes:
//! - missing per-step config or an already populated output directory skips
//!   the step and the run continues;
//! - a failed shared asset download is logged and the run continues;
//! - converter and registry failures abort the run. The error carries the
//!   branches already published.
//!
//! Staged shared assets are removed on every exit path.

use crate::artifacts::{
    digest_directory, record_failure, ArtifactStatus, PublishReport, PublishedBranch, SkipReason,
    StepArtifact,
};
use crate::assets::{AssetSource, SharedAssetSet, StagedAssets};
use crate::config::{FinalStepPolicy, PublishConfig};
use crate::converter::{ConvertRequest, Converter};
use crate::error::{StrataError, StrataResult};
use crate::layout::OutputLayout;
use crate::progress::{ProgressEvent, ProgressSink, RunKind};
use crate::registry::{ArtifactRegistry, RegistryBranch, RepoHandle};
use crate::step::{discover_step_dirs, Step, StepDir};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const CONFIGS_DIR: &str = "configs";

pub struct PublishController {
    config: PublishConfig,
    layout: OutputLayout,
    converter: Arc<dyn Converter>,
    registry: Arc<dyn ArtifactRegistry>,
    assets: Arc<dyn AssetSource>,
    cancel: CancellationToken,
}

impl PublishController {
    #[must_use]
    pub fn new(
        config: PublishConfig,
        converter: Arc<dyn Converter>,
        registry: Arc<dyn ArtifactRegistry>,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        let layout = OutputLayout::new(config.output_dir.clone());
        Self { config, layout, converter, registry, assets, cancel: CancellationToken::new() }
    }

    /// Checked between steps; an in-flight conversion or upload is never interrupted.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, progress: &dyn ProgressSink) -> StrataResult<PublishReport> {
        self.config.validate()?;
        self.layout.ensure_root()?;
        let settings = &self.config.settings;
        let mut report = PublishReport::new(&self.config.repository);

        tracing::info!(repo = %self.config.repository, "creating repository");
        let repo = self.registry.create_repository(&self.config.repository).await?;

        let staged = SharedAssetSet::for_model(&settings.assets, self.config.model_size)
            .stage(self.assets.as_ref(), self.layout.root())
            .await?;
        report.shared_assets = staged.names();

        let mut steps = discover_step_dirs(&self.config.checkpoints_dir)?;
        let detached = if settings.detach_final_step { steps.pop() } else { None };
        report.detached = detached.as_ref().map(|d| d.step);
        if let Some(d) = &detached {
            tracing::info!(step = d.step.0, "holding {} aside for the default branch", d.name);
        }

        progress.on_event(ProgressEvent::Started { run: RunKind::Publish, total: steps.len() });

        let mut last_published: Option<RegistryBranch> = None;
        for step_dir in &steps {
            let step = step_dir.step;
            if self.cancelled_before(step) {
                return Err(abort(step, report, StrataError::Cancelled(step)));
            }

            let processed =
                self.process_step(&repo, step_dir, &staged, &mut report, progress).await;
            match processed {
                Ok(Some(branch)) => last_published = Some(branch),
                Ok(None) => {}
                Err(e) => return Err(abort(step, report, e)),
            }
        }

        if let Some(final_dir) = &detached {
            let step = final_dir.step;
            if self.cancelled_before(step) {
                return Err(abort(step, report, StrataError::Cancelled(step)));
            }

            let published = self
                .publish_final(&repo, final_dir, last_published, &staged, &mut report, progress)
                .await;
            if let Err(e) = published {
                return Err(abort(step, report, e));
            }
        }

        // Removes the staged asset files.
        drop(staged);
        report.finished_at = Some(chrono::Utc::now());
        progress.on_event(ProgressEvent::Finished { run: RunKind::Publish });
        Ok(report)
    }

    fn pending_artifact(&self, step_dir: &StepDir) -> StepArtifact {
        let output_dir = self.layout.step_output_dir(&step_dir.name);
        StepArtifact::pending(step_dir.step, step_dir.path.clone(), output_dir)
    }

    /// Records the step in `report` whichever way it ends. Returns the branch
    /// when something was uploaded.
    async fn process_step(
        &self,
        repo: &RepoHandle,
        step_dir: &StepDir,
        staged: &StagedAssets,
        report: &mut PublishReport,
        progress: &dyn ProgressSink,
    ) -> StrataResult<Option<RegistryBranch>> {
        let mut artifact = self.pending_artifact(step_dir);
        let result =
            self.convert_and_upload(repo, step_dir, &mut artifact, staged, report, progress).await;
        match result {
            Ok(published) => {
                report.artifacts.push(artifact);
                Ok(published)
            }
            Err(e) => {
                record_failure(&mut report.artifacts, artifact, &e);
                Err(e)
            }
        }
    }

    async fn convert_and_upload(
        &self,
        repo: &RepoHandle,
        step_dir: &StepDir,
        artifact: &mut StepArtifact,
        staged: &StagedAssets,
        report: &mut PublishReport,
        progress: &dyn ProgressSink,
    ) -> StrataResult<Option<RegistryBranch>> {
        self.prepare_step(step_dir, artifact, staged, progress).await?;
        if artifact.status != ArtifactStatus::Converted {
            return Ok(None);
        }

        let branch = self.config.branch_for(step_dir.step);
        self.registry.create_branch(repo, &branch).await?;
        self.upload(repo, artifact, &branch, report, progress).await?;

        progress.on_event(ProgressEvent::StepFinished {
            step: step_dir.step,
            label: step_dir.name.clone(),
        });
        Ok(Some(RegistryBranch { name: branch, output: artifact.output_location.clone() }))
    }

    /// Resumability check, config lookup, conversion and asset attachment.
    /// Leaves the artifact `Skipped` or `Converted`.
    async fn prepare_step(
        &self,
        step_dir: &StepDir,
        artifact: &mut StepArtifact,
        staged: &StagedAssets,
        progress: &dyn ProgressSink,
    ) -> StrataResult<()> {
        let step = step_dir.step;
        let label = step_dir.name.as_str();
        let output_dir = artifact.output_location.clone();
        progress.on_event(ProgressEvent::StepStarted { step, label: label.to_string() });

        if self.layout.is_step_completed(label)? {
            tracing::info!(
                step = step.0,
                dir = %output_dir.display(),
                "output directory is not empty, skipping"
            );
            skip(artifact, label, SkipReason::OutputExists, progress);
            return Ok(());
        }

        let config_file = step_dir.path.join(CONFIGS_DIR).join(&self.config.config_name);
        if !config_file.is_file() {
            tracing::warn!(
                step = step.0,
                config = %config_file.display(),
                "config file not found, skipping"
            );
            skip(artifact, label, SkipReason::MissingConfig, progress);
            return Ok(());
        }
        artifact.config_reference = Some(config_file.clone());

        tracing::info!(step = step.0, "running conversion for {label}");
        let request = ConvertRequest {
            step,
            input_dir: &step_dir.path,
            config_file: &config_file,
            output_dir: &output_dir,
        };
        if let Err(e) = self.converter.convert(&request).await {
            discard_output(&output_dir);
            return Err(e);
        }

        staged.copy_into(&output_dir)?;
        artifact.status = ArtifactStatus::Converted;
        Ok(())
    }

    async fn upload(
        &self,
        repo: &RepoHandle,
        artifact: &mut StepArtifact,
        branch: &str,
        report: &mut PublishReport,
        progress: &dyn ProgressSink,
    ) -> StrataResult<()> {
        tracing::info!(step = artifact.step.0, repo = %repo.id, %branch, "uploading");
        self.registry.upload_directory(repo, &artifact.output_location, branch).await?;

        report.branches.push(PublishedBranch {
            branch: branch.to_string(),
            step: artifact.step,
            source: artifact.output_location.clone(),
            files: digest_directory(&artifact.output_location)?,
        });
        artifact.status = ArtifactStatus::Published { branch: branch.to_string() };
        progress.on_event(ProgressEvent::Uploaded {
            step: artifact.step,
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn publish_final(
        &self,
        repo: &RepoHandle,
        final_dir: &StepDir,
        last_published: Option<RegistryBranch>,
        staged: &StagedAssets,
        report: &mut PublishReport,
        progress: &dyn ProgressSink,
    ) -> StrataResult<()> {
        let main = self.config.settings.default_branch.as_str();

        match self.config.settings.final_step {
            FinalStepPolicy::ReuseLastPublished => {
                let Some(last) = last_published else {
                    tracing::warn!(
                        branch = %main,
                        "no step was published in this run, not updating the default branch"
                    );
                    return Ok(());
                };
                tracing::warn!(
                    detached = final_dir.step.0,
                    "{} was not converted; {} receives the output of {}",
                    final_dir.name,
                    main,
                    last.output.display()
                );
                progress.on_event(ProgressEvent::Message {
                    message: format!("{main} receives the output of branch {}", last.name),
                });
                let step = report
                    .branches
                    .iter()
                    .rev()
                    .find(|b| b.branch == last.name)
                    .map_or(final_dir.step, |b| b.step);
                let mut artifact = StepArtifact::pending(step, last.output.clone(), last.output);
                let uploaded = self.upload(repo, &mut artifact, main, report, progress).await;
                if let Err(e) = uploaded {
                    let record = StepArtifact::pending(
                        final_dir.step,
                        final_dir.path.clone(),
                        artifact.output_location,
                    );
                    record_failure(&mut report.artifacts, record, &e);
                    return Err(e);
                }
                Ok(())
            }
            FinalStepPolicy::ConvertDetached => {
                let mut artifact = self.pending_artifact(final_dir);
                let result = self
                    .convert_for_default_branch(
                        repo,
                        final_dir,
                        &mut artifact,
                        staged,
                        report,
                        progress,
                    )
                    .await;
                match result {
                    Ok(()) => {
                        report.artifacts.push(artifact);
                        Ok(())
                    }
                    Err(e) => {
                        record_failure(&mut report.artifacts, artifact, &e);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn convert_for_default_branch(
        &self,
        repo: &RepoHandle,
        final_dir: &StepDir,
        artifact: &mut StepArtifact,
        staged: &StagedAssets,
        report: &mut PublishReport,
        progress: &dyn ProgressSink,
    ) -> StrataResult<()> {
        let main = self.config.settings.default_branch.as_str();
        self.prepare_step(final_dir, artifact, staged, progress).await?;

        let ready = matches!(
            artifact.status,
            ArtifactStatus::Converted | ArtifactStatus::Skipped { reason: SkipReason::OutputExists }
        );
        if !ready {
            tracing::warn!(
                step = final_dir.step.0,
                branch = %main,
                "final step not converted, not updating the default branch"
            );
            return Ok(());
        }
        self.upload(repo, artifact, main, report, progress).await
    }

    fn cancelled_before(&self, step: Step) -> bool {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            tracing::warn!(step = step.0, "publish run cancelled");
        }
        cancelled
    }
}

fn skip(artifact: &mut StepArtifact, label: &str, reason: SkipReason, progress: &dyn ProgressSink) {
    artifact.status = ArtifactStatus::Skipped { reason };
    progress.on_event(ProgressEvent::StepSkipped {
        step: artifact.step,
        label: label.to_string(),
        reason,
    });
}

/// Remove what a failed conversion left behind so the next run retries the step.
fn discard_output(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => tracing::info!(dir = %dir.display(), "removed partial conversion output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove partial output");
        }
    }
}

fn abort(step: Step, report: PublishReport, source: StrataError) -> StrataError {
    let published = report.branch_names();
    tracing::error!(step = step.0, ?published, error = %source, "publish run aborted");
    StrataError::Publish { step, report: Box::new(report), source: Box::new(source) }
}
