//! Evaluation harness invocation.

use crate::config::HarnessSettings;
use crate::error::{StrataError, StrataResult};
use crate::step::Step;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// One harness run for one step.
#[derive(Debug, Clone)]
pub struct EvalRequest<'a> {
    pub step: Step,
    pub model: &'a str,
    /// Revision label, e.g. `step1000`.
    pub revision: String,
    pub tasks: &'a [String],
    pub output_root: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Result file reported by the harness itself. When `None` the sweep scans
    /// the output root.
    pub result_path: Option<PathBuf>,
}

#[async_trait]
pub trait EvalHarness: Send + Sync {
    async fn evaluate(&self, request: &EvalRequest<'_>) -> StrataResult<HarnessOutcome>;
}

/// Runs an `lm_eval`-compatible command line.
#[derive(Debug, Clone)]
pub struct CommandHarness {
    settings: HarnessSettings,
}

impl CommandHarness {
    #[must_use]
    pub fn new(settings: HarnessSettings) -> Self {
        Self { settings }
    }

    /// Arguments passed to the harness program.
    #[must_use]
    pub fn args(&self, request: &EvalRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.settings.model_backend.clone(),
            "--model_args".to_string(),
            format!(
                "pretrained={},revision={},dtype={}",
                request.model, request.revision, self.settings.dtype
            ),
            "--tasks".to_string(),
            request.tasks.join(","),
            "--device".to_string(),
            self.settings.device.clone(),
            "--batch_size".to_string(),
            self.settings.batch_size.clone(),
            "--output_path".to_string(),
            request.output_root.display().to_string(),
        ];
        args.extend(self.settings.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl EvalHarness for CommandHarness {
    async fn evaluate(&self, request: &EvalRequest<'_>) -> StrataResult<HarnessOutcome> {
        let args = self.args(request);
        tracing::debug!(program = %self.settings.program, ?args, "invoking evaluation harness");

        let status = Command::new(&self.settings.program)
            .args(&args)
            .status()
            .await
            .map_err(|e| StrataError::Harness {
                step: request.step,
                reason: format!("failed to start {}: {}", self.settings.program, e),
            })?;

        Ok(HarnessOutcome {
            success: status.success(),
            exit_code: status.code(),
            result_path: None,
        })
    }
}
