//! Checkpoint-to-publishable-format conversion.

use crate::config::ConverterSettings;
use crate::error::{StrataError, StrataResult};
use crate::step::Step;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    pub step: Step,
    pub input_dir: &'a Path,
    pub config_file: &'a Path,
    pub output_dir: &'a Path,
}

#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert one checkpoint. A non-zero exit is an error.
    async fn convert(&self, request: &ConvertRequest<'_>) -> StrataResult<()>;
}

/// Runs `{program} {args..} --input_dir <in> --config_file <cfg> --output_dir <out>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    settings: ConverterSettings,
}

impl CommandConverter {
    #[must_use]
    pub fn new(settings: ConverterSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn args(&self, request: &ConvertRequest<'_>) -> Vec<String> {
        let mut args = self.settings.args.clone();
        args.extend([
            "--input_dir".to_string(),
            request.input_dir.display().to_string(),
            "--config_file".to_string(),
            request.config_file.display().to_string(),
            "--output_dir".to_string(),
            request.output_dir.display().to_string(),
        ]);
        args
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, request: &ConvertRequest<'_>) -> StrataResult<()> {
        let args = self.args(request);
        tracing::debug!(program = %self.settings.program, ?args, "invoking converter");

        let status = Command::new(&self.settings.program).args(&args).status().await.map_err(|e| {
            StrataError::Converter {
                step: request.step,
                reason: format!("failed to start {}: {}", self.settings.program, e),
            }
        })?;

        if !status.success() {
            return Err(StrataError::Converter {
                step: request.step,
                reason: match status.code() {
                    Some(code) => format!("exited with code {code}"),
                    None => "terminated by signal".to_string(),
                },
            });
        }
        Ok(())
    }
}
