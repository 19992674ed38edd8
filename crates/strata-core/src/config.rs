//! Run configuration.
//!
//! Controllers take everything they need through these structs; nothing is read
//! from the environment or the current directory. Tunables can be loaded from
//! a TOML file with `[sweep]` and `[publish]` tables, and callers fill in the
//! per-run paths and names.

use crate::assets::ModelSize;
use crate::error::{StrataError, StrataResult};
use crate::step::StepSequence;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TASKS: [&str; 8] = [
    "lambada_openai",
    "piqa",
    "winogrande",
    "wsc273",
    "arc_easy",
    "arc_challenge",
    "sciq",
    "logiqa",
];

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Root of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub publish: PublishSettings,
}

impl StrataConfig {
    pub fn load_from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StrataError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| StrataError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }
}

/// How the evaluation harness is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub program: String,
    /// Value of `--model`, e.g. `hf`.
    pub model_backend: String,
    pub dtype: String,
    pub device: String,
    pub batch_size: String,
    pub extra_args: Vec<String>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            program: "lm_eval".to_string(),
            model_backend: "hf".to_string(),
            dtype: "float".to_string(),
            device: "cuda:0".to_string(),
            batch_size: "auto:4".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub steps: StepSequence,
    pub tasks: Vec<String>,
    /// Prefix of the revision label passed to the harness (`step` → `step1000`).
    pub revision_prefix: String,
    /// Leave steps whose `step{N}.json` already exists untouched.
    pub skip_existing: bool,
    pub harness: HarnessSettings,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            steps: StepSequence::pythia_schedule(),
            tasks: DEFAULT_TASKS.iter().map(ToString::to_string).collect(),
            revision_prefix: "step".to_string(),
            skip_existing: false,
            harness: HarnessSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Pretrained model identifier handed to the harness.
    pub model: String,
    pub output_dir: PathBuf,
    pub settings: SweepSettings,
}

impl SweepConfig {
    #[must_use]
    pub fn new(model: impl Into<String>, output_dir: PathBuf) -> Self {
        Self { model: model.into(), output_dir, settings: SweepSettings::default() }
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.model.trim().is_empty() {
            return Err(StrataError::InvalidConfig("model name is required".to_string()));
        }
        if self.settings.tasks.iter().all(|t| t.trim().is_empty()) {
            return Err(StrataError::InvalidConfig(
                "at least one evaluation task is required".to_string(),
            ));
        }
        if self.settings.harness.program.trim().is_empty() {
            return Err(StrataError::InvalidConfig("harness program is required".to_string()));
        }
        Ok(())
    }
}

/// What the registry's default branch receives when the final step is detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalStepPolicy {
    /// Upload the output of the last step published in this run. The detached
    /// checkpoint itself is never converted.
    #[default]
    ReuseLastPublished,
    /// Convert the detached checkpoint and upload its own output.
    ConvertDetached,
}

impl std::str::FromStr for FinalStepPolicy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reuse-last-published" => Ok(Self::ReuseLastPublished),
            "convert-detached" => Ok(Self::ConvertDetached),
            other => Err(StrataError::InvalidConfig(format!(
                "unknown final step policy '{other}' \
                 (expected reuse-last-published or convert-detached)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterSettings {
    pub program: String,
    /// Arguments placed before `--input_dir/--config_file/--output_dir`.
    pub args: Vec<String>,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self { program: "python".to_string(), args: vec!["tools/convert_to_hf.py".to_string()] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub base_url: String,
    /// Organisation prefix of the template repository (`{org}/pythia-{size}`).
    pub organization: String,
    pub files: Vec<String>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HUB_ENDPOINT.to_string(),
            organization: "EleutherAI".to_string(),
            files: vec!["special_tokens_map.json".to_string(), "tokenizer_config.json".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    #[default]
    Hub,
    Local,
}

impl std::str::FromStr for RegistryKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hub" => Ok(Self::Hub),
            "local" => Ok(Self::Local),
            other => Err(StrataError::InvalidConfig(format!(
                "unknown registry kind '{other}' (expected hub or local)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub kind: RegistryKind,
    pub endpoint: String,
    /// Root directory for the local registry.
    pub local_dir: Option<PathBuf>,
    pub private: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Hub,
            endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            local_dir: None,
            private: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Hold the highest step aside and publish to the default branch last.
    pub detach_final_step: bool,
    pub final_step: FinalStepPolicy,
    /// Branch name is `{branch_prefix}{step}`.
    pub branch_prefix: String,
    pub default_branch: String,
    pub converter: ConverterSettings,
    pub assets: AssetSettings,
    pub registry: RegistrySettings,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            detach_final_step: true,
            final_step: FinalStepPolicy::default(),
            branch_prefix: String::new(),
            default_branch: DEFAULT_BRANCH.to_string(),
            converter: ConverterSettings::default(),
            assets: AssetSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub checkpoints_dir: PathBuf,
    pub output_dir: PathBuf,
    /// File name looked up under `{step_dir}/configs/`.
    pub config_name: String,
    pub model_size: ModelSize,
    pub repository: String,
    pub settings: PublishSettings,
}

impl PublishConfig {
    pub fn validate(&self) -> StrataResult<()> {
        if self.config_name.trim().is_empty() {
            return Err(StrataError::InvalidConfig("config file name is required".to_string()));
        }
        if self.repository.trim().is_empty() {
            return Err(StrataError::InvalidConfig("repository name is required".to_string()));
        }
        if self.settings.default_branch.trim().is_empty() {
            return Err(StrataError::InvalidConfig("default branch name is required".to_string()));
        }
        if self.settings.converter.program.trim().is_empty() {
            return Err(StrataError::InvalidConfig("converter program is required".to_string()));
        }
        if !self.checkpoints_dir.is_dir() {
            return Err(StrataError::InvalidConfig(format!(
                "checkpoints directory {} does not exist",
                self.checkpoints_dir.display()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn branch_for(&self, step: crate::step::Step) -> String {
        format!("{}{}", self.settings.branch_prefix, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_defaults_match_pythia_tooling() {
        let settings = SweepSettings::default();
        assert_eq!(settings.tasks.len(), 8);
        assert_eq!(settings.harness.program, "lm_eval");
        assert_eq!(settings.harness.batch_size, "auto:4");
        assert_eq!(settings.revision_prefix, "step");
        assert!(!settings.skip_existing);
    }

    #[test]
    fn test_sweep_validate_requires_model_and_tasks() {
        let mut config = SweepConfig::new("", PathBuf::from("out"));
        assert!(config.validate().is_err());
        config.model = "EleutherAI/pythia-14m".to_string();
        assert!(config.validate().is_ok());
        config.settings.tasks.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("strata.toml");
        std::fs::write(
            &path,
            r#"
[sweep]
steps = [64, 0, 8]
tasks = ["piqa"]

[sweep.harness]
device = "cpu"

[publish]
final_step = "convert-detached"
branch_prefix = "step"

[publish.registry]
kind = "local"
local_dir = "/tmp/registry"
"#,
        )
        .unwrap();

        let config = StrataConfig::load_from_file(&path).unwrap();
        assert_eq!(config.sweep.steps.as_slice(), &[Step(0), Step(8), Step(64)]);
        assert_eq!(config.sweep.tasks, vec!["piqa".to_string()]);
        assert_eq!(config.sweep.harness.device, "cpu");
        assert_eq!(config.sweep.harness.program, "lm_eval");
        assert_eq!(config.publish.final_step, FinalStepPolicy::ConvertDetached);
        assert!(config.publish.detach_final_step);
        assert_eq!(config.publish.registry.kind, RegistryKind::Local);
        assert_eq!(config.publish.default_branch, "main");
    }

    #[test]
    fn test_load_missing_file_is_invalid_config() {
        let err = StrataConfig::load_from_file(Path::new("/nonexistent/strata.toml")).unwrap_err();
        assert!(matches!(err, StrataError::InvalidConfig(_)));
    }

    #[test]
    fn test_publish_validate_and_branch_naming() {
        let temp = TempDir::new().unwrap();
        let mut config = PublishConfig {
            checkpoints_dir: temp.path().to_path_buf(),
            output_dir: temp.path().join("out"),
            config_name: "model.yml".to_string(),
            model_size: ModelSize::M14,
            repository: "org/pythia-14m-replica".to_string(),
            settings: PublishSettings::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.branch_for(Step(0)), "0");
        config.settings.branch_prefix = "step".to_string();
        assert_eq!(config.branch_for(Step(1000)), "step1000");

        config.checkpoints_dir = temp.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_final_step_policy_from_str() {
        assert_eq!(
            "convert-detached".parse::<FinalStepPolicy>().unwrap(),
            FinalStepPolicy::ConvertDetached
        );
        assert!("latest".parse::<FinalStepPolicy>().is_err());
    }
}
