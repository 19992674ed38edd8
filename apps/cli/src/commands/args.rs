//! Argument definitions shared between main.rs and the command modules.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Pretrained model identifier passed to the harness
    #[arg(short = 'm', long = "model-name")]
    pub model_name: String,

    /// Directory receiving the step{N}.json result files
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,

    /// Comma-separated step numbers (defaults to the Pythia schedule)
    #[arg(long, value_delimiter = ',')]
    pub steps: Vec<u64>,

    /// Comma-separated evaluation tasks
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<String>,

    /// Harness program to invoke
    #[arg(long)]
    pub harness: Option<String>,

    /// Device selector passed to the harness (e.g. cuda:0, cpu)
    #[arg(long)]
    pub device: Option<String>,

    /// Batch size policy passed to the harness (e.g. auto:4)
    #[arg(long)]
    pub batch_size: Option<String>,

    /// Numeric precision passed to the harness (e.g. float, bfloat16)
    #[arg(long)]
    pub dtype: Option<String>,

    /// Keep step{N}.json files from an earlier run instead of re-evaluating
    #[arg(long)]
    pub skip_existing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Directory containing one subdirectory per checkpoint step
    #[arg(short = 'd', long = "checkpoints-dir")]
    pub checkpoints_dir: PathBuf,

    /// Directory receiving the converted step directories
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,

    /// Name of the per-step configuration file under configs/
    #[arg(short = 'n', long = "config-name")]
    pub config_name: String,

    /// Pythia size (14M, 31M, 70M, 160M, 410M, 1B, 1.4B, 2.8B, 6.9B, 12B)
    #[arg(short = 'p', long = "pythia-type")]
    pub pythia_type: String,

    /// Registry repository name (e.g. org/pythia-14m-replica)
    #[arg(short = 'r', long = "repo-name")]
    pub repo_name: String,

    /// Hold the highest step aside for the default branch (true/false)
    #[arg(long, action = clap::ArgAction::Set)]
    pub last_step_in_training: Option<bool>,

    /// What the default branch receives: reuse-last-published or convert-detached
    #[arg(long)]
    pub final_step: Option<String>,

    /// Prefix prepended to the step number to form branch names
    #[arg(long)]
    pub branch_prefix: Option<String>,

    /// Converter program
    #[arg(long)]
    pub converter: Option<String>,

    /// Arguments passed to the converter before the path flags (repeatable)
    #[arg(long = "converter-arg", allow_hyphen_values = true)]
    pub converter_args: Vec<String>,

    /// Registry backend: hub or local
    #[arg(long)]
    pub registry: Option<String>,

    /// Root directory for the local registry
    #[arg(long)]
    pub registry_dir: Option<PathBuf>,

    /// Hub API endpoint
    #[arg(long)]
    pub hub_endpoint: Option<String>,

    /// Base URL of the shared asset templates
    #[arg(long)]
    pub asset_base_url: Option<String>,

    /// Registry access token (falls back to HF_TOKEN)
    #[arg(long)]
    pub token: Option<String>,
}
