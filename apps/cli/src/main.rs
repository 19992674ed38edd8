//! Strata CLI - batch evaluation and publishing of training checkpoints
//!
//! Provides a `strata` command with two workflows over numbered checkpoints:
//! `sweep` runs an evaluation harness at every step, `publish` converts each
//! checkpoint and uploads it to a registry branch.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{publish, sweep, PublishArgs, RunContext, SweepArgs};

/// Strata CLI - checkpoint sweep and publish sequencer
#[derive(Parser, Debug)]
#[command(
    name = "strata",
    author,
    version,
    about = "Strata - evaluate and publish training checkpoints step by step"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./strata.toml, then ~/.strata/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the evaluation harness for every step
    ///
    /// Steps run in ascending order. The first harness failure or missing
    /// result file stops the sweep.
    Sweep(SweepArgs),

    /// Convert checkpoints and publish them to registry branches
    ///
    /// Each step goes to a branch named after its number. Steps whose output
    /// directory is already populated, or that have no config file, are
    /// skipped.
    Publish(PublishArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so `--json` output stays parseable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::load_config(args.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let ctx = RunContext { config, json: args.json, cancel };

    match args.command {
        Command::Sweep(cmd) => sweep::execute(cmd, &ctx).await?,
        Command::Publish(cmd) => publish::execute(cmd, &ctx).await?,
    }

    Ok(())
}
