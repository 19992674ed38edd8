//! `strata publish` implementation.

use crate::commands::args::PublishArgs;
use crate::commands::RunContext;
use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use strata_core::config::{ConverterSettings, RegistrySettings};
use strata_core::{
    ArtifactRegistry, ArtifactStatus, CommandConverter, HttpAssetSource, HubRegistry,
    LocalRegistry, ModelSize, PublishConfig, PublishController, PublishReport, RegistryKind,
    StrataError,
};

pub fn build_config(args: &PublishArgs, ctx: &RunContext) -> Result<PublishConfig> {
    let model_size: ModelSize = args.pythia_type.parse()?;
    let mut settings = ctx.config.publish.clone();

    if let Some(detach) = args.last_step_in_training {
        settings.detach_final_step = detach;
    }
    if let Some(policy) = &args.final_step {
        settings.final_step = policy.parse()?;
    }
    if let Some(prefix) = &args.branch_prefix {
        settings.branch_prefix = prefix.clone();
    }
    if let Some(program) = &args.converter {
        settings.converter =
            ConverterSettings { program: program.clone(), args: args.converter_args.clone() };
    } else if !args.converter_args.is_empty() {
        settings.converter.args = args.converter_args.clone();
    }
    if let Some(kind) = &args.registry {
        settings.registry.kind = kind.parse::<RegistryKind>()?;
    }
    if let Some(dir) = &args.registry_dir {
        settings.registry.local_dir = Some(dir.clone());
    }
    if let Some(endpoint) = &args.hub_endpoint {
        settings.registry.endpoint = endpoint.clone();
    }
    if let Some(base_url) = &args.asset_base_url {
        settings.assets.base_url = base_url.clone();
    }

    Ok(PublishConfig {
        checkpoints_dir: args.checkpoints_dir.clone(),
        output_dir: args.output_dir.clone(),
        config_name: args.config_name.clone(),
        model_size,
        repository: args.repo_name.clone(),
        settings,
    })
}

fn build_registry(
    settings: &RegistrySettings,
    default_branch: &str,
    token: Option<String>,
) -> Result<Arc<dyn ArtifactRegistry>> {
    match settings.kind {
        RegistryKind::Hub => {
            if token.is_none() {
                tracing::warn!("no registry token provided; requests will be unauthenticated");
            }
            let hub = HubRegistry::new(settings.endpoint.clone(), token);
            Ok(Arc::new(hub.with_private(settings.private)))
        }
        RegistryKind::Local => {
            let dir = settings
                .local_dir
                .clone()
                .context(
                    "The local registry needs --registry-dir (or publish.registry.local_dir)",
                )?;
            Ok(Arc::new(LocalRegistry::new(dir, default_branch)))
        }
    }
}

pub async fn execute(args: PublishArgs, ctx: &RunContext) -> Result<()> {
    let config = build_config(&args, ctx)?;
    let token = args.token.clone().or_else(|| std::env::var("HF_TOKEN").ok());
    let registry =
        build_registry(&config.settings.registry, &config.settings.default_branch, token)?;
    let converter = Arc::new(CommandConverter::new(config.settings.converter.clone()));
    let repository = config.repository.clone();

    let assets = Arc::new(HttpAssetSource::default());
    let controller = PublishController::new(config, converter, registry, assets)
        .with_cancellation(ctx.cancel.clone());
    let report = match controller.run(ctx.progress().as_ref()).await {
        Ok(report) => report,
        Err(err) => {
            // The partial report still goes to stdout so callers can see which step failed.
            if let (true, StrataError::Publish { report, .. }) = (ctx.json, &err) {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            let context = format!("Publishing to {repository} failed");
            return Err(anyhow::Error::new(err).context(context));
        }
    };

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &PublishReport) {
    println!();
    println!("{}", "Processing completed.".bold().green());
    println!("  Repository: {}", report.repository.cyan());
    if let Some(step) = report.detached {
        println!("  Held aside: {}", step.to_string().cyan());
    }
    println!();

    if report.branches.is_empty() {
        println!("  {}", "No branches were uploaded in this run.".dimmed());
    } else {
        println!("{:<16} {:<10} {}", "Branch", "Step", "Files");
        println!("{}", "─".repeat(40));
        for branch in &report.branches {
            println!("{:<16} {:<10} {}", branch.branch.cyan(), branch.step, branch.files.len());
        }
    }

    let skipped: Vec<_> = report
        .artifacts
        .iter()
        .filter_map(|a| match &a.status {
            ArtifactStatus::Skipped { reason } => Some(format!("{} ({:?})", a.step, reason)),
            _ => None,
        })
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("  Skipped: {}", skipped.join(", ").dimmed());
    }
    println!();
}
