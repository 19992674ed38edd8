//! `strata sweep` implementation.

use crate::commands::args::SweepArgs;
use crate::commands::RunContext;
use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use strata_core::{
    ArtifactStatus, CommandHarness, EvaluationSweep, Step, StepSequence, StrataError, SweepConfig,
    SweepReport,
};

pub fn build_config(args: SweepArgs, ctx: &RunContext) -> SweepConfig {
    let mut config = SweepConfig::new(args.model_name, args.output_dir);
    config.settings = ctx.config.sweep.clone();

    let settings = &mut config.settings;
    if !args.steps.is_empty() {
        settings.steps = StepSequence::new(args.steps.into_iter().map(Step));
    }
    if !args.tasks.is_empty() {
        settings.tasks = args.tasks;
    }
    if let Some(program) = args.harness {
        settings.harness.program = program;
    }
    if let Some(device) = args.device {
        settings.harness.device = device;
    }
    if let Some(batch_size) = args.batch_size {
        settings.harness.batch_size = batch_size;
    }
    if let Some(dtype) = args.dtype {
        settings.harness.dtype = dtype;
    }
    if args.skip_existing {
        settings.skip_existing = true;
    }
    config
}

pub async fn execute(args: SweepArgs, ctx: &RunContext) -> Result<()> {
    let config = build_config(args, ctx);
    let harness = Arc::new(CommandHarness::new(config.settings.harness.clone()));
    let output_dir = config.output_dir.clone();

    let sweep = EvaluationSweep::new(config, harness).with_cancellation(ctx.cancel.clone());
    let report = match sweep.run(ctx.progress().as_ref()).await {
        Ok(report) => report,
        Err(err) => {
            if let (true, StrataError::Sweep { report, .. }) = (ctx.json, &err) {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            let context = format!("Evaluation sweep into {} failed", output_dir.display());
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

fn print_summary(report: &SweepReport) {
    let skipped = report
        .artifacts
        .iter()
        .filter(|a| matches!(a.status, ArtifactStatus::Skipped { .. }))
        .count();

    println!();
    println!("{}", "All evaluations completed.".bold().green());
    println!("  Evaluated: {}", report.evaluated().count().to_string().cyan());
    if skipped > 0 {
        println!("  Skipped:   {}", skipped.to_string().dimmed());
    }
    println!();
}
