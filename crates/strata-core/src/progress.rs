use crate::artifacts::SkipReason;
use crate::step::Step;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run: RunKind, total: usize },
    StepStarted { step: Step, label: String },
    StepSkipped { step: Step, label: String, reason: SkipReason },
    StepFinished { step: Step, label: String },
    Uploaded { step: Step, branch: String },
    Message { message: String },
    Finished { run: RunKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Sweep,
    Publish,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sweep => f.write_str("sweep"),
            Self::Publish => f.write_str("publish"),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run, total } => tracing::info!(%run, total, "run started"),
            ProgressEvent::StepStarted { step, label } => {
                tracing::info!(step = step.0, "processing {label}");
            }
            ProgressEvent::StepSkipped { step, label, reason } => {
                tracing::info!(step = step.0, ?reason, "skipping {label}");
            }
            ProgressEvent::StepFinished { step, label } => {
                tracing::info!(step = step.0, "finished {label}");
            }
            ProgressEvent::Uploaded { step, branch } => {
                tracing::info!(step = step.0, %branch, "uploaded");
            }
            ProgressEvent::Message { message } => tracing::info!("{message}"),
            ProgressEvent::Finished { run } => tracing::info!(%run, "run completed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run, total } => println!("[{run}] started ({total} steps)"),
            ProgressEvent::StepStarted { label, .. } => println!("Processing {label}..."),
            ProgressEvent::StepSkipped { label, reason, .. } => {
                println!("Skipping {label} ({reason:?})");
            }
            ProgressEvent::StepFinished { label, .. } => println!("Finished {label}"),
            ProgressEvent::Uploaded { branch, .. } => println!("Uploaded branch {branch}"),
            ProgressEvent::Message { message } => println!("{message}"),
            ProgressEvent::Finished { run } => println!("[{run}] completed"),
        }
    }
}
