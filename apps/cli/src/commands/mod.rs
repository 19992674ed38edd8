//! Command implementations for the Strata CLI.

pub mod args;
pub mod publish;
pub mod sweep;

pub use args::{PublishArgs, SweepArgs};

use strata_core::{
    CancellationToken, ProgressSink, StdoutProgressSink, StrataConfig, TracingProgressSink,
};

/// State shared by every command for one invocation.
pub struct RunContext {
    pub config: StrataConfig,
    /// Print the run report as JSON on stdout.
    pub json: bool,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Console progress lines, or log events only when stdout carries JSON.
    pub fn progress(&self) -> Box<dyn ProgressSink> {
        if self.json {
            Box::new(TracingProgressSink)
        } else {
            Box::new(StdoutProgressSink)
        }
    }
}
