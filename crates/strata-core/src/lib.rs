//! Strata Core
//!
//! Sequencing primitives for checkpoint batch workflows:
//! - Ordering numbered checkpoint steps and detecting finished ones
//! - Running an evaluation harness across a step schedule (`EvaluationSweep`)
//! - Converting checkpoints and publishing them to registry branches (`PublishController`)
//! - Collaborator traits for the harness, converter, registry and asset source

pub mod artifacts;
pub mod assets;
pub mod config;
pub mod converter;
pub mod error;
pub mod harness;
pub mod layout;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod step;
pub mod sweep;

pub use artifacts::{
    ArtifactStatus, FileDigest, PublishReport, PublishedBranch, SkipReason, StepArtifact,
    SweepReport,
};
pub use assets::{AssetSource, HttpAssetSource, ModelSize, SharedAssetSet, StagedAssets};
pub use config::{
    FinalStepPolicy, PublishConfig, PublishSettings, RegistryKind, StrataConfig, SweepConfig,
    SweepSettings,
};
pub use converter::{CommandConverter, ConvertRequest, Converter};
pub use error::{StrataError, StrataResult};
pub use harness::{CommandHarness, EvalHarness, EvalRequest, HarnessOutcome};
pub use layout::OutputLayout;
pub use progress::{ProgressEvent, ProgressSink, RunKind, StdoutProgressSink, TracingProgressSink};
pub use publish::PublishController;
pub use registry::{ArtifactRegistry, HubRegistry, LocalRegistry, RegistryBranch, RepoHandle};
pub use step::{discover_step_dirs, extract_step, Step, StepDir, StepSequence};
pub use sweep::EvaluationSweep;
pub use tokio_util::sync::CancellationToken;
