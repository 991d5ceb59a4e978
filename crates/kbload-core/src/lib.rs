//! Core domain types for the kbload knowledge-base load harness.

pub mod config;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod sample;

pub use config::{
    ExecutorConfig, KnowledgeBaseConfig, LoadConfig, OutputConfig, RunConfig, SamplerConfig,
    TargetConfig, WorkloadConfig,
};
pub use error::{HarnessError, HarnessResult};
pub use ids::RunId;
pub use outcome::{OperationKind, OutcomeStatus, TaskOutcome};
pub use sample::ResourceSample;
