//! Load generation, resource sampling and reporting for knowledge-base targets.
//!
//! The pieces compose as follows:
//! - [`workload::Workload`] holds the shared, read-only task catalog
//! - [`executor::TaskExecutor`] runs one [`executor::Task`] against a
//!   [`target::KnowledgeBaseTarget`] and yields a `TaskOutcome`
//! - [`scheduler::Scheduler`] ramps virtual users up and stops them
//! - [`sampler::ResourceSampler`] records CPU/memory of the target process
//! - [`metrics::aggregate`] reduces outcomes into per-operation statistics
//! - [`report::ReportGenerator`] turns everything into a [`report::RunReport`]
//! - [`orchestrator::LoadTestOrchestrator`] drives the full lifecycle

pub mod chart;
pub mod environment;
pub mod executor;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod sink;
pub mod statements;
pub mod target;
pub mod workload;

pub use environment::EnvironmentInfo;
pub use executor::{CallBounds, Task, TaskExecutor};
pub use http::HttpTarget;
pub use metrics::{aggregate, AggregatedMetric, LatencyPolicy, MetricsSummary};
pub use orchestrator::{LoadTestOrchestrator, RunArtifacts};
pub use report::{ReportFormat, ReportGenerator, ReportInputs, RunReport, RunStatus};
pub use sampler::{
    ProcessProbe, ProcessReading, ResourceSampler, ResourceSeries, SamplerState, SysinfoProbe,
};
pub use scheduler::{Scheduler, SchedulerReport, SchedulerSettings};
pub use sink::{AppendLog, OutcomeSink, SampleSink};
pub use target::{CallError, CallResponse, CallResult, KnowledgeBaseTarget};
pub use workload::{IngestRecord, SearchQuery, Workload, WorkloadItem};
