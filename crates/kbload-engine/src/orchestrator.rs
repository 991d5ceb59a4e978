//! Load test orchestrator for a full knowledge-base run
//!
//! Lifecycle: pid check, start sampler, create, ramped user phase, row count,
//! delete, stop sampler, aggregate, write artifacts. The sampler brackets
//! everything between its start and stop, so its first and last samples always
//! enclose the scheduler's active window.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kbload_core::{HarnessError, HarnessResult, RunConfig, RunId};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::chart;
use crate::environment::EnvironmentInfo;
use crate::executor::{CallBounds, Task, TaskExecutor};
use crate::metrics::{aggregate, LatencyPolicy, MetricsSummary};
use crate::report::{
    report_file_stem, ReportFormat, ReportGenerator, ReportInputs, RunReport, RunStatus,
};
use crate::sampler::{ProcessProbe, ResourceSampler};
use crate::scheduler::{Scheduler, SchedulerReport, SchedulerSettings};
use crate::sink::{OutcomeSink, SampleSink};
use crate::target::KnowledgeBaseTarget;
use crate::workload::Workload;

pub const CHART_FILE: &str = "resource_usage.svg";
pub const ACTIVITY_FILE: &str = "activity.csv";

/// Files written for one run plus the in-memory report.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub report: RunReport,
    pub metrics: MetricsSummary,
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
    pub chart_path: PathBuf,
    pub activity_path: PathBuf,
    /// `None` when the user phase was skipped.
    pub scheduler: Option<SchedulerReport>,
}

/// Load test orchestrator
pub struct LoadTestOrchestrator {
    config: RunConfig,
    workload: Arc<Workload>,
    target: Arc<dyn KnowledgeBaseTarget>,
    probe: Arc<dyn ProcessProbe>,
    environment: EnvironmentInfo,
    run_id: RunId,
}

impl LoadTestOrchestrator {
    /// Fails with a configuration error before anything is scheduled.
    pub fn new(
        config: RunConfig,
        workload: Arc<Workload>,
        target: Arc<dyn KnowledgeBaseTarget>,
        probe: Arc<dyn ProcessProbe>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            workload,
            target,
            probe,
            environment: EnvironmentInfo::detect(),
            run_id: RunId::new(),
        })
    }

    /// Replace the detected host description.
    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = environment;
        self
    }

    /// Run the load test
    pub async fn run(&self) -> HarnessResult<RunArtifacts> {
        let config = &self.config;
        let pid = config.target.pid;
        if !self.probe.exists(pid) {
            return Err(HarnessError::config(format!(
                "target process {} is not running",
                pid
            )));
        }

        let out_dir = config.output.dir.clone();
        tokio::fs::create_dir_all(&out_dir).await?;
        let chart_path = out_dir.join(CHART_FILE);
        let activity_path = out_dir.join(ACTIVITY_FILE);

        info!(
            run_id = %self.run_id,
            target = %config.base_url(),
            knowledge_base = %config.knowledge_base.name,
            users = config.load.concurrency,
            duration_secs = config.load.run_duration_secs,
            "Starting load test"
        );

        let started_at = Utc::now();
        let outcomes = OutcomeSink::shared();
        let samples = SampleSink::shared();

        let mut sampler = ResourceSampler::new(Arc::clone(&self.probe), samples);
        sampler.start(pid, config.sample_interval(), Some(activity_path.clone()))?;

        let executor = TaskExecutor::new(Arc::clone(&self.target), CallBounds::from_config(config));
        let (status, scheduler_report, row_count) = self.run_lifecycle(&executor, &outcomes).await;

        let series = sampler.stop().await?;
        let finished_at = Utc::now();

        let window = scheduler_report
            .as_ref()
            .map_or(Duration::ZERO, |r| r.active_window);
        let metrics = aggregate(&outcomes.snapshot(), window, LatencyPolicy::from_config(config));

        tokio::fs::write(&chart_path, chart::render_svg(&series)).await?;

        let generator = ReportGenerator::new();
        let report = generator.generate(ReportInputs {
            run_id: self.run_id,
            config,
            metrics: &metrics,
            resources: &series,
            environment: &self.environment,
            status,
            started_at,
            finished_at,
            row_count,
            records_loaded: self.workload.records().len(),
            queries_loaded: self.workload.queries().len(),
            data_volume_mb: self.workload.data_volume_mb(),
            chart_file: Some(CHART_FILE.to_string()),
            generated_at: Utc::now(),
        });

        let stem = report_file_stem(started_at);
        let markdown_path =
            out_dir.join(format!("{}.{}", stem, ReportFormat::Markdown.extension()));
        let json_path = out_dir.join(format!("{}.{}", stem, ReportFormat::Json.extension()));
        generator.write_report(&report, &markdown_path, ReportFormat::Markdown)?;
        generator.write_report(&report, &json_path, ReportFormat::Json)?;

        info!(
            status = %report.status.label(),
            requests = report.summary.total_requests,
            failures = report.summary.total_failures,
            success_rate = format!("{:.2}", report.summary.success_rate),
            avg_ms = format!("{:.2}", report.summary.avg_response_ms),
            rps = format!("{:.2}", report.summary.overall_rps),
            report = %markdown_path.display(),
            "Load test complete"
        );
        if !report.resources.complete {
            warn!(gaps = report.resources.gaps, "Resource data is incomplete");
        }

        Ok(RunArtifacts {
            report,
            metrics,
            markdown_path,
            json_path,
            chart_path,
            activity_path,
            scheduler: scheduler_report,
        })
    }

    /// create -> users -> row count -> delete. Failures here are outcomes,
    /// never errors; a failed create aborts the rest.
    async fn run_lifecycle(
        &self,
        executor: &TaskExecutor,
        outcomes: &Arc<OutcomeSink>,
    ) -> (RunStatus, Option<SchedulerReport>, Option<u64>) {
        let created = executor.execute(Task::Create).await;
        let create_ok = created.success;
        let create_error = created.error.clone();
        info!(
            success = create_ok,
            latency_ms = format!("{:.2}", created.latency_ms()),
            "Knowledge base create finished"
        );
        outcomes.record(created);

        if !create_ok {
            let reason = format!(
                "knowledge base creation failed: {}",
                create_error.as_deref().unwrap_or("unknown error")
            );
            error!("{}, skipping user phase", reason);
            return (RunStatus::Aborted { reason }, None, None);
        }

        let scheduler = Scheduler::new(SchedulerSettings::from_config(&self.config));
        let report = scheduler
            .run(Arc::clone(&self.workload), executor.clone(), Arc::clone(outcomes))
            .await;
        info!(
            users = report.users_spawned,
            aborted = report.users_aborted,
            window_secs = format!("{:.2}", report.active_window.as_secs_f64()),
            "User phase finished"
        );

        let bound = self.config.request_timeout();
        let row_count = match timeout(bound, executor.target().row_count()).await {
            Ok(Some(count)) => Some(count),
            Ok(None) => {
                warn!("Row count could not be read");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = bound.as_secs(),
                    "Row count timed out"
                );
                None
            }
        };

        let deleted = executor.execute(Task::Delete).await;
        if !deleted.success {
            warn!(
                error = deleted.error.as_deref().unwrap_or_default(),
                "Knowledge base delete failed"
            );
        }
        outcomes.record(deleted);

        (RunStatus::Completed, Some(report), row_count)
    }
}
