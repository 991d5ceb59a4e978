//! Report generation for load test results
//!
//! [`ReportGenerator::generate`] is a pure function of its inputs. Rendering
//! the same [`RunReport`] twice yields identical text; the only field that
//! varies between otherwise equal runs is the explicit `generated_at`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use kbload_core::{HarnessError, HarnessResult, OperationKind, RunConfig, RunId};
use serde::Serialize;

use crate::environment::EnvironmentInfo;
use crate::metrics::{AggregatedMetric, MetricsSummary};
use crate::sampler::ResourceSeries;

/// Ingestion average above this is critical.
pub const INGEST_CRITICAL_MS: f64 = 2000.0;
/// Ingestion average above this is a warning.
pub const INGEST_WARNING_MS: f64 = 1000.0;
pub const SEARCH_SLOW_MS: f64 = 1000.0;
/// Overall average above this suggests horizontal scaling.
pub const HIGH_LATENCY_MS: f64 = 1000.0;
pub const FAILURE_CRITICAL_PCT: f64 = 5.0;
pub const FAILURE_WARNING_PCT: f64 = 1.0;
/// p95 above `avg * VARIANCE_FACTOR` flags unstable latency.
pub const VARIANCE_FACTOR: f64 = 2.0;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
        }
    }
}

/// Fixed classification bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Band {
    /// `<100ms` excellent, `<500ms` good, `<1000ms` fair, else poor.
    pub fn for_latency(ms: f64) -> Self {
        if ms < 100.0 {
            Band::Excellent
        } else if ms < 500.0 {
            Band::Good
        } else if ms < 1000.0 {
            Band::Fair
        } else {
            Band::Poor
        }
    }

    /// `>99%` excellent, `>95%` good, `>90%` fair, else poor.
    pub fn for_success_rate(pct: f64) -> Self {
        if pct > 99.0 {
            Band::Excellent
        } else if pct > 95.0 {
            Band::Good
        } else if pct > 90.0 {
            Band::Fair
        } else {
            Band::Poor
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Band::Excellent => "Excellent",
            Band::Good => "Good",
            Band::Fair => "Fair",
            Band::Poor => "Poor",
        }
    }
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The lifecycle could not proceed, e.g. the knowledge base was not created.
    Aborted { reason: String },
    /// Nothing to aggregate.
    InsufficientData,
}

impl RunStatus {
    pub fn label(&self) -> String {
        match self {
            RunStatus::Completed => "Completed".to_string(),
            RunStatus::Aborted { reason } => format!("Run could not complete: {}", reason),
            RunStatus::InsufficientData => "Insufficient data".to_string(),
        }
    }
}

/// Everything the generator reads.
#[derive(Debug, Clone)]
pub struct ReportInputs<'a> {
    pub run_id: RunId,
    pub config: &'a RunConfig,
    pub metrics: &'a MetricsSummary,
    pub resources: &'a ResourceSeries,
    pub environment: &'a EnvironmentInfo,
    /// Downgraded to `InsufficientData` when no workload outcome exists.
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub row_count: Option<u64>,
    pub records_loaded: usize,
    pub queries_loaded: usize,
    pub data_volume_mb: f64,
    pub chart_file: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationSummary {
    pub target: String,
    pub database: String,
    pub knowledge_base: String,
    pub concurrency: usize,
    pub spawn_rate: f64,
    pub run_duration_secs: i64,
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,
    pub insert_weight: u32,
    pub search_weight: u32,
    pub seed: Option<u64>,
    pub data_size: usize,
    pub records_loaded: usize,
    pub queries_loaded: usize,
    pub data_volume_mb: f64,
    pub active_window_secs: f64,
    pub count_timeout_latency: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleTiming {
    pub seconds: f64,
    pub succeeded: bool,
}

impl LifecycleTiming {
    fn from_metric(metric: Option<&AggregatedMetric>) -> Option<Self> {
        metric.map(|m| Self {
            seconds: m.mean_ms() / 1000.0,
            succeeded: m.failed == 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub total: usize,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub per_second: f64,
}

impl KindSummary {
    fn from_metric(metric: Option<&AggregatedMetric>) -> Option<Self> {
        metric.map(|m| Self {
            total: m.total,
            success_rate: m.success_rate(),
            avg_ms: m.mean_ms(),
            per_second: m.throughput_rps,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutiveSummary {
    pub total_requests: usize,
    pub total_failures: usize,
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub overall_rps: f64,
    pub response_band: Band,
    pub success_band: Band,
    pub create: Option<LifecycleTiming>,
    pub delete: Option<LifecycleTiming>,
    pub row_count: Option<u64>,
    pub data_volume_mb: f64,
    pub ingestion: Option<KindSummary>,
    pub search: Option<KindSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub pid: u32,
    pub samples: usize,
    pub gaps: usize,
    pub complete: bool,
    pub max_memory_mb: f64,
    pub avg_memory_mb: f64,
    pub max_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub first_sample: Option<DateTime<Utc>>,
    pub last_sample: Option<DateTime<Utc>>,
    pub chart_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendations {
    pub ingestion: Vec<String>,
    pub search: Vec<String>,
    pub capacity: Vec<String>,
    pub scaling: Vec<String>,
}

/// The final, write-once artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub configuration: ConfigurationSummary,
    pub environment: EnvironmentInfo,
    pub summary: ExecutiveSummary,
    pub operations: BTreeMap<OperationKind, AggregatedMetric>,
    pub resources: ResourceSummary,
    pub recommendations: Recommendations,
    pub limitations: Vec<String>,
    pub conclusion: String,
}

/// File stem shared by the Markdown and JSON renderings.
pub fn report_file_stem(started_at: DateTime<Utc>) -> String {
    format!("stress_test_report_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// Builds and writes [`RunReport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, inputs: ReportInputs<'_>) -> RunReport {
        let metrics = inputs.metrics;
        let config = inputs.config;
        let overall = &metrics.overall;
        let ingest = metrics.get(OperationKind::Insert);
        let search = metrics.get(OperationKind::Search);

        let status = match inputs.status {
            RunStatus::Completed if !metrics.has_workload_data() => RunStatus::InsufficientData,
            other => other,
        };

        let configuration = ConfigurationSummary {
            target: config.base_url(),
            database: config.target.database.clone(),
            knowledge_base: config.knowledge_base.name.clone(),
            concurrency: config.load.concurrency,
            spawn_rate: config.load.spawn_rate,
            run_duration_secs: config.load.run_duration_secs,
            think_time_min_ms: config.load.think_time_min_ms,
            think_time_max_ms: config.load.think_time_max_ms,
            insert_weight: config.load.insert_weight,
            search_weight: config.load.search_weight,
            seed: config.load.seed,
            data_size: config.workload.data_size,
            records_loaded: inputs.records_loaded,
            queries_loaded: inputs.queries_loaded,
            data_volume_mb: inputs.data_volume_mb,
            active_window_secs: metrics.window.as_secs_f64(),
            count_timeout_latency: metrics.policy.count_timeouts,
        };

        let summary = ExecutiveSummary {
            total_requests: overall.total,
            total_failures: overall.failed,
            success_rate: overall.success_rate(),
            avg_response_ms: overall.mean_ms(),
            overall_rps: overall.throughput_rps,
            response_band: Band::for_latency(overall.mean_ms()),
            success_band: Band::for_success_rate(overall.success_rate()),
            create: LifecycleTiming::from_metric(metrics.get(OperationKind::Create)),
            delete: LifecycleTiming::from_metric(metrics.get(OperationKind::Delete)),
            row_count: inputs.row_count,
            data_volume_mb: inputs.data_volume_mb,
            ingestion: KindSummary::from_metric(ingest),
            search: KindSummary::from_metric(search),
        };

        let series = inputs.resources;
        let resources = ResourceSummary {
            pid: series.pid,
            samples: series.samples.len(),
            gaps: series.gaps,
            complete: series.is_complete(),
            max_memory_mb: series.max_memory_mb(),
            avg_memory_mb: series.avg_memory_mb(),
            max_cpu_percent: series.max_cpu_percent(),
            avg_cpu_percent: series.avg_cpu_percent(),
            first_sample: series.first_timestamp(),
            last_sample: series.last_timestamp(),
            chart_file: inputs.chart_file,
        };

        let recommendations = Recommendations {
            ingestion: ingestion_recommendations(ingest),
            search: search_recommendations(search),
            capacity: capacity_analysis(ingest, search),
            scaling: scaling_recommendations(overall),
        };

        let limitations = limitations(config, &resources, metrics);
        let conclusion = conclusion(&status, overall);

        RunReport {
            run_id: inputs.run_id,
            generated_at: inputs.generated_at,
            status,
            started_at: inputs.started_at,
            finished_at: inputs.finished_at,
            configuration,
            environment: inputs.environment.clone(),
            summary,
            operations: metrics.per_kind.clone(),
            resources,
            recommendations,
            limitations,
            conclusion,
        }
    }

    pub fn render(&self, report: &RunReport, format: ReportFormat) -> HarnessResult<String> {
        match format {
            ReportFormat::Markdown => Ok(render_markdown(report)),
            ReportFormat::Json => serde_json::to_string_pretty(report)
                .map_err(|e| HarnessError::Serialization(e.to_string())),
        }
    }

    /// Write report to file
    pub fn write_report(
        &self,
        report: &RunReport,
        path: impl AsRef<Path>,
        format: ReportFormat,
    ) -> HarnessResult<()> {
        let content = self.render(report, format)?;
        fs::write(path, content)?;
        Ok(())
    }
}

pub fn ingestion_recommendations(metric: Option<&AggregatedMetric>) -> Vec<String> {
    let Some(metric) = metric else {
        return vec!["No ingestion data available for analysis".to_string()];
    };

    let mut out = Vec::new();
    let avg = metric.mean_ms();
    if avg > INGEST_CRITICAL_MS {
        out.push(
            "**Critical**: average ingestion time is above 2s. Batch the input records".to_string(),
        );
        out.push("Move ingestion to asynchronous processing".to_string());
    } else if avg > INGEST_WARNING_MS {
        out.push("**Warning**: ingestion times are elevated. Consider batch insertion".to_string());
        out.push("Review the vector index configuration".to_string());
    } else {
        out.push("Ingestion response times are acceptable for this load".to_string());
    }

    if metric.p95_ms() > avg * VARIANCE_FACTOR {
        out.push(
            "High variance in ingestion times (p95 is more than twice the average). \
             Investigate bottlenecks"
                .to_string(),
        );
    }

    let failure_rate = metric.failure_rate();
    if failure_rate > FAILURE_CRITICAL_PCT {
        out.push(format!(
            "**Critical**: high ingestion failure rate ({:.1}%). \
             Add error handling on the ingest path",
            failure_rate
        ));
    } else if failure_rate > FAILURE_WARNING_PCT {
        out.push(format!(
            "**Warning**: some ingestion failures ({:.1}%). Monitor the error patterns",
            failure_rate
        ));
    }
    out
}

pub fn search_recommendations(metric: Option<&AggregatedMetric>) -> Vec<String> {
    let Some(metric) = metric else {
        return vec!["No search data available for analysis".to_string()];
    };

    let mut out = Vec::new();
    if metric.mean_ms() > SEARCH_SLOW_MS {
        out.push("**Performance**: slow search detected".to_string());
        out.push("Index frequently filtered metadata columns".to_string());
        out.push("Cache results for repeated queries".to_string());
    }
    if metric.failure_rate() > FAILURE_CRITICAL_PCT {
        out.push("**Reliability**: high search failure rate".to_string());
        out.push("Review the search and reranking configuration".to_string());
    }
    if out.is_empty() {
        out.push("Search performance is acceptable across the query set".to_string());
    }
    out
}

pub fn capacity_analysis(
    ingest: Option<&AggregatedMetric>,
    search: Option<&AggregatedMetric>,
) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(m) = ingest {
        out.push(format!("**Ingestion capacity**: ~{:.0} records/second", m.throughput_rps));
        out.push(format!(
            "**Peak ingestion rate**: ~{:.0} records/minute",
            m.throughput_rps * 60.0
        ));
    }
    if let Some(m) = search {
        out.push(format!("**Search capacity**: ~{:.0} queries/second", m.throughput_rps));
        out.push(format!("**Peak search rate**: ~{:.0} queries/minute", m.throughput_rps * 60.0));
    }
    if out.is_empty() {
        out.push("Insufficient data for capacity analysis".to_string());
    }
    out
}

pub fn scaling_recommendations(overall: &AggregatedMetric) -> Vec<String> {
    let mut out = match Band::for_success_rate(overall.success_rate()) {
        Band::Excellent => vec![
            "**Excellent**: the system handled the load well and is ready for scaling".to_string(),
            "Repeat the test with more concurrent users".to_string(),
        ],
        Band::Good => vec![
            "**Good**: performance is acceptable for production".to_string(),
            "Monitor behaviour under sustained high load".to_string(),
        ],
        Band::Fair => vec![
            "**Warning**: some degradation observed".to_string(),
            "Apply the optimizations above before scaling".to_string(),
        ],
        Band::Poor => vec![
            "**Critical**: significant performance issues detected".to_string(),
            "Resolve the bottlenecks before production deployment".to_string(),
        ],
    };
    if overall.mean_ms() > HIGH_LATENCY_MS {
        out.push("Consider horizontal scaling because of high response times".to_string());
    }
    out
}

pub fn conclusion(status: &RunStatus, overall: &AggregatedMetric) -> String {
    match status {
        RunStatus::Aborted { reason } => {
            return format!(
                "The run could not complete ({}). The figures above cover only what executed \
                 before the abort and must not be read as a clean result.",
                reason
            )
        }
        RunStatus::InsufficientData => {
            return "No workload operations were recorded, \
                    so no performance conclusion can be drawn."
                .to_string();
        }
        RunStatus::Completed => {}
    }

    let success = overall.success_rate();
    let avg = overall.mean_ms();
    if success > 95.0 && avg < 1000.0 {
        format!(
            "The run completed with excellent results: {:.2}% success rate and {:.2}ms average response time across {} requests. \
             The tested data volume and concurrency are sustainable.",
            success,
            avg,
            group_thousands(overall.total)
        )
    } else if success > 90.0 {
        format!(
            "The run showed acceptable performance with room for improvement: {:.2}% success rate and {:.2}ms average response time. \
             Apply the recommended optimizations before raising the load.",
            success, avg
        )
    } else {
        format!(
            "The run exposed significant performance problems: only {:.2}% success rate with {:.2}ms average response time. \
             Address the critical findings before production use.",
            success, avg
        )
    }
}

fn limitations(
    config: &RunConfig,
    resources: &ResourceSummary,
    metrics: &MetricsSummary,
) -> Vec<String> {
    let mut out = vec![
        format!(
            "Executed under controlled conditions with {} concurrent users",
            config.load.concurrency
        ),
        "Results depend on data shape, hardware and the embedding provider".to_string(),
        "Network latency is whatever the path to the target adds; it is not modelled".to_string(),
    ];
    if metrics.policy.count_timeouts {
        out.push("Timed-out calls contribute their waiting time to latency statistics".to_string());
    } else {
        out.push(
            "Timed-out calls are excluded from latency statistics but counted as failures"
                .to_string(),
        );
    }
    if !resources.complete {
        out.push(format!(
            "Resource data is incomplete: {} sampling gaps, {} samples",
            resources.gaps, resources.samples
        ));
    }
    out
}

/// `1234567` -> `1,234,567`
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn bullets(lines: &[String]) -> String {
    lines.iter().map(|l| format!("- {}\n", l)).collect()
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn lifecycle_line(label: &str, timing: Option<&LifecycleTiming>) -> String {
    match timing {
        Some(t) if t.succeeded => format!("- **{}**: {:.2}s\n", label, t.seconds),
        Some(t) => format!("- **{}**: failed after {:.2}s\n", label, t.seconds),
        None => format!("- **{}**: not executed\n", label),
    }
}

fn kind_summary_block(title: &str, unit: &str, summary: Option<&KindSummary>) -> String {
    let mut out = format!("### {}\n\n", title);
    match summary {
        None => out.push_str("- **Status**: no data recorded\n"),
        Some(s) => {
            out.push_str(&format!("- **Total {}**: {}\n", unit, group_thousands(s.total)));
            out.push_str(&format!("- **Success Rate**: {:.2}%\n", s.success_rate));
            out.push_str(&format!("- **Average Response Time**: {:.2}ms\n", s.avg_ms));
            out.push_str(&format!("- **Throughput**: {:.2} {}/second\n", s.per_second, unit));
        }
    }
    out
}

fn metric_details(kind: OperationKind, metric: &AggregatedMetric) -> String {
    let mut out = format!("### {}\n\n", kind);
    out.push_str(&format!("- **Total Requests**: {}\n", group_thousands(metric.total)));
    out.push_str(&format!("- **Successful**: {}\n", group_thousands(metric.successful)));
    out.push_str(&format!("- **Failed**: {}\n", group_thousands(metric.failed)));
    out.push_str(&format!("- **Success Rate**: {:.2}%\n", metric.success_rate()));
    out.push_str(&format!("- **Requests per Second**: {:.2}\n", metric.throughput_rps));
    out.push_str(&format!(
        "- **Response Data**: {:.2} KB\n",
        metric.response_bytes as f64 / 1024.0
    ));
    match &metric.latency {
        Some(l) => {
            out.push_str(&format!("- **Latency Samples**: {}\n", l.samples));
            out.push_str(&format!("- **Standard Deviation**: {:.2}ms\n", l.stdev_ms));
        }
        None => out.push_str("- **Latency**: no samples\n"),
    }
    out
}

fn latency_table(metric: Option<&AggregatedMetric>) -> String {
    let Some(latency) = metric.and_then(|m| m.latency.as_ref()) else {
        return "No latency samples available.\n".to_string();
    };
    format!(
        "| Metric | Value |\n\
         |--------|-------|\n\
         | Average | {:.2}ms |\n\
         | Median | {:.2}ms |\n\
         | 95th Percentile | {:.2}ms |\n\
         | 99th Percentile | {:.2}ms |\n\
         | Min | {:.2}ms |\n\
         | Max | {:.2}ms |\n\
         | Band | {} |\n",
        latency.mean_ms,
        latency.median_ms,
        latency.p95_ms,
        latency.p99_ms,
        latency.min_ms,
        latency.max_ms,
        Band::for_latency(latency.mean_ms).label()
    )
}

/// Markdown document for `report`.
pub fn render_markdown(report: &RunReport) -> String {
    let cfg = &report.configuration;
    let env = &report.environment;
    let summary = &report.summary;
    let res = &report.resources;
    let mut md = String::new();

    md.push_str("# Knowledge Base Stress Test Report\n\n");
    md.push_str(&format!("**Status**: {}\n\n", report.status.label()));
    md.push_str(&format!("**Run ID**: {}\n\n", report.run_id));

    md.push_str("## Test Configuration\n\n");
    md.push_str(&format!(
        "- **Test Date**: {}\n",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!("- **Test Duration**: {:.2} seconds\n", cfg.active_window_secs));
    md.push_str(&format!("- **Target Host**: {}\n", cfg.target));
    md.push_str(&format!("- **Database**: {}\n", cfg.database));
    md.push_str(&format!("- **Knowledge Base**: {}\n", cfg.knowledge_base));
    md.push_str(&format!(
        "- **Data Size**: {} records loaded (limit {})\n",
        group_thousands(cfg.records_loaded),
        group_thousands(cfg.data_size)
    ));
    md.push_str(&format!("- **Search Queries**: {}\n", group_thousands(cfg.queries_loaded)));
    md.push_str(&format!("- **Concurrent Users**: {}\n", cfg.concurrency));
    md.push_str(&format!("- **Spawn Rate**: {} users/second\n", cfg.spawn_rate));
    md.push_str(&format!(
        "- **Think Time**: between {}ms and {}ms\n",
        cfg.think_time_min_ms, cfg.think_time_max_ms
    ));
    md.push_str(&format!(
        "- **Task Weights**: insert {} / search {}\n",
        cfg.insert_weight, cfg.search_weight
    ));
    md.push_str(&format!("- **Seed**: {}\n", or_na(cfg.seed)));
    md.push_str(&format!("- **Total Data Volume**: {:.2} MB\n\n", cfg.data_volume_mb));

    md.push_str("## Test Environment\n\n");
    md.push_str(&format!(
        "- **Operating System**: {} {}\n",
        env.os,
        env.os_version.as_deref().unwrap_or("")
    ));
    md.push_str(&format!("- **Architecture**: {}\n", env.arch));
    md.push_str(&format!(
        "- **CPU**: {} logical cores ({} physical)\n",
        env.cpu_count,
        or_na(env.physical_cores)
    ));
    md.push_str(&format!("- **Memory**: {:.1} GB\n\n", env.total_memory_gb));

    md.push_str("## Executive Summary\n\n### Overall Performance\n\n");
    md.push_str(&format!("- **Total Requests**: {}\n", group_thousands(summary.total_requests)));
    md.push_str(&format!("- **Total Failures**: {}\n", group_thousands(summary.total_failures)));
    md.push_str(&format!(
        "- **Overall Success Rate**: {:.2}% ({})\n",
        summary.success_rate,
        summary.success_band.label()
    ));
    md.push_str(&format!(
        "- **Average Response Time**: {:.2}ms ({})\n",
        summary.avg_response_ms,
        summary.response_band.label()
    ));
    md.push_str(&format!("- **Overall RPS**: {:.2} requests/second\n", summary.overall_rps));
    md.push_str(&lifecycle_line("Knowledge Base Creation Time", summary.create.as_ref()));
    md.push_str(&lifecycle_line("Knowledge Base Deletion Time", summary.delete.as_ref()));
    md.push_str(&format!(
        "- **Knowledge Base Row Count**: {}\n",
        summary.row_count.map_or_else(|| "n/a".to_string(), |n| group_thousands(n as usize))
    ));
    md.push_str(&format!("- **Total Data Volume**: {:.2} MB\n\n", summary.data_volume_mb));
    md.push_str(&kind_summary_block(
        "Ingestion Performance",
        "records",
        summary.ingestion.as_ref(),
    ));
    md.push('\n');
    md.push_str(&kind_summary_block("Search Performance", "queries", summary.search.as_ref()));
    md.push('\n');

    md.push_str("## Detailed Performance Metrics\n\n");
    if report.operations.is_empty() {
        md.push_str("No operations were recorded.\n\n");
    }
    for (kind, metric) in &report.operations {
        md.push_str(&metric_details(*kind, metric));
        md.push('\n');
    }

    md.push_str("## Response Time Distribution\n\n");
    for kind in OperationKind::ALL {
        if let Some(metric) = report.operations.get(&kind) {
            md.push_str(&format!("### {}\n\n", kind));
            md.push_str(&latency_table(Some(metric)));
            md.push('\n');
        }
    }

    md.push_str("## Errors\n\n");
    let failures: Vec<_> = report
        .operations
        .iter()
        .flat_map(|(kind, m)| m.errors.iter().map(move |e| (kind, e)))
        .collect();
    if failures.is_empty() {
        md.push_str("No failures recorded (0 failed operations).\n\n");
    } else {
        md.push_str("| Operation | Status | Count | Message |\n");
        md.push_str("|-----------|--------|-------|---------|\n");
        for (kind, bucket) in failures {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                kind,
                bucket.status,
                bucket.count,
                escape_cell(&bucket.message)
            ));
        }
        md.push('\n');
    }

    md.push_str("## Resource Usage\n\n");
    md.push_str(&format!("- **Process ID**: {}\n", res.pid));
    md.push_str(&format!("- **Max Memory Usage**: {:.2} MB\n", res.max_memory_mb));
    md.push_str(&format!("- **Average Memory Usage**: {:.2} MB\n", res.avg_memory_mb));
    md.push_str(&format!("- **Max CPU Usage**: {:.2}%\n", res.max_cpu_percent));
    md.push_str(&format!("- **Average CPU Usage**: {:.2}%\n", res.avg_cpu_percent));
    md.push_str(&format!("- **Samples**: {} ({} gaps)\n", res.samples, res.gaps));
    if !res.complete {
        md.push_str(
            "- **Resource data incomplete**: \
             the target process could not be sampled for part of the run\n",
        );
    }
    if let Some(chart) = &res.chart_file {
        md.push_str(&format!("\n![Resource usage]({})\n", chart));
    }
    md.push('\n');

    md.push_str("## Performance Recommendations\n\n### Ingestion Optimization\n\n");
    md.push_str(&bullets(&report.recommendations.ingestion));
    md.push_str("\n### Search Optimization\n\n");
    md.push_str(&bullets(&report.recommendations.search));
    md.push_str("\n## System Resource Implications\n\n### Capacity Analysis\n\n");
    md.push_str(&bullets(&report.recommendations.capacity));
    md.push_str("\n### Scaling Recommendations\n\n");
    md.push_str(&bullets(&report.recommendations.scaling));

    md.push_str("\n## Test Validity and Limitations\n\n");
    md.push_str(&bullets(&report.limitations));
    md.push_str("\n## Conclusion\n\n");
    md.push_str(&report.conclusion);
    md.push_str("\n\n---\n\n");
    md.push_str(&format!(
        "*Report generated on {}*\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md
}
