use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use kbload_core::RunConfig;
use kbload_engine::{HttpTarget, LoadTestOrchestrator, RunStatus, SysinfoProbe, Workload};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kbload")]
#[command(about = "Load and resource harness for knowledge-base query APIs", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (YAML, TOML or JSON)
    #[arg(long, short, env = "KBLOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Target host, scheme optional
    #[arg(long)]
    host: Option<String>,

    /// Target port
    #[arg(long)]
    port: Option<u16>,

    /// Process id of the target service
    #[arg(long)]
    pid: Option<u32>,

    /// Number of concurrent virtual users
    #[arg(long)]
    users: Option<usize>,

    /// Users started per second during ramp-up
    #[arg(long)]
    spawn_rate: Option<f64>,

    /// Run duration in seconds
    #[arg(long)]
    duration: Option<i64>,

    /// Maximum records taken from the dataset
    #[arg(long)]
    data_size: Option<usize>,

    /// Dataset JSON file
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Query JSON file
    #[arg(long)]
    queries: Option<PathBuf>,

    /// Directory for report, chart and time series
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seed for reproducible task mixes
    #[arg(long)]
    seed: Option<u64>,

    /// Leave timed-out calls out of latency statistics
    #[arg(long)]
    exclude_timeout_latency: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

impl Cli {
    /// Flags win over file and environment values.
    fn apply(&self, config: &mut RunConfig) {
        if let Some(host) = &self.host {
            config.target.host = host.clone();
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(pid) = self.pid {
            config.target.pid = pid;
        }
        if let Some(users) = self.users {
            config.load.concurrency = users;
        }
        if let Some(rate) = self.spawn_rate {
            config.load.spawn_rate = rate;
        }
        if let Some(duration) = self.duration {
            config.load.run_duration_secs = duration;
        }
        if let Some(size) = self.data_size {
            config.workload.data_size = size;
        }
        if let Some(path) = &self.dataset {
            config.workload.dataset_path = path.clone();
        }
        if let Some(path) = &self.queries {
            config.workload.queries_path = path.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if self.seed.is_some() {
            config.load.seed = self.seed;
        }
        if self.exclude_timeout_latency {
            config.executor.count_timeout_latency = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Cli::parse();
    init_logging(args.log_format);

    let mut config = RunConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    config.validate_paths()?;

    info!("Target: {}", config.base_url());
    info!("Target pid: {}", config.target.pid);
    info!("Dataset: {}", config.workload.dataset_path.display());
    info!("Queries: {}", config.workload.queries_path.display());

    let workload = Arc::new(Workload::load(
        &config.workload,
        &config.load,
        &config.knowledge_base,
    )?);
    let target = Arc::new(HttpTarget::new(&config));
    let probe = Arc::new(SysinfoProbe::new());

    let users = config.load.concurrency;
    let duration = config.load.run_duration_secs;
    let orchestrator = LoadTestOrchestrator::new(config, workload, target, probe)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message(format!("Running load test ({} users, {}s)", users, duration));
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = orchestrator.run().await;
    pb.finish_and_clear();

    let artifacts = match result {
        Ok(artifacts) => artifacts,
        Err(e) => {
            error!("Load test failed: {}", e);
            eprintln!("\n❌ Load test failed: {}", e);
            return Err(e.into());
        }
    };

    let report = &artifacts.report;
    let summary = &report.summary;
    println!("\nStatus: {}", report.status.label());
    println!("  Requests: {}", summary.total_requests);
    println!("  Failures: {}", summary.total_failures);
    println!("  Success rate: {:.2}%", summary.success_rate);
    println!("  Average latency: {:.2}ms", summary.avg_response_ms);
    println!("  RPS: {:.2}", summary.overall_rps);
    println!("  Report: {}", artifacts.markdown_path.display());
    println!("  Chart: {}", artifacts.chart_path.display());
    println!("  Activity: {}", artifacts.activity_path.display());

    Ok(match report.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Aborted { .. } => ExitCode::from(2),
        RunStatus::InsufficientData => ExitCode::from(3),
    })
}

/// Initialize logging
fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(env_filter).with_target(false);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "kbload",
            "--host",
            "mindsdb.internal",
            "--pid",
            "812",
            "--users",
            "50",
            "--spawn-rate",
            "0.5",
            "--duration",
            "120",
            "--seed",
            "9",
            "--exclude-timeout-latency",
        ])
        .unwrap();

        let mut config = RunConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.target.host, "mindsdb.internal");
        assert_eq!(config.target.pid, 812);
        assert_eq!(config.load.concurrency, 50);
        assert_eq!(config.load.spawn_rate, 0.5);
        assert_eq!(config.load.run_duration_secs, 120);
        assert_eq!(config.load.seed, Some(9));
        assert!(!config.executor.count_timeout_latency);
        // Untouched values keep their defaults
        assert_eq!(config.target.port, 47334);
        assert_eq!(config.workload.data_size, 1000);
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["kbload", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let cli = Cli::try_parse_from(["kbload"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }
}
