//! Run configuration for the load harness
//!
//! Supports layered sources with precedence:
//! 1. Environment variables prefixed with `KBLOAD_` (highest priority)
//! 2. A YAML, TOML or JSON file passed to [`RunConfig::load`]
//! 3. Built-in defaults (lowest priority)
//!
//! A loaded configuration is immutable for the duration of a run and must
//! pass [`RunConfig::validate`] before any virtual user is spawned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Root configuration for one load-test run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Where the target service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Host name or URL, scheme optional (default: "127.0.0.1")
    pub host: String,

    /// HTTP port (default: 47334)
    pub port: u16,

    /// Process id of the target, sampled for CPU and memory
    pub pid: u32,

    /// Database name sent in the query context (default: "mindsdb")
    pub database: String,
}

/// Virtual user ramp-up and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Number of concurrent virtual users (default: 30)
    pub concurrency: usize,

    /// New users started per second during ramp-up (default: 2.0)
    pub spawn_rate: f64,

    /// Timed run length in seconds, measured from the start of ramp-up (default: 30)
    pub run_duration_secs: i64,

    /// Lower think-time bound in milliseconds (default: 1000)
    pub think_time_min_ms: u64,

    /// Upper think-time bound in milliseconds (default: 5000)
    pub think_time_max_ms: u64,

    /// Relative weight of insert tasks (default: 3)
    pub insert_weight: u32,

    /// Relative weight of search tasks (default: 2)
    pub search_weight: u32,

    /// Seed for per-user randomness; entropy when absent
    pub seed: Option<u64>,
}

/// Input files and size bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// JSON array of records to ingest
    pub dataset_path: PathBuf,

    /// JSON array of search queries
    pub queries_path: PathBuf,

    /// Maximum number of records taken from the dataset (default: 1000)
    pub data_size: usize,
}

/// Shape of the knowledge base created for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    pub name: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    /// Reranking model name; reranking is disabled when absent
    pub reranking_model: Option<String>,
    /// Environment variable holding the provider API key
    pub api_key_env: String,
    pub content_columns: Vec<String>,
    pub metadata_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Interval between resource samples in milliseconds (default: 1000)
    pub interval_ms: u64,
}

/// Per-call bounds and hard deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for create, insert and delete calls (default: 30)
    pub request_timeout_secs: u64,

    /// Floor for the search bound; the effective bound is never shorter
    /// than the run duration (default: 30)
    pub search_timeout_secs: u64,

    /// How long users may stay blocked after the stop signal before they
    /// are torn down (default: 10)
    pub grace_period_secs: u64,

    /// Keep the waiting time of timed-out calls in latency statistics (default: true)
    pub count_timeout_latency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the report, chart and time series (default: "reports")
    pub dir: PathBuf,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 47334,
            pid: 0,
            database: "mindsdb".to_string(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            spawn_rate: 2.0,
            run_duration_secs: 30,
            think_time_min_ms: 1000,
            think_time_max_ms: 5000,
            insert_weight: 3,
            search_weight: 2,
            seed: None,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/test_data.json"),
            queries_path: PathBuf::from("data/search_queries.json"),
            data_size: 1000,
        }
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            name: "arxiv_test_kb".to_string(),
            embedding_provider: "openai".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            reranking_model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            content_columns: vec!["text".to_string()],
            metadata_columns: ["authors", "title", "categories", "arxiv_id"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            search_timeout_secs: 30,
            grace_period_secs: 10,
            count_timeout_latency: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

impl RunConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Example override: `KBLOAD_LOAD__CONCURRENCY=50`.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(HarnessError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("KBLOAD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RunConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate numeric settings. Called before anything is scheduled.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.target.host.trim().is_empty() {
            return Err(HarnessError::config("target.host cannot be empty"));
        }

        if self.target.port == 0 {
            return Err(HarnessError::config("target.port must be non-zero"));
        }

        if self.target.pid == 0 {
            return Err(HarnessError::config("target.pid must be set to the target process id"));
        }

        if self.load.concurrency == 0 {
            return Err(HarnessError::config("load.concurrency must be > 0"));
        }

        if !self.load.spawn_rate.is_finite() || self.load.spawn_rate <= 0.0 {
            return Err(HarnessError::config(format!(
                "load.spawn_rate must be a positive number, got {}",
                self.load.spawn_rate
            )));
        }

        if self.load.run_duration_secs <= 0 {
            return Err(HarnessError::config(format!(
                "load.run_duration_secs must be > 0, got {}",
                self.load.run_duration_secs
            )));
        }

        if self.load.think_time_min_ms > self.load.think_time_max_ms {
            return Err(HarnessError::config(format!(
                "load.think_time_min_ms ({}) exceeds load.think_time_max_ms ({})",
                self.load.think_time_min_ms, self.load.think_time_max_ms
            )));
        }

        if self.load.insert_weight == 0 && self.load.search_weight == 0 {
            return Err(HarnessError::config(
                "at least one of load.insert_weight and load.search_weight must be > 0",
            ));
        }

        if self.workload.data_size == 0 {
            return Err(HarnessError::config("workload.data_size must be > 0"));
        }

        if self.knowledge_base.name.trim().is_empty() {
            return Err(HarnessError::config("knowledge_base.name cannot be empty"));
        }

        if self.knowledge_base.content_columns.is_empty() {
            return Err(HarnessError::config(
                "knowledge_base.content_columns must name at least one column",
            ));
        }

        if self.sampler.interval_ms == 0 {
            return Err(HarnessError::config("sampler.interval_ms must be > 0"));
        }

        if self.executor.request_timeout_secs == 0 {
            return Err(HarnessError::config("executor.request_timeout_secs must be > 0"));
        }

        if self.executor.search_timeout_secs == 0 {
            return Err(HarnessError::config("executor.search_timeout_secs must be > 0"));
        }

        Ok(())
    }

    /// Check that the dataset and query files exist and are JSON.
    pub fn validate_paths(&self) -> HarnessResult<()> {
        for (label, path) in [
            ("workload.dataset_path", &self.workload.dataset_path),
            ("workload.queries_path", &self.workload.queries_path),
        ] {
            if !path.is_file() {
                return Err(HarnessError::config(format!(
                    "{label}: file {} does not exist",
                    path.display()
                )));
            }

            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json {
                return Err(HarnessError::config(format!(
                    "{label}: file {} is not a JSON file",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Base URL of the target, e.g. `http://127.0.0.1:47334`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = self.target.host.trim().trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        format!("{host}:{}", self.target.port)
    }

    /// Timed run length. Only meaningful after [`RunConfig::validate`].
    #[must_use]
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.load.run_duration_secs.max(0) as u64)
    }

    #[must_use]
    pub fn think_time_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.load.think_time_min_ms),
            Duration::from_millis(self.load.think_time_max_ms),
        )
    }

    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sampler.interval_ms)
    }

    /// Upper bound for create, insert and delete calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.request_timeout_secs)
    }

    /// Upper bound for search calls, never shorter than the run duration.
    #[must_use]
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.search_timeout_secs).max(self.run_duration())
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.executor.grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> RunConfig {
        let mut config = RunConfig::default();
        config.target.pid = 4242;
        config
    }

    #[test]
    fn test_defaults_validate_once_pid_is_set() {
        assert!(RunConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_zero_spawn_rate_rejected() {
        let mut config = valid_config();
        config.load.spawn_rate = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("spawn_rate"));

        config.load.spawn_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let mut config = valid_config();
        config.load.run_duration_secs = 0;
        assert!(config.validate().is_err());

        config.load.run_duration_secs = -5;
        assert!(config.validate().unwrap_err().to_string().contains("-5"));
    }

    #[test]
    fn test_think_time_bounds() {
        let mut config = valid_config();
        config.load.think_time_min_ms = 10;
        config.load.think_time_max_ms = 5;
        assert!(config.validate().is_err());

        config.load.think_time_max_ms = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = valid_config();
        config.load.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_normalisation() {
        let mut config = valid_config();
        config.target.host = "http://localhost/".to_string();
        config.target.port = 8080;
        assert_eq!(config.base_url(), "http://localhost:8080");

        config.target.host = "10.0.0.5".to_string();
        assert_eq!(config.base_url(), "http://10.0.0.5:8080");
    }

    #[test]
    fn test_search_timeout_never_below_run_duration() {
        let mut config = valid_config();
        config.load.run_duration_secs = 120;
        config.executor.search_timeout_secs = 30;
        assert_eq!(config.search_timeout(), Duration::from_secs(120));

        config.load.run_duration_secs = 10;
        assert_eq!(config.search_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbload.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "target:\n  host: kb.internal\n  pid: 77\nload:\n  concurrency: 5\n  spawn_rate: 0.5"
        )
        .unwrap();

        let config = RunConfig::load(Some(&path)).unwrap();
        assert_eq!(config.target.host, "kb.internal");
        assert_eq!(config.target.pid, 77);
        assert_eq!(config.load.concurrency, 5);
        assert_eq!(config.load.spawn_rate, 0.5);
        // Untouched sections fall back to defaults
        assert_eq!(config.target.port, 47334);
        assert_eq!(config.load.insert_weight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let err = RunConfig::load(Some(Path::new("/nonexistent/kbload.yaml"))).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_validate_paths() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("data.json");
        let queries = dir.path().join("queries.txt");
        std::fs::write(&dataset, "[]").unwrap();
        std::fs::write(&queries, "[]").unwrap();

        let mut config = valid_config();
        config.workload.dataset_path = dataset;
        config.workload.queries_path = queries.clone();
        assert!(config.validate_paths().unwrap_err().to_string().contains("not a JSON file"));

        let renamed = dir.path().join("queries.json");
        std::fs::rename(&queries, &renamed).unwrap();
        config.workload.queries_path = renamed;
        assert!(config.validate_paths().is_ok());
    }
}
