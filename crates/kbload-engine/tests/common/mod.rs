//! Shared mock targets, probes and config for engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kbload_core::RunConfig;
use kbload_engine::{
    CallError, CallResponse, CallResult, IngestRecord, KnowledgeBaseTarget, ProcessProbe,
    ProcessReading, SearchQuery, Workload,
};

/// In-process target with configurable latency and failure pattern.
pub struct MockTarget {
    pub delay: Duration,
    /// Every n-th workload call fails with `fail_status`.
    pub fail_every: Option<usize>,
    pub fail_status: u16,
    pub create_fails: bool,
    /// Workload calls never return.
    pub hang: bool,
    /// `row_count` never returns.
    pub row_count_hangs: bool,
    pub workload_calls: AtomicUsize,
    pub lifecycle_calls: AtomicUsize,
}

impl MockTarget {
    pub fn healthy(delay: Duration) -> Self {
        Self {
            delay,
            fail_every: None,
            fail_status: 0,
            create_fails: false,
            hang: false,
            row_count_hangs: false,
            workload_calls: AtomicUsize::new(0),
            lifecycle_calls: AtomicUsize::new(0),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.workload_calls.load(Ordering::SeqCst) + self.lifecycle_calls.load(Ordering::SeqCst)
    }

    async fn workload_call(&self) -> CallResult {
        let n = self.workload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.delay).await;
        match self.fail_every {
            Some(every) if n % every == 0 => {
                Err(CallError::http(self.fail_status, "Too Many Requests"))
            }
            _ => Ok(CallResponse {
                status: 200,
                payload_bytes: Some(64),
            }),
        }
    }
}

#[async_trait]
impl KnowledgeBaseTarget for MockTarget {
    async fn create(&self) -> CallResult {
        self.lifecycle_calls.fetch_add(1, Ordering::SeqCst);
        if self.create_fails {
            return Err(CallError::http(500, "knowledge base already exists"));
        }
        Ok(CallResponse {
            status: 200,
            payload_bytes: None,
        })
    }

    async fn insert(&self, _record: &IngestRecord) -> CallResult {
        self.workload_call().await
    }

    async fn search(&self, _query: &SearchQuery) -> CallResult {
        self.workload_call().await
    }

    async fn delete(&self) -> CallResult {
        self.lifecycle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CallResponse {
            status: 200,
            payload_bytes: None,
        })
    }

    async fn row_count(&self) -> Option<u64> {
        if self.row_count_hangs {
            std::future::pending::<()>().await;
        }
        Some(self.workload_calls.load(Ordering::SeqCst) as u64)
    }
}

/// Process that is alive until `dies_at`, if set.
pub struct MockProbe {
    dies_at: Option<Instant>,
    pub reads: AtomicUsize,
}

impl MockProbe {
    pub fn alive() -> Self {
        Self {
            dies_at: None,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn dies_after(after: Duration) -> Self {
        Self {
            dies_at: Some(Instant::now() + after),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn dead() -> Self {
        Self::dies_after(Duration::ZERO)
    }

    fn is_alive(&self) -> bool {
        self.dies_at.map_or(true, |at| Instant::now() < at)
    }
}

impl ProcessProbe for MockProbe {
    fn exists(&self, _pid: u32) -> bool {
        self.is_alive()
    }

    fn sample(&self, _pid: u32) -> Option<ProcessReading> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        self.is_alive().then(|| ProcessReading {
            cpu_percent: 12.5,
            memory_mb: 256.0 + n as f64,
        })
    }
}

pub fn test_config(out_dir: &Path) -> RunConfig {
    let mut config = RunConfig::default();
    config.target.pid = 4242;
    config.load.concurrency = 1;
    config.load.spawn_rate = 1.0;
    config.load.run_duration_secs = 2;
    config.load.think_time_min_ms = 0;
    config.load.think_time_max_ms = 0;
    config.load.seed = Some(7);
    config.sampler.interval_ms = 250;
    config.executor.grace_period_secs = 2;
    config.output.dir = out_dir.to_path_buf();
    config
}

pub fn workload() -> Arc<Workload> {
    let records = (0..5)
        .map(|i| IngestRecord {
            fields: vec![
                ("text".to_string(), Some(format!("paper body {i}"))),
                ("title".to_string(), Some(format!("Paper {i}"))),
            ],
            content_bytes: 32,
        })
        .collect();
    let queries = ["graph neural networks", "diffusion models"]
        .iter()
        .map(|q| SearchQuery {
            query: q.to_string(),
            filters: BTreeMap::new(),
        })
        .collect();
    Arc::new(Workload::new(records, queries, 3, 2).expect("workload"))
}
