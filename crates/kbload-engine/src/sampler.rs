//! Out-of-band CPU/memory sampling of the target process.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kbload_core::{HarnessError, HarnessResult, ResourceSample};
use parking_lot::Mutex;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::sink::SampleSink;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One reading of a live process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessReading {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Reads resource usage of a process by id.
///
/// `sample` returns `None` when the process is gone or unreadable; the sampler
/// records that as a gap.
pub trait ProcessProbe: Send + Sync {
    fn exists(&self, pid: u32) -> bool;

    fn sample(&self, pid: u32) -> Option<ProcessReading>;
}

/// [`ProcessProbe`] backed by `sysinfo`.
///
/// A reading covers the process and every descendant, so worker children
/// spawned by the target are accounted for. CPU usage is relative to the
/// previous refresh, so the very first reading of a process reports 0%.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Refresh the process table and sum usage over `root` and its descendants.
    fn read_tree(system: &mut System, root: Pid) -> Option<(Vec<Pid>, ProcessReading)> {
        system.refresh_processes();
        let processes = system.processes();
        if !processes.contains_key(&root) {
            return None;
        }

        let members = process_tree(root, processes.iter().map(|(pid, p)| (*pid, p.parent())));
        let mut reading = ProcessReading {
            cpu_percent: 0.0,
            memory_mb: 0.0,
        };
        for process in members.iter().filter_map(|pid| processes.get(pid)) {
            reading.cpu_percent += f64::from(process.cpu_usage());
            reading.memory_mb += process.memory() as f64 / BYTES_PER_MB;
        }
        Some((members, reading))
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn exists(&self, pid: u32) -> bool {
        let mut system = self.system.lock();
        system.refresh_process(Pid::from_u32(pid))
    }

    fn sample(&self, pid: u32) -> Option<ProcessReading> {
        let mut system = self.system.lock();
        Self::read_tree(&mut system, Pid::from_u32(pid)).map(|(_, reading)| reading)
    }
}

/// `root` followed by every process whose parent chain reaches it.
fn process_tree<P>(root: P, links: impl IntoIterator<Item = (P, Option<P>)>) -> Vec<P>
where
    P: Copy + Eq + Hash,
{
    let mut children: HashMap<P, Vec<P>> = HashMap::new();
    for (pid, parent) in links {
        if let Some(parent) = parent {
            children.entry(parent).or_default().push(pid);
        }
    }

    let mut seen = HashSet::from([root]);
    let mut members = vec![root];
    let mut next = 0;
    while let Some(&pid) = members.get(next) {
        next += 1;
        for &child in children.get(&pid).into_iter().flatten() {
            if seen.insert(child) {
                members.push(child);
            }
        }
    }
    members
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Sampling,
    Stopped,
}

/// Samples collected during one run plus the ticks that produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSeries {
    pub pid: u32,
    pub interval: Duration,
    pub samples: Vec<ResourceSample>,
    /// Ticks where the process could not be read.
    pub gaps: usize,
}

impl ResourceSeries {
    pub fn empty(pid: u32, interval: Duration) -> Self {
        Self {
            pid,
            interval,
            samples: Vec::new(),
            gaps: 0,
        }
    }

    /// False when any tick failed or nothing was ever sampled.
    pub fn is_complete(&self) -> bool {
        self.gaps == 0 && !self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.last().map(|s| s.timestamp)
    }

    pub fn max_memory_mb(&self) -> f64 {
        self.samples.iter().map(|s| s.memory_mb).fold(0.0, f64::max)
    }

    pub fn avg_memory_mb(&self) -> f64 {
        mean(self.samples.iter().map(|s| s.memory_mb))
    }

    pub fn max_cpu_percent(&self) -> f64 {
        self.samples.iter().map(|s| s.cpu_percent).fold(0.0, f64::max)
    }

    pub fn avg_cpu_percent(&self) -> f64 {
        mean(self.samples.iter().map(|s| s.cpu_percent))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

struct ActiveSampling {
    pid: u32,
    interval: Duration,
    output_path: Option<PathBuf>,
    origin: Instant,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic sampler with an `Idle -> Sampling -> Stopped` lifecycle.
///
/// `start` takes a first reading before returning, and `stop` takes a last one,
/// so the series brackets whatever ran in between.
pub struct ResourceSampler {
    probe: Arc<dyn ProcessProbe>,
    sink: Arc<SampleSink>,
    gaps: Arc<AtomicUsize>,
    state: SamplerState,
    active: Option<ActiveSampling>,
    series: Option<ResourceSeries>,
}

impl ResourceSampler {
    pub fn new(probe: Arc<dyn ProcessProbe>, sink: Arc<SampleSink>) -> Self {
        Self {
            probe,
            sink,
            gaps: Arc::new(AtomicUsize::new(0)),
            state: SamplerState::Idle,
            active: None,
            series: None,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Begin sampling `pid` every `interval`. When `output_path` is set the
    /// series is written there as CSV on stop.
    pub fn start(
        &mut self,
        pid: u32,
        interval: Duration,
        output_path: Option<PathBuf>,
    ) -> HarnessResult<()> {
        if self.state != SamplerState::Idle {
            return Err(HarnessError::invalid_state(format!(
                "sampler cannot start from {:?}",
                self.state
            )));
        }
        if interval.is_zero() {
            return Err(HarnessError::config("sampler interval must be > 0"));
        }

        let origin = Instant::now();
        take_sample(self.probe.as_ref(), &self.sink, &self.gaps, pid, origin);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sample_loop(
            Arc::clone(&self.probe),
            Arc::clone(&self.sink),
            Arc::clone(&self.gaps),
            pid,
            interval,
            origin,
            stop_rx,
        ));

        info!(pid, interval_ms = interval.as_millis() as u64, "Resource sampling started");
        self.active = Some(ActiveSampling {
            pid,
            interval,
            output_path,
            origin,
            stop_tx,
            handle,
        });
        self.state = SamplerState::Sampling;
        Ok(())
    }

    /// Stop sampling, flush the series and return it.
    ///
    /// Calling `stop` again returns the same series. Stopping a sampler that
    /// never started yields an empty series.
    pub async fn stop(&mut self) -> HarnessResult<ResourceSeries> {
        if let Some(series) = &self.series {
            return Ok(series.clone());
        }

        let series = match self.active.take() {
            None => ResourceSeries::empty(0, Duration::ZERO),
            Some(active) => {
                let _ = active.stop_tx.send(true);
                if let Err(e) = active.handle.await {
                    warn!("Sampling task ended abnormally: {}", e);
                }
                take_sample(
                    self.probe.as_ref(),
                    &self.sink,
                    &self.gaps,
                    active.pid,
                    active.origin,
                );

                let series = ResourceSeries {
                    pid: active.pid,
                    interval: active.interval,
                    samples: self.sink.snapshot(),
                    gaps: self.gaps.load(Ordering::Relaxed),
                };
                if let Some(path) = &active.output_path {
                    write_csv(path, &series.samples)?;
                    debug!(path = %path.display(), "Resource series flushed");
                }
                info!(
                    samples = series.samples.len(),
                    gaps = series.gaps,
                    "Resource sampling stopped"
                );
                series
            }
        };

        self.state = SamplerState::Stopped;
        self.series = Some(series.clone());
        Ok(series)
    }
}

async fn sample_loop(
    probe: Arc<dyn ProcessProbe>,
    sink: Arc<SampleSink>,
    gaps: Arc<AtomicUsize>,
    pid: u32,
    every: Duration,
    origin: Instant,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(origin + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                take_sample(probe.as_ref(), &sink, &gaps, pid, origin);
            }
            _ = stop.changed() => break,
        }
    }
}

fn take_sample(
    probe: &dyn ProcessProbe,
    sink: &SampleSink,
    gaps: &AtomicUsize,
    pid: u32,
    origin: Instant,
) {
    match probe.sample(pid) {
        Some(reading) => sink.record(ResourceSample {
            timestamp: Utc::now(),
            elapsed: origin.elapsed(),
            cpu_percent: reading.cpu_percent,
            memory_mb: reading.memory_mb,
        }),
        None => {
            // Only the first gap is logged
            if gaps.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(pid, "Target process could not be sampled, resource data will be incomplete");
            }
        }
    }
}

/// Write samples as `timestamp,elapsed_secs,cpu_percent,memory_mb` rows.
pub fn write_csv(path: &Path, samples: &[ResourceSample]) -> HarnessResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if samples.is_empty() {
        writer.write_record(["timestamp", "elapsed_secs", "cpu_percent", "memory_mb"])?;
    }
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Alive for the first `alive_calls` readings.
    struct CountingProbe {
        calls: AtomicUsize,
        alive_calls: usize,
    }

    impl ProcessProbe for CountingProbe {
        fn exists(&self, _pid: u32) -> bool {
            self.calls.load(Ordering::SeqCst) < self.alive_calls
        }

        fn sample(&self, _pid: u32) -> Option<ProcessReading> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (n < self.alive_calls).then(|| ProcessReading {
                cpu_percent: 10.0 * n as f64,
                memory_mb: 100.0 + n as f64,
            })
        }
    }

    fn sampler(alive_calls: usize) -> ResourceSampler {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            alive_calls,
        });
        ResourceSampler::new(probe, SampleSink::shared())
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_spaced_by_interval() {
        let mut sampler = sampler(usize::MAX);
        let interval = Duration::from_secs(1);
        sampler.start(42, interval, None).unwrap();
        assert_eq!(sampler.state(), SamplerState::Sampling);

        tokio::time::sleep(Duration::from_millis(4500)).await;
        let series = sampler.stop().await.unwrap();

        // start + 4 ticks + stop
        assert_eq!(series.samples.len(), 6);
        assert!(series.is_complete());
        for pair in series.samples[..5].windows(2) {
            assert_eq!(pair[1].elapsed - pair[0].elapsed, interval);
        }
        assert_eq!(series.samples[5].elapsed, Duration::from_millis(4500));
        assert_eq!(series.max_memory_mb(), 105.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_process_leaves_gaps() {
        let mut sampler = sampler(3);
        sampler.start(42, Duration::from_secs(1), None).unwrap();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let series = sampler.stop().await.unwrap();

        assert_eq!(series.samples.len(), 3);
        assert_eq!(series.gaps, 9);
        assert!(!series.is_complete());
        assert!(series.samples.last().unwrap().elapsed <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut sampler = sampler(usize::MAX);
        sampler.start(1, Duration::from_secs(1), None).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let first = sampler.stop().await.unwrap();
        let second = sampler.stop().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sampler.state(), SamplerState::Stopped);

        assert!(sampler.start(1, Duration::from_secs(1), None).is_err());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut sampler = sampler(usize::MAX);
        let series = sampler.stop().await.unwrap();
        assert!(series.samples.is_empty());
        assert!(!series.is_complete());
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_csv_on_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.csv");

        let mut sampler = sampler(usize::MAX);
        sampler
            .start(7, Duration::from_secs(1), Some(path.clone()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let series = sampler.stop().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,elapsed_secs,cpu_percent,memory_mb")
        );
        assert_eq!(lines.count(), series.samples.len());
    }

    #[test]
    fn test_empty_csv_has_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.csv");
        write_csv(&path, &[]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim(),
            "timestamp,elapsed_secs,cpu_percent,memory_mb"
        );
    }

    #[test]
    fn test_sysinfo_probe_reads_own_process() {
        let probe = SysinfoProbe::new();
        let pid = std::process::id();
        assert!(probe.exists(pid));
        let reading = probe.sample(pid).unwrap();
        assert!(reading.memory_mb > 0.0);
    }
    #[test]
    fn test_process_tree_follows_parent_chain() {
        // 1 -> 2 -> 4, 1 -> 3, 5 unrelated, 6 <-> 7 cycle off to the side
        let links = [
            (1, None),
            (2, Some(1)),
            (3, Some(1)),
            (4, Some(2)),
            (5, None),
            (6, Some(7)),
            (7, Some(6)),
        ];
        let mut members = process_tree(1u32, links);
        assert_eq!(members[0], 1);
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3, 4]);

        assert_eq!(process_tree(4u32, links), vec![4]);
        let mut cycle = process_tree(6u32, links);
        cycle.sort_unstable();
        assert_eq!(cycle, vec![6, 7]);
    }

    #[cfg(unix)]
    #[test]
    fn test_sysinfo_probe_includes_child_processes() {
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .unwrap();
        let own = Pid::from_u32(std::process::id());

        let mut system = System::new();
        let read = SysinfoProbe::read_tree(&mut system, own);
        child.kill().unwrap();
        child.wait().unwrap();

        let (members, reading) = read.unwrap();
        assert_eq!(members[0], own);
        assert!(members.contains(&Pid::from_u32(child.id())));
        assert!(reading.memory_mb > 0.0);
    }
}
