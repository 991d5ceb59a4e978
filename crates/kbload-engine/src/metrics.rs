//! Outcome aggregation
//!
//! Everything here is computed once from the full outcome set of a run. No
//! streaming estimates are used, so the same input always produces the same
//! numbers.
//!
//! Percentiles use the nearest-rank rule: latencies are sorted ascending and
//! `p_q = sorted[ceil(q/100 * n) - 1]`, the index clamped to `[0, n - 1]`. The
//! ceiling is taken in integer arithmetic as `(q * n + 99) / 100`.

use std::collections::BTreeMap;
use std::time::Duration;

use kbload_core::{OperationKind, OutcomeStatus, RunConfig, TaskOutcome};
use serde::Serialize;

/// Characters of an error message that participate in histogram grouping.
pub const ERROR_KEY_CHARS: usize = 80;

/// Which outcomes contribute latency samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyPolicy {
    /// Keep the waiting time of timed-out calls in latency statistics.
    pub count_timeouts: bool,
}

impl LatencyPolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            count_timeouts: config.executor.count_timeout_latency,
        }
    }

    fn includes(&self, outcome: &TaskOutcome) -> bool {
        self.count_timeouts || !outcome.is_timeout()
    }
}

impl Default for LatencyPolicy {
    fn default() -> Self {
        Self {
            count_timeouts: true,
        }
    }
}

/// Descriptive statistics over a non-empty latency set, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Sample standard deviation; 0 for a single sample.
    pub stdev_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Returns `None` for an empty set.
    pub fn compute(mut latencies: Vec<Duration>) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort_unstable();

        let ms: Vec<f64> = latencies.iter().map(|d| d.as_nanos() as f64 / 1_000_000.0).collect();
        let n = ms.len();
        let mean = ms.iter().sum::<f64>() / n as f64;

        let median = if n % 2 == 0 {
            (ms[n / 2 - 1] + ms[n / 2]) / 2.0
        } else {
            ms[n / 2]
        };

        let stdev = if n > 1 {
            let var = ms.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        Some(Self {
            samples: n,
            mean_ms: mean,
            median_ms: median,
            min_ms: ms[0],
            max_ms: ms[n - 1],
            stdev_ms: stdev,
            p95_ms: ms[percentile_index(n, 95)],
            p99_ms: ms[percentile_index(n, 99)],
        })
    }
}

/// Nearest-rank index of the `q`-th percentile in a sorted set of `n > 0`.
pub fn percentile_index(n: usize, q: usize) -> usize {
    debug_assert!(n > 0);
    ((q * n + 99) / 100).saturating_sub(1).min(n - 1)
}

/// Failures sharing a status and message prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBucket {
    pub status: OutcomeStatus,
    pub message: String,
    pub count: usize,
}

/// Aggregated view over one operation kind, or over the whole workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetric {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub latency: Option<LatencyStats>,
    /// Attempts per second over the active window.
    pub throughput_rps: f64,
    /// Sorted by count, most frequent first.
    pub errors: Vec<ErrorBucket>,
    /// Response body bytes received, where the target reported a size.
    pub response_bytes: u64,
}

impl AggregatedMetric {
    pub fn from_outcomes<'a>(
        outcomes: impl IntoIterator<Item = &'a TaskOutcome>,
        window: Duration,
        policy: LatencyPolicy,
    ) -> Self {
        let mut total = 0;
        let mut successful = 0;
        let mut latencies = Vec::new();
        let mut response_bytes = 0u64;
        let mut histogram: BTreeMap<(OutcomeStatus, String), usize> = BTreeMap::new();

        for outcome in outcomes {
            total += 1;
            response_bytes += outcome.payload_bytes.unwrap_or(0);
            if outcome.success {
                successful += 1;
            } else {
                let message = outcome
                    .error
                    .as_deref()
                    .unwrap_or_default()
                    .chars()
                    .take(ERROR_KEY_CHARS)
                    .collect::<String>();
                *histogram.entry((outcome.status, message)).or_default() += 1;
            }
            if policy.includes(outcome) {
                latencies.push(outcome.latency);
            }
        }

        let mut errors: Vec<ErrorBucket> = histogram
            .into_iter()
            .map(|((status, message), count)| ErrorBucket {
                status,
                message,
                count,
            })
            .collect();
        // Stable sort keeps key order among equal counts
        errors.sort_by(|a, b| b.count.cmp(&a.count));

        let secs = window.as_secs_f64();
        Self {
            total,
            successful,
            failed: total - successful,
            latency: LatencyStats::compute(latencies),
            throughput_rps: if secs > 0.0 { total as f64 / secs } else { 0.0 },
            errors,
            response_bytes,
        }
    }

    /// Percentage of successful attempts, 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64 * 100.0
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total as f64 * 100.0
    }

    pub fn mean_ms(&self) -> f64 {
        self.latency.as_ref().map_or(0.0, |l| l.mean_ms)
    }

    pub fn p95_ms(&self) -> f64 {
        self.latency.as_ref().map_or(0.0, |l| l.p95_ms)
    }
}

/// Per-kind metrics plus a combined view of the workload kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    #[serde(with = "window_secs")]
    pub window: Duration,
    pub policy: LatencyPolicy,
    /// Only kinds that produced at least one outcome.
    pub per_kind: BTreeMap<OperationKind, AggregatedMetric>,
    /// Insert and search combined. Lifecycle calls are reported per kind only.
    pub overall: AggregatedMetric,
}

impl MetricsSummary {
    pub fn get(&self, kind: OperationKind) -> Option<&AggregatedMetric> {
        self.per_kind.get(&kind)
    }

    /// Outcomes recorded across every kind.
    pub fn outcome_count(&self) -> usize {
        self.per_kind.values().map(|m| m.total).sum()
    }

    pub fn has_workload_data(&self) -> bool {
        self.overall.total > 0
    }
}

mod window_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Reduce a run's outcomes. `window` is the scheduler's active window and
/// drives throughput.
pub fn aggregate(
    outcomes: &[TaskOutcome],
    window: Duration,
    policy: LatencyPolicy,
) -> MetricsSummary {
    let per_kind = OperationKind::ALL
        .iter()
        .filter_map(|&kind| {
            let mut matching = outcomes.iter().filter(|o| o.kind == kind).peekable();
            matching.peek()?;
            Some((kind, AggregatedMetric::from_outcomes(matching, window, policy)))
        })
        .collect();

    let overall = AggregatedMetric::from_outcomes(
        outcomes.iter().filter(|o| o.kind.is_workload()),
        window,
        policy,
    );

    MetricsSummary {
        window,
        policy,
        per_kind,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ok(kind: OperationKind, ms: u64) -> TaskOutcome {
        TaskOutcome::succeeded(kind, Utc::now(), Duration::from_millis(ms), 200, None)
    }

    fn err(kind: OperationKind, ms: u64, status: u16, message: &str) -> TaskOutcome {
        TaskOutcome::failed(
            kind,
            Utc::now(),
            Duration::from_millis(ms),
            OutcomeStatus::Http(status),
            message,
        )
    }

    fn millis(values: impl IntoIterator<Item = u64>) -> Vec<Duration> {
        values.into_iter().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_percentile_index_nearest_rank() {
        assert_eq!(percentile_index(1, 95), 0);
        assert_eq!(percentile_index(1, 99), 0);
        assert_eq!(percentile_index(20, 95), 18);
        assert_eq!(percentile_index(100, 95), 94);
        assert_eq!(percentile_index(100, 99), 98);
        assert_eq!(percentile_index(101, 99), 99);
        assert_eq!(percentile_index(7, 100), 6);
    }

    #[test]
    fn test_latency_stats_one_to_hundred() {
        let stats = LatencyStats::compute(millis((1..=100).rev())).unwrap();
        assert_eq!(stats.samples, 100);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.median_ms, 50.5);
        assert_eq!(stats.mean_ms, 50.5);
        assert_eq!(stats.p95_ms, 95.0);
        assert_eq!(stats.p99_ms, 99.0);
    }

    #[test]
    fn test_latency_stats_stdev() {
        let stats = LatencyStats::compute(millis([2, 4, 4, 4, 5, 5, 7, 9])).unwrap();
        assert!((stats.stdev_ms - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
        assert_eq!(stats.median_ms, 4.5);

        let single = LatencyStats::compute(millis([42])).unwrap();
        assert_eq!(single.stdev_ms, 0.0);
        assert_eq!(single.median_ms, 42.0);
        assert_eq!(single.p99_ms, 42.0);

        assert!(LatencyStats::compute(Vec::new()).is_none());
    }

    #[test]
    fn test_percentiles_monotonic() {
        let stats =
            LatencyStats::compute(millis([900, 3, 3, 17, 250, 4, 80, 80, 1, 12_000])).unwrap();
        assert!(stats.min_ms <= stats.median_ms);
        assert!(stats.median_ms <= stats.p95_ms);
        assert!(stats.p95_ms <= stats.p99_ms);
        assert!(stats.p99_ms <= stats.max_ms);
    }

    #[test]
    fn test_counts_sum_per_kind() {
        let outcomes = vec![
            ok(OperationKind::Insert, 10),
            err(OperationKind::Insert, 12, 500, "boom"),
            ok(OperationKind::Search, 100),
            ok(OperationKind::Search, 200),
            err(OperationKind::Search, 50, 429, "slow down"),
            ok(OperationKind::Create, 300),
        ];
        let summary = aggregate(&outcomes, Duration::from_secs(2), LatencyPolicy::default());

        for metric in summary.per_kind.values() {
            assert_eq!(metric.successful + metric.failed, metric.total);
        }
        assert_eq!(summary.get(OperationKind::Insert).unwrap().total, 2);
        assert_eq!(summary.get(OperationKind::Search).unwrap().total, 3);
        assert!(summary.get(OperationKind::Delete).is_none());
        assert_eq!(summary.outcome_count(), 6);

        // Lifecycle calls stay out of the workload view
        assert_eq!(summary.overall.total, 5);
        assert_eq!(summary.overall.failed, 2);
        assert_eq!(summary.overall.throughput_rps, 2.5);
        assert_eq!(summary.overall.success_rate(), 60.0);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let outcomes: Vec<_> = (0..500)
            .map(|i| {
                if i % 7 == 0 {
                    err(OperationKind::Search, i * 3 % 101, 503, "unavailable")
                } else {
                    ok(OperationKind::Insert, i * 13 % 997)
                }
            })
            .collect();
        let mut reversed = outcomes.clone();
        reversed.reverse();

        let a = aggregate(&outcomes, Duration::from_secs(30), LatencyPolicy::default());
        let b = aggregate(&reversed, Duration::from_secs(30), LatencyPolicy::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_error_histogram_grouping() {
        let long_a = format!("{}{}", "x".repeat(ERROR_KEY_CHARS), "tail one");
        let long_b = format!("{}{}", "x".repeat(ERROR_KEY_CHARS), "tail two");
        let outcomes = vec![
            err(OperationKind::Insert, 1, 500, &long_a),
            err(OperationKind::Insert, 1, 500, &long_b),
            err(OperationKind::Insert, 1, 400, "bad row"),
            err(OperationKind::Insert, 1, 429, "limited"),
            err(OperationKind::Insert, 1, 429, "limited"),
            err(OperationKind::Insert, 1, 429, "limited"),
        ];
        let metric = AggregatedMetric::from_outcomes(
            &outcomes,
            Duration::from_secs(1),
            LatencyPolicy::default(),
        );

        let keys: Vec<_> = metric
            .errors
            .iter()
            .map(|b| (b.status.to_string(), b.count))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("429".to_string(), 3),
                ("500".to_string(), 2),
                ("400".to_string(), 1),
            ]
        );
        assert_eq!(metric.errors[1].message.chars().count(), ERROR_KEY_CHARS);
    }

    #[test]
    fn test_timeout_latency_policy() {
        let outcomes = vec![
            ok(OperationKind::Search, 100),
            TaskOutcome::timed_out(OperationKind::Search, Utc::now(), Duration::from_secs(30)),
        ];

        let counted = aggregate(&outcomes, Duration::from_secs(60), LatencyPolicy::default());
        let search = counted.get(OperationKind::Search).unwrap();
        assert_eq!(search.latency.as_ref().unwrap().samples, 2);
        assert_eq!(search.latency.as_ref().unwrap().max_ms, 30_000.0);

        let excluded = aggregate(
            &outcomes,
            Duration::from_secs(60),
            LatencyPolicy {
                count_timeouts: false,
            },
        );
        let search = excluded.get(OperationKind::Search).unwrap();
        assert_eq!(search.total, 2);
        assert_eq!(search.failed, 1);
        assert_eq!(search.latency.as_ref().unwrap().samples, 1);
        assert_eq!(search.errors[0].status, OutcomeStatus::Timeout);
    }

    #[test]
    fn test_response_bytes_summed_per_kind() {
        let outcomes = vec![
            TaskOutcome::succeeded(
                OperationKind::Search,
                Utc::now(),
                Duration::from_millis(5),
                200,
                Some(2048),
            ),
            TaskOutcome::succeeded(
                OperationKind::Search,
                Utc::now(),
                Duration::from_millis(5),
                200,
                Some(1024),
            ),
            ok(OperationKind::Insert, 5),
            err(OperationKind::Insert, 5, 500, "boom"),
        ];
        let summary = aggregate(&outcomes, Duration::from_secs(1), LatencyPolicy::default());

        assert_eq!(summary.get(OperationKind::Search).unwrap().response_bytes, 3072);
        assert_eq!(summary.get(OperationKind::Insert).unwrap().response_bytes, 0);
        assert_eq!(summary.overall.response_bytes, 3072);
    }

    #[test]
    fn test_empty_outcomes() {
        let summary = aggregate(&[], Duration::ZERO, LatencyPolicy::default());
        assert!(summary.per_kind.is_empty());
        assert!(!summary.has_workload_data());
        assert!(summary.overall.latency.is_none());
        assert_eq!(summary.overall.throughput_rps, 0.0);
        assert_eq!(summary.overall.success_rate(), 0.0);
    }
}
