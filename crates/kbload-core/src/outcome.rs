//! Recorded results of individual operations against the target.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four operations the harness issues against a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Knowledge base creation, once per run.
    Create,
    /// Single-record ingest.
    Insert,
    /// Semantic search, optionally with metadata filters.
    Search,
    /// Knowledge base teardown, once per run.
    Delete,
}

impl OperationKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [OperationKind; 4] = [Self::Create, Self::Insert, Self::Search, Self::Delete];

    /// Kinds issued repeatedly by virtual users.
    pub const WORKLOAD: [OperationKind; 2] = [Self::Insert, Self::Search];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Insert => "insert",
            Self::Search => "search",
            Self::Delete => "delete",
        }
    }

    /// Whether virtual users issue this kind during the timed run.
    #[must_use]
    pub const fn is_workload(&self) -> bool {
        matches!(self, Self::Insert | Self::Search)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call ended at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum OutcomeStatus {
    /// The target answered with this HTTP status code.
    Http(u16),
    /// Connection, DNS or protocol failure before a status was received.
    Transport,
    /// The call exceeded its upper bound or was torn down at the hard deadline.
    Timeout,
}

impl OutcomeStatus {
    /// Whether this is a 2xx HTTP status.
    #[must_use]
    pub const fn is_http_success(&self) -> bool {
        matches!(self, Self::Http(code) if *code >= 200 && *code < 300)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "{code}"),
            Self::Transport => f.write_str("transport"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// Result of one executed task. Immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub success: bool,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub payload_bytes: Option<u64>,
}

impl TaskOutcome {
    /// A successful call.
    pub fn succeeded(
        kind: OperationKind,
        started_at: DateTime<Utc>,
        latency: Duration,
        status: u16,
        payload_bytes: Option<u64>,
    ) -> Self {
        Self {
            kind,
            started_at,
            latency,
            success: true,
            status: OutcomeStatus::Http(status),
            error: None,
            payload_bytes,
        }
    }

    /// A failed call with its status and error text captured verbatim.
    pub fn failed(
        kind: OperationKind,
        started_at: DateTime<Utc>,
        latency: Duration,
        status: OutcomeStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            started_at,
            latency,
            success: false,
            status,
            error: Some(error.into()),
            payload_bytes: None,
        }
    }

    /// A call that hit its upper bound or was torn down at the hard deadline.
    pub fn timed_out(kind: OperationKind, started_at: DateTime<Utc>, waited: Duration) -> Self {
        Self::failed(
            kind,
            started_at,
            waited,
            OutcomeStatus::Timeout,
            format!("{kind} timed out after {:.2}s", waited.as_secs_f64()),
        )
    }

    /// Latency in fractional milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_nanos() as f64 / 1_000_000.0
    }

    /// Whether the outcome carries the timeout marker.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.status == OutcomeStatus::Timeout
    }
}
