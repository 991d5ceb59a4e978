//! Task executor: one call, one timed outcome

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kbload_core::{OperationKind, RunConfig, TaskOutcome};
use tokio::time::Instant;

use crate::target::{CallResult, KnowledgeBaseTarget};
use crate::workload::{IngestRecord, SearchQuery, WorkloadItem};

/// A single logical operation against the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Task<'a> {
    Create,
    Insert(&'a IngestRecord),
    Search(&'a SearchQuery),
    Delete,
}

impl Task<'_> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create => OperationKind::Create,
            Self::Insert(_) => OperationKind::Insert,
            Self::Search(_) => OperationKind::Search,
            Self::Delete => OperationKind::Delete,
        }
    }
}

impl<'a> From<WorkloadItem<'a>> for Task<'a> {
    fn from(item: WorkloadItem<'a>) -> Self {
        match item {
            WorkloadItem::Record(record) => Self::Insert(record),
            WorkloadItem::Query(query) => Self::Search(query),
        }
    }
}

/// Upper bounds applied to each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBounds {
    /// Applies to create, insert and delete.
    pub request: Duration,
    /// Applies to search.
    pub search: Duration,
}

impl CallBounds {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            request: config.request_timeout(),
            search: config.search_timeout(),
        }
    }

    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Search => self.search,
            _ => self.request,
        }
    }
}

/// Executes tasks against a target, measuring wall-clock latency.
#[derive(Clone)]
pub struct TaskExecutor {
    target: Arc<dyn KnowledgeBaseTarget>,
    bounds: CallBounds,
}

impl TaskExecutor {
    pub fn new(target: Arc<dyn KnowledgeBaseTarget>, bounds: CallBounds) -> Self {
        Self { target, bounds }
    }

    pub fn target(&self) -> &Arc<dyn KnowledgeBaseTarget> {
        &self.target
    }

    /// Run exactly one attempt. Never retries and never returns an error:
    /// every failure mode becomes a failed [`TaskOutcome`].
    pub async fn execute(&self, task: Task<'_>) -> TaskOutcome {
        let kind = task.kind();
        let bound = self.bounds.for_kind(kind);
        let started_at = Utc::now();
        let start = Instant::now();

        let call = self.dispatch(task);
        let result = tokio::time::timeout(bound, call).await;
        let latency = start.elapsed();

        match result {
            Ok(Ok(response)) => TaskOutcome::succeeded(
                kind,
                started_at,
                latency,
                response.status,
                response.payload_bytes,
            ),
            Ok(Err(error)) => {
                TaskOutcome::failed(kind, started_at, latency, error.status, error.message)
            }
            Err(_) => TaskOutcome::timed_out(kind, started_at, latency),
        }
    }

    async fn dispatch(&self, task: Task<'_>) -> CallResult {
        match task {
            Task::Create => self.target.create().await,
            Task::Insert(record) => self.target.insert(record).await,
            Task::Search(query) => self.target.search(query).await,
            Task::Delete => self.target.delete().await,
        }
    }
}
