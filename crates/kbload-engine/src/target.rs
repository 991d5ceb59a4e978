//! Capability to talk to the system under test.

use async_trait::async_trait;
use kbload_core::OutcomeStatus;

use crate::workload::{IngestRecord, SearchQuery};

/// Successful answer from the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallResponse {
    pub status: u16,
    /// Size of the response body, for informational volume reporting.
    pub payload_bytes: Option<u64>,
}

/// Failed call: a non-2xx status, an error payload or a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub status: OutcomeStatus,
    pub message: String,
}

impl CallError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Http(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Transport,
            message: message.into(),
        }
    }
}

pub type CallResult = Result<CallResponse, CallError>;

/// One method per operation kind. Implementations must be safe to call
/// from many virtual users at once and must not retry.
#[async_trait]
pub trait KnowledgeBaseTarget: Send + Sync {
    async fn create(&self) -> CallResult;

    async fn insert(&self, record: &IngestRecord) -> CallResult;

    async fn search(&self, query: &SearchQuery) -> CallResult;

    async fn delete(&self) -> CallResult;

    /// Rows currently stored; `None` when it cannot be determined.
    async fn row_count(&self) -> Option<u64>;
}
