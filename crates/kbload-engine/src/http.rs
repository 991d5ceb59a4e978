//! HTTP implementation of [`KnowledgeBaseTarget`].

use async_trait::async_trait;
use kbload_core::RunConfig;
use serde_json::Value;
use tracing::debug;

use crate::statements::Statements;
use crate::target::{CallError, CallResponse, CallResult, KnowledgeBaseTarget};
use crate::workload::{IngestRecord, SearchQuery};

/// Error bodies longer than this are truncated in outcomes.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Sends query-language statements to `POST {base}/api/sql/query`.
///
/// The client carries no timeout of its own; bounds are applied per call by
/// the executor.
pub struct HttpTarget {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    statements: Statements,
}

impl HttpTarget {
    pub fn new(config: &RunConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &RunConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/sql/query", config.base_url()),
            database: config.target.database.clone(),
            statements: Statements::new(config.knowledge_base.clone()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(&self, statement: String) -> Result<(u16, Value, u64), CallError> {
        let body = serde_json::json!({
            "query": statement,
            "context": { "db": self.database },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::transport(e.to_string()))?;
        let size = text.len() as u64;

        if !(200..300).contains(&status) {
            return Err(CallError::http(status, truncate(&text)));
        }

        let payload: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        if payload.get("type").and_then(Value::as_str) == Some("error") {
            return Err(CallError::http(status, truncate(&text)));
        }

        Ok((status, payload, size))
    }

    async fn call(&self, statement: String) -> CallResult {
        let (status, _, size) = self.execute(statement).await?;
        Ok(CallResponse {
            status,
            payload_bytes: Some(size),
        })
    }
}

#[async_trait]
impl KnowledgeBaseTarget for HttpTarget {
    async fn create(&self) -> CallResult {
        self.call(self.statements.create()).await
    }

    async fn insert(&self, record: &IngestRecord) -> CallResult {
        self.call(self.statements.insert(record)).await
    }

    async fn search(&self, query: &SearchQuery) -> CallResult {
        self.call(self.statements.search(query)).await
    }

    async fn delete(&self) -> CallResult {
        self.call(self.statements.delete()).await
    }

    async fn row_count(&self) -> Option<u64> {
        match self.execute(self.statements.row_count()).await {
            Ok((_, payload, _)) => payload.pointer("/data/0/0").and_then(Value::as_u64),
            Err(err) => {
                debug!(status = %err.status, "Row count query failed: {}", err.message);
                None
            }
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
