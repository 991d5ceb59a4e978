//! Query-language statements sent to the knowledge-base service.

use kbload_core::KnowledgeBaseConfig;
use serde_json::Value;

use crate::workload::{IngestRecord, SearchQuery};

/// Builds the statements for one knowledge base.
#[derive(Debug, Clone)]
pub struct Statements {
    kb: KnowledgeBaseConfig,
}

impl Statements {
    pub fn new(kb: KnowledgeBaseConfig) -> Self {
        Self { kb }
    }

    /// `CREATE KNOWLEDGE_BASE`, reading the provider key from the configured variable.
    pub fn create(&self) -> String {
        let api_key = std::env::var(&self.kb.api_key_env).unwrap_or_default();
        self.create_with_key(&api_key)
    }

    fn create_with_key(&self, api_key: &str) -> String {
        let embedding = model_block(&self.kb.embedding_provider, &self.kb.embedding_model, api_key);
        let reranking = match &self.kb.reranking_model {
            Some(model) => model_block(&self.kb.embedding_provider, model, api_key),
            None => "false".to_string(),
        };

        format!(
            "CREATE KNOWLEDGE_BASE IF NOT EXISTS {} USING embedding_model = {}, reranking_model = {}, content_columns = {}, metadata_columns = {};",
            self.kb.name,
            embedding,
            reranking,
            column_list(&self.kb.content_columns),
            column_list(&self.kb.metadata_columns),
        )
    }

    pub fn insert(&self, record: &IngestRecord) -> String {
        let columns = record
            .fields
            .iter()
            .map(|(column, _)| column.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let values = record
            .fields
            .iter()
            .map(|(_, value)| match value {
                Some(v) => quote(v),
                None => "NULL".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!("INSERT INTO {} ({columns}) VALUES ({values});", self.kb.name)
    }

    pub fn search(&self, query: &SearchQuery) -> String {
        let mut statement = format!(
            "SELECT * FROM {} WHERE content = {}",
            self.kb.name,
            quote(&query.query)
        );
        for (column, value) in &query.filters {
            statement.push_str(&format!(" AND {column} = {}", literal(value)));
        }
        statement.push(';');
        statement
    }

    pub fn delete(&self) -> String {
        format!("DROP KNOWLEDGE_BASE {};", self.kb.name)
    }

    pub fn row_count(&self) -> String {
        format!("SELECT COUNT(*) AS row_cnt FROM {};", self.kb.name)
    }
}

fn model_block(provider: &str, model: &str, api_key: &str) -> String {
    serde_json::json!({
        "provider": provider,
        "model_name": model,
        "api_key": api_key,
    })
    .to_string()
}

fn column_list(columns: &[String]) -> String {
    let quoted = columns.iter().map(|c| quote(c)).collect::<Vec<_>>();
    format!("[{}]", quoted.join(", "))
}

/// Single-quoted string literal with embedded quotes doubled.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        other => quote(&other.to_string()),
    }
}
