//! Workload definition: the shared catalog of records and queries
//!
//! Records and queries are loaded once and never mutated. Virtual users pick
//! the next item through per-catalog atomic cursors, so no lock is held on
//! the hot path and every user cycles through the whole set before reuse.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use kbload_core::{HarnessError, HarnessResult, KnowledgeBaseConfig, LoadConfig, WorkloadConfig};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// One record to ingest, columns in insert order.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRecord {
    /// `(column, value)`; `None` when the source record lacks the column.
    pub fields: Vec<(String, Option<String>)>,
    /// Encoded size of the content columns.
    pub content_bytes: u64,
}

/// One search request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
}

/// Next unit of work handed to a virtual user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkloadItem<'a> {
    Record(&'a IngestRecord),
    Query(&'a SearchQuery),
}

/// Read-only task catalog shared by all virtual users.
#[derive(Debug)]
pub struct Workload {
    records: Vec<IngestRecord>,
    queries: Vec<SearchQuery>,
    record_cursor: AtomicUsize,
    query_cursor: AtomicUsize,
    insert_weight: u32,
    search_weight: u32,
    data_volume_bytes: u64,
}

impl Workload {
    /// Build a workload from in-memory items.
    pub fn new(
        records: Vec<IngestRecord>,
        queries: Vec<SearchQuery>,
        insert_weight: u32,
        search_weight: u32,
    ) -> HarnessResult<Self> {
        let insert_weight = if records.is_empty() { 0 } else { insert_weight };
        let search_weight = if queries.is_empty() { 0 } else { search_weight };

        if insert_weight == 0 && search_weight == 0 {
            return Err(HarnessError::config(
                "workload has no runnable tasks: records and queries are empty or weighted zero",
            ));
        }

        let data_volume_bytes = records.iter().map(|r| r.content_bytes).sum();

        Ok(Self {
            records,
            queries,
            record_cursor: AtomicUsize::new(0),
            query_cursor: AtomicUsize::new(0),
            insert_weight,
            search_weight,
            data_volume_bytes,
        })
    }

    /// Load the dataset and query files named in the configuration.
    pub fn load(
        workload: &WorkloadConfig,
        load: &LoadConfig,
        kb: &KnowledgeBaseConfig,
    ) -> HarnessResult<Self> {
        let records = load_records(&workload.dataset_path, workload.data_size, kb)?;
        let queries = load_queries(&workload.queries_path)?;

        let workload = Self::new(records, queries, load.insert_weight, load.search_weight)?;
        info!(
            records = workload.records.len(),
            queries = workload.queries.len(),
            data_volume_mb = format!("{:.2}", workload.data_volume_mb()),
            "Workload loaded"
        );
        Ok(workload)
    }

    /// Pick the next item: kind by weight, item by cursor.
    pub fn next_item<R: Rng>(&self, rng: &mut R) -> WorkloadItem<'_> {
        let total = self.insert_weight + self.search_weight;
        let roll = rng.gen_range(0..total);

        if roll < self.insert_weight {
            WorkloadItem::Record(self.next_record())
        } else {
            WorkloadItem::Query(self.next_query())
        }
    }

    fn next_record(&self) -> &IngestRecord {
        let i = self.record_cursor.fetch_add(1, Ordering::Relaxed);
        &self.records[i % self.records.len()]
    }

    fn next_query(&self) -> &SearchQuery {
        let i = self.query_cursor.fetch_add(1, Ordering::Relaxed);
        &self.queries[i % self.queries.len()]
    }

    pub fn records(&self) -> &[IngestRecord] {
        &self.records
    }

    pub fn queries(&self) -> &[SearchQuery] {
        &self.queries
    }

    pub fn data_volume_mb(&self) -> f64 {
        self.data_volume_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Load up to `limit` records from a JSON array file.
pub fn load_records(
    path: &Path,
    limit: usize,
    kb: &KnowledgeBaseConfig,
) -> HarnessResult<Vec<IngestRecord>> {
    let text = read_text(path)?;
    let values: Vec<Value> = serde_json::from_str(&text)
        .map_err(|e| HarnessError::workload(path, format!("expected a JSON array: {e}")))?;

    let columns: Vec<&String> = kb
        .content_columns
        .iter()
        .chain(kb.metadata_columns.iter())
        .collect();

    let mut records = Vec::with_capacity(values.len().min(limit));
    let mut skipped = 0usize;

    for value in values.into_iter().take(limit) {
        let Value::Object(object) = value else {
            skipped += 1;
            continue;
        };

        let fields = columns
            .iter()
            .map(|column| ((*column).clone(), object.get(column.as_str()).map(value_text)))
            .collect::<Vec<_>>();

        let content_bytes = fields
            .iter()
            .take(kb.content_columns.len())
            .filter_map(|(_, v)| v.as_deref())
            .map(utf16_size)
            .sum();

        records.push(IngestRecord {
            fields,
            content_bytes,
        });
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped dataset entries that are not JSON objects");
    }

    Ok(records)
}

/// Load search queries from a JSON array file.
pub fn load_queries(path: &Path) -> HarnessResult<Vec<SearchQuery>> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| HarnessError::workload(path, e.to_string()))
}

/// Read a file as text, honouring UTF-16 and UTF-8 byte-order marks.
fn read_text(path: &Path) -> HarnessResult<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| HarnessError::workload(path, format!("cannot read file: {e}")))?;
    decode_text(&bytes).map_err(|message| HarnessError::workload(path, message))
}

fn decode_text(bytes: &[u8]) -> Result<String, String> {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => {
            String::from_utf8(rest.to_vec()).map_err(|e| format!("invalid UTF-8: {e}"))
        }
        _ => String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid UTF-8: {e}")),
    }
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err("truncated UTF-16 input".to_string());
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| format!("invalid UTF-16: {e}"))
}

/// UTF-16 encoded size including the 2-byte BOM, the way the dataset is stored.
fn utf16_size(text: &str) -> u64 {
    2 + 2 * text.encode_utf16().count() as u64
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
