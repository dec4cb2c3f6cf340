//! Core data models shared by the producers and the sinks.
//!
//! Documents themselves are plain `serde_json` values: their shape varies
//! per tool and is decided by the handler table, not by a Rust type.

use serde::Serialize;
use serde_json::{Map, Value};

/// Run-level context stamped on result-data documents and embedded in
/// [`ToolMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    pub runtstamp: String,
    pub runid: String,
    pub experiment: String,
}

/// Context stamped under `@metadata` on every tool-data document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolMetadata {
    #[serde(flatten)]
    pub run: RunMetadata,
    pub iteration: String,
    pub iterseqno: String,
    pub sample: String,
    pub host: String,
    pub toolgroup: String,
}

impl ToolMetadata {
    /// Build the context for one (iteration, sample, host, tool group).
    ///
    /// Iteration directories are named `<seqno>-<name>`; when there is no
    /// `-` both parts are the whole directory name.
    pub fn new(run: RunMetadata, iteration: &str, sample: &str, host: &str, toolgroup: &str) -> Self {
        let (iterseqno, itername) = iteration.split_once('-').unwrap_or((iteration, iteration));
        Self {
            run,
            iteration: itername.to_string(),
            iterseqno: iterseqno.to_string(),
            sample: sample.to_string(),
            host: host.to_string(),
            toolgroup: toolgroup.to_string(),
        }
    }
}

/// Serialize a metadata struct once so it can be cloned into each document.
pub fn metadata_value<T: Serialize>(metadata: &T) -> Value {
    serde_json::to_value(metadata).unwrap_or(Value::Null)
}

/// Start a document with its `@timestamp` and `@metadata` already set.
pub fn stamped(timestamp: String, metadata: &Value) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("@timestamp".to_string(), Value::String(timestamp));
    doc.insert("@metadata".to_string(), metadata.clone());
    doc
}

/// Bulk operation type. Only `create` exists: overwriting an existing id
/// would hide duplicates instead of reporting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Create,
}

/// An ingestion-ready document addressed to an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub op: OpType,
    pub index: String,
    pub doc_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub source: Value,
}

impl Action {
    pub fn create(index: String, doc_type: String, id: String, source: Value) -> Self {
        Self {
            op: OpType::Create,
            index,
            doc_type,
            id,
            parent: None,
            source,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Action line of the Elasticsearch bulk format.
    pub fn bulk_header(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), Value::String(self.index.clone()));
        meta.insert("_type".to_string(), Value::String(self.doc_type.clone()));
        meta.insert("_id".to_string(), Value::String(self.id.clone()));
        if let Some(parent) = &self.parent {
            meta.insert("parent".to_string(), Value::String(parent.clone()));
        }
        let mut header = Map::new();
        header.insert("create".to_string(), Value::Object(meta));
        Value::Object(header)
    }
}
