//! Document sinks.
//!
//! A sink receives batches of [`Action`]s and stores each document under
//! its `(index, id)` key. Every sink is create-only: submitting an id that
//! already exists in the same index leaves the stored document alone and
//! reports [`SubmitOutcome::Duplicate`]. Because ids are content hashes,
//! re-indexing a run never produces a second copy of a document.
//!
//! ```text
//!  ingest ──batch──▶ DocumentSink::submit ──▶ [SubmitOutcome; batch.len()]
//!                        │
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//!   MemorySink     JsonLinesSink      SqliteSink
//!   (tests)        (bulk NDJSON)      (documents table)
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::{Config, SinkKind};
use crate::db;
use crate::migrate;
use crate::models::Action;

// ═══════════════════════════════════════════════════════════════════════
// Sink Trait
// ═══════════════════════════════════════════════════════════════════════

/// Result of submitting one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SubmitOutcome {
    Created,
    /// The `(index, id)` pair was already stored.
    Duplicate,
    Failed(String),
}

/// Destination of indexing actions.
///
/// `submit` returns one outcome per action, in order. An `Err` means the
/// sink itself is unusable (I/O failure, lost connection), not that a
/// single document was rejected.
#[async_trait]
pub trait DocumentSink: Send {
    /// Short name for summaries, e.g. `"sqlite"`.
    fn name(&self) -> &str;

    async fn submit(&mut self, actions: &[Action]) -> Result<Vec<SubmitOutcome>>;
}

/// Open the sink named by `[sink]` in the configuration.
pub async fn open_sink(config: &Config) -> Result<Box<dyn DocumentSink>> {
    Ok(match config.sink.kind {
        SinkKind::Memory => Box::new(MemorySink::new()),
        SinkKind::Jsonl => Box::new(JsonLinesSink::open(&config.sink.path)?),
        SinkKind::Sqlite => Box::new(SqliteSink::open(config).await?),
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Memory
// ═══════════════════════════════════════════════════════════════════════

/// Keeps every created document in memory, keyed by `(index, id)`.
#[derive(Debug, Default)]
pub struct MemorySink {
    docs: BTreeMap<(String, String), Action>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, index: &str, id: &str) -> Option<&Action> {
        self.docs.get(&(index.to_string(), id.to_string()))
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.docs.values()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit(&mut self, actions: &[Action]) -> Result<Vec<SubmitOutcome>> {
        Ok(actions
            .iter()
            .map(|action| {
                let key = (action.index.clone(), action.id.clone());
                if self.docs.contains_key(&key) {
                    SubmitOutcome::Duplicate
                } else {
                    self.docs.insert(key, action.clone());
                    SubmitOutcome::Created
                }
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// JSON lines (Elasticsearch bulk format)
// ═══════════════════════════════════════════════════════════════════════

/// Appends created documents to a file in the Elasticsearch bulk format:
/// a `{"create": {...}}` line followed by the document line.
///
/// Ids already present in the file when it is opened count as stored, so
/// appending the same run twice adds nothing.
pub struct JsonLinesSink {
    path: PathBuf,
    seen: HashSet<(String, String)>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let mut seen = HashSet::new();
        if path.exists() {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let Some(meta) = value.get("create") else {
                    continue;
                };
                if let (Some(index), Some(id)) = (
                    meta.get("_index").and_then(Value::as_str),
                    meta.get("_id").and_then(Value::as_str),
                ) {
                    seen.insert((index.to_string(), id.to_string()));
                }
            }
            debug!(path = %path.display(), existing = seen.len(), "Opened bulk file");
        }
        Ok(Self {
            path: path.to_path_buf(),
            seen,
        })
    }
}

#[async_trait]
impl DocumentSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn submit(&mut self, actions: &[Action]) -> Result<Vec<SubmitOutcome>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut out = std::io::BufWriter::new(file);
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let key = (action.index.clone(), action.id.clone());
            if self.seen.contains(&key) {
                outcomes.push(SubmitOutcome::Duplicate);
                continue;
            }
            let header = serde_json::to_string(&action.bulk_header())?;
            let source = serde_json::to_string(&action.source)?;
            writeln!(out, "{}", header)?;
            writeln!(out, "{}", source)?;
            self.seen.insert(key);
            outcomes.push(SubmitOutcome::Created);
        }
        out.flush()?;
        Ok(outcomes)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// SQLite
// ═══════════════════════════════════════════════════════════════════════

/// Stores documents in the `documents` table, primary key
/// `(index_name, id)`.
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Connect and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        migrate::run_migrations(config).await?;
        let pool = db::connect(config).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DocumentSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn submit(&mut self, actions: &[Action]) -> Result<Vec<SubmitOutcome>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let source = serde_json::to_string(&action.source)?;
            let result = sqlx::query(
                r#"
                INSERT INTO documents (index_name, id, doc_type, parent, source_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, id) DO NOTHING
                "#,
            )
            .bind(&action.index)
            .bind(&action.id)
            .bind(&action.doc_type)
            .bind(&action.parent)
            .bind(&source)
            .bind(now)
            .execute(&mut *tx)
            .await;
            outcomes.push(match result {
                Ok(r) if r.rows_affected() == 0 => SubmitOutcome::Duplicate,
                Ok(_) => SubmitOutcome::Created,
                Err(e) => SubmitOutcome::Failed(e.to_string()),
            });
        }
        tx.commit().await?;
        Ok(outcomes)
    }
}
