//! Column header → `(identifier, subfield)` mapping.
//!
//! A csv header looks like `timestamp_ms,sda-read,sda-write,sdb-read,...`.
//! The handler record's column rule pulls the identifier (`sda`) and the
//! optional subfield (`read`) out of every column after the first; the
//! metadata rule, if any, pulls extra fields out of the first column that
//! names a new identifier.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::counters::{Counter, Counters};
use crate::registry::{HandlerRecord, MetadataRule};

/// Required first column of every csv file.
pub const TIMESTAMP_COLUMN: &str = "timestamp_ms";

/// Identifiers discovered across the headers of one unification batch,
/// kept in first-seen order along with their metadata.
#[derive(Debug, Default)]
pub struct IdentifierCatalog {
    names: Vec<String>,
    index: HashMap<String, usize>,
    metadata: Vec<Map<String, Value>>,
}

impl IdentifierCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn metadata(&self, idx: usize) -> &Map<String, Value> {
        &self.metadata[idx]
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of `name`, inserting it if new. `metadata` is only evaluated
    /// for a new identifier, so the first column that names it wins.
    fn intern(&mut self, name: &str, metadata: impl FnOnce() -> Map<String, Value>) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.metadata.push(metadata());
        idx
    }
}

/// Where one csv column's values go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTarget {
    pub identifier: usize,
    pub subfield: Option<String>,
}

/// Per-column routing of one csv file, aligned with its header.
/// Index 0 (the timestamp) is always `None`.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    pub columns: Vec<Option<ColumnTarget>>,
}

impl ColumnMap {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn target(&self, col: usize) -> Option<&ColumnTarget> {
        self.columns.get(col).and_then(|c| c.as_ref())
    }

    /// Distinct identifiers this file has columns for.
    pub fn identifiers(&self) -> impl Iterator<Item = usize> + '_ {
        let mut seen = Vec::new();
        self.columns.iter().flatten().filter_map(move |t| {
            if seen.contains(&t.identifier) {
                None
            } else {
                seen.push(t.identifier);
                Some(t.identifier)
            }
        })
    }
}

/// Check the header sentinel. A file failing it is dropped by the caller;
/// this is the only counter touched for it.
pub fn check_sentinel(header: &[String], basename: &str, counters: &mut Counters) -> bool {
    match header.first() {
        Some(first) if first == TIMESTAMP_COLUMN => true,
        other => {
            debug!(
                file = basename,
                found = other.map(String::as_str).unwrap_or(""),
                "First csv column is not {}",
                TIMESTAMP_COLUMN
            );
            counters.incr(Counter::FirstColumnNotTimestampMs);
            false
        }
    }
}

/// Pull the declared metadata fields out of a column header.
///
/// Every declared field the header does not yield is counted; the fields
/// that were found are still returned.
pub fn extract_metadata(rule: &MetadataRule, column: &str, counters: &mut Counters) -> Map<String, Value> {
    let mut out = Map::new();
    let caps = rule.pattern.captures(column);
    for field in &rule.fields {
        match caps.as_ref().and_then(|c| c.name(field)) {
            Some(m) => {
                out.insert(field.clone(), Value::String(m.as_str().to_string()));
            }
            None => {
                debug!(column, field = field.as_str(), "Expected column metadata not found");
                counters.incr(Counter::ExpectedColumnMetadataNotFound);
            }
        }
    }
    out
}

/// Map a csv header onto identifiers of `catalog`.
///
/// Returns `None` when the header fails the sentinel check.
pub fn map_header(
    record: &HandlerRecord,
    header: &[String],
    basename: &str,
    catalog: &mut IdentifierCatalog,
    counters: &mut Counters,
) -> Option<ColumnMap> {
    if !check_sentinel(header, basename, counters) {
        return None;
    }
    let mut columns = Vec::with_capacity(header.len());
    columns.push(None);
    for col in &header[1..] {
        let (id, subfield) = match &record.column_rule {
            Some(rule) => match rule.pattern.captures(col) {
                Some(caps) => {
                    let id = caps.name("id").map(|m| m.as_str()).unwrap_or(col.as_str());
                    let sub = caps.name("subfield").map(|m| m.as_str().to_string());
                    (id.to_string(), sub)
                }
                None => {
                    debug!(file = basename, column = col.as_str(), "Column header not matched");
                    counters.incr(Counter::ColumnHeaderNotMatched);
                    columns.push(None);
                    continue;
                }
            },
            None => (col.clone(), None),
        };
        let subfield = match subfield {
            Some(s) if !record.subfields.contains(&s) => {
                debug!(file = basename, column = col.as_str(), subfield = s.as_str(), "Unexpected subfield");
                counters.incr(Counter::ColumnSubfieldsDoNotMatchHandler);
                None
            }
            other => other,
        };
        let identifier = catalog.intern(&id, || match &record.metadata_rule {
            Some(rule) => extract_metadata(rule, col, counters),
            None => Map::new(),
        });
        columns.push(Some(ColumnTarget { identifier, subfield }));
    }
    Some(ColumnMap { columns })
}
