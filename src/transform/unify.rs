//! Lock-step unification of several csv files.
//!
//! Every file of a unify tool describes one metric for a set of
//! identifiers, e.g. `disk_IOPS.csv` and `disk_Wait_Time_msec.csv` both
//! carry columns for `sda`, `sdb`. One row is read from every file that
//! still has rows, and the cells are routed into one document per
//! identifier:
//!
//! ```text
//! {"@timestamp": ..., "@metadata": ...,
//!  "iostat": {"disk": {"id": "sda", "iops": {"read": "5", "write": "6"}, "wtime": {...}}}}
//! ```
//!
//! Files may have different row counts. A file that runs out simply stops
//! contributing; identifiers that only it carried stop producing documents.
//! When the row timestamps of the files disagree the first file's timestamp
//! is used and the mismatch is counted.

use std::collections::{BTreeSet, VecDeque};

use serde_json::{Map, Value};
use tracing::debug;

use super::{SourceContext, Sourced};
use crate::counters::{Counter, Counters};
use crate::fields::{map_header, ColumnMap, IdentifierCatalog};
use crate::identity::document_id;
use crate::locator::DataFile;
use crate::models::stamped;
use crate::timestamp::{format_ts, parse_epoch_millis};

/// A file taking part in the merge.
struct Participant {
    file: usize,
    class: String,
    metric: String,
    columns: ColumnMap,
    identifiers: BTreeSet<usize>,
}

pub struct Unify<'a> {
    ctx: SourceContext<'a>,
    files: &'a mut [DataFile],
    counters: &'a mut Counters,
    catalog: IdentifierCatalog,
    participants: Vec<Participant>,
    pending: VecDeque<Sourced>,
    done: bool,
}

impl<'a> Unify<'a> {
    pub fn new(ctx: SourceContext<'a>, files: &'a mut [DataFile], counters: &'a mut Counters) -> Self {
        let mut catalog = IdentifierCatalog::new();
        let mut participants = Vec::new();
        for (idx, file) in files.iter_mut().enumerate() {
            let (Some(record), Some(header)) = (file.record, file.header()) else {
                file.finish();
                continue;
            };
            let rec = &ctx.handler.records[record];
            match map_header(rec, header, &file.basename, &mut catalog, counters) {
                Some(columns) => {
                    let identifiers = columns.identifiers().collect();
                    participants.push(Participant {
                        file: idx,
                        class: rec.class.clone(),
                        metric: rec.metric.clone(),
                        columns,
                        identifiers,
                    });
                }
                None => file.finish(),
            }
        }
        debug!(
            tool = ctx.tool,
            files = participants.len(),
            identifiers = catalog.len(),
            "Unifying csv files"
        );
        Self {
            ctx,
            files,
            counters,
            catalog,
            participants,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// Read one row from every live participant. Empty once all are exhausted.
    fn read_row_set(&mut self) -> Vec<(usize, Vec<String>)> {
        let mut rows = Vec::new();
        for (p, part) in self.participants.iter().enumerate() {
            if let Some(row) = self.files[part.file].next_row(self.counters) {
                rows.push((p, row));
            }
        }
        rows
    }

    /// Turn one row set into documents, queued on `pending`.
    fn unify_row_set(&mut self, rows: Vec<(usize, Vec<String>)>) {
        let first = rows[0].1.first().cloned().unwrap_or_default();
        if rows
            .iter()
            .any(|(_, row)| row.first().map(String::as_str) != Some(first.as_str()))
        {
            debug!(tool = self.ctx.tool, "Inconsistent timestamps across csv files");
            self.counters.incr(Counter::InconsistentTimestampsAcrossCsvFiles);
        }
        let Some(ts) = parse_epoch_millis(&first) else {
            debug!(tool = self.ctx.tool, value = first.as_str(), "Invalid csv timestamp");
            self.counters.incr(Counter::InvalidTimestamp);
            return;
        };
        self.ctx.window.check(&ts, self.counters);
        let ts_str = format_ts(&ts);

        // Identifiers and classes of the files contributing to this row set.
        let mut live: BTreeSet<usize> = BTreeSet::new();
        let mut classes: Vec<&str> = Vec::new();
        for (p, _) in &rows {
            let part = &self.participants[*p];
            live.extend(part.identifiers.iter().copied());
            if !classes.contains(&part.class.as_str()) {
                classes.push(&part.class);
            }
        }

        let mut docs: Vec<Option<Map<String, Value>>> = vec![None; self.catalog.len()];
        for &id in &live {
            let mut tool = Map::new();
            for class in &classes {
                let mut entry = Map::new();
                entry.insert("id".to_string(), Value::String(self.catalog.name(id).to_string()));
                for (k, v) in self.catalog.metadata(id) {
                    entry.insert(k.clone(), v.clone());
                }
                tool.insert(class.to_string(), Value::Object(entry));
            }
            docs[id] = Some(tool);
        }

        for (p, row) in &rows {
            let part = &self.participants[*p];
            if row.len() > part.columns.width() {
                self.counters.incr(Counter::RowWiderThanHeader);
            }
            for (col, cell) in row.iter().enumerate().skip(1) {
                let Some(target) = part.columns.target(col) else {
                    continue;
                };
                let Some(tool) = docs[target.identifier].as_mut() else {
                    continue;
                };
                let Some(Value::Object(class)) = tool.get_mut(&part.class) else {
                    continue;
                };
                let value = Value::String(cell.clone());
                match &target.subfield {
                    Some(sub) => {
                        let slot = class
                            .entry(part.metric.clone())
                            .or_insert_with(|| Value::Object(Map::new()));
                        if !slot.is_object() {
                            *slot = Value::Object(Map::new());
                        }
                        if let Value::Object(m) = slot {
                            m.insert(sub.clone(), value);
                        }
                    }
                    None => {
                        class.insert(part.metric.clone(), value);
                    }
                }
            }
        }

        for tool in docs.into_iter().flatten() {
            let mut doc = stamped(ts_str.clone(), self.ctx.metadata);
            doc.insert(self.ctx.tool.to_string(), Value::Object(tool));
            let doc = Value::Object(doc);
            let id = document_id(&doc);
            self.pending.push_back((doc, id));
        }
    }
}

impl Iterator for Unify<'_> {
    type Item = Sourced;

    fn next(&mut self) -> Option<Sourced> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            let rows = self.read_row_set();
            if rows.is_empty() {
                self.done = true;
                continue;
            }
            self.unify_row_set(rows);
        }
    }
}
