//! One document per csv row.
//!
//! Used for tools whose files each describe a single entity named by the
//! file itself (mpstat writes `cpu0_cpu_busy.csv`, `cpu1_cpu_busy.csv`, ...).
//! The identifier comes from the file name, never from the header.

use serde_json::{Map, Value};
use tracing::debug;

use super::{SourceContext, Sourced};
use crate::counters::{Counter, Counters};
use crate::fields::check_sentinel;
use crate::identity::document_id;
use crate::locator::DataFile;
use crate::models::stamped;
use crate::timestamp::{format_ts, parse_epoch_millis};

/// The file currently being read.
struct Active {
    file: usize,
    class: String,
    metric: String,
    id: String,
    header: Vec<String>,
}

pub struct Individual<'a> {
    ctx: SourceContext<'a>,
    files: &'a mut [DataFile],
    counters: &'a mut Counters,
    next_file: usize,
    active: Option<Active>,
}

impl<'a> Individual<'a> {
    pub fn new(ctx: SourceContext<'a>, files: &'a mut [DataFile], counters: &'a mut Counters) -> Self {
        Self {
            ctx,
            files,
            counters,
            next_file: 0,
            active: None,
        }
    }

    /// Advance to the next usable file.
    fn open_next(&mut self) -> Option<Active> {
        while self.next_file < self.files.len() {
            let idx = self.next_file;
            self.next_file += 1;
            let file = &mut self.files[idx];
            let Some(record) = file.record else {
                file.finish();
                continue;
            };
            let rec = &self.ctx.handler.records[record];
            let Some(id) = rec.file_identifier(&file.basename) else {
                debug!(file = %file.basename, "No identifier in file name");
                self.counters.incr(Counter::FilenameWithoutIdentifier);
                file.finish();
                continue;
            };
            let header = file.header().map(<[String]>::to_vec).unwrap_or_default();
            if !check_sentinel(&header, &file.basename, self.counters) {
                file.finish();
                continue;
            }
            return Some(Active {
                file: idx,
                class: rec.class.clone(),
                metric: rec.metric.clone(),
                id,
                header,
            });
        }
        None
    }

    fn build(&mut self, active: &Active, row: Vec<String>) -> Option<Sourced> {
        let raw_ts = row.first().map(String::as_str).unwrap_or("");
        let Some(ts) = parse_epoch_millis(raw_ts) else {
            self.counters.incr(Counter::InvalidTimestamp);
            return None;
        };
        self.ctx.window.check(&ts, self.counters);
        if row.len() > active.header.len() {
            self.counters.incr(Counter::RowWiderThanHeader);
        }

        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(active.id.clone()));
        for (column, value) in active.header.iter().zip(row.iter()).skip(1) {
            fields.insert(column.clone(), Value::String(value.clone()));
        }
        let mut metric = Map::new();
        metric.insert(active.metric.clone(), Value::Object(fields));

        let mut doc = stamped(format_ts(&ts), self.ctx.metadata);
        doc.insert(active.class.clone(), Value::Object(metric));
        let doc = Value::Object(doc);
        let id = document_id(&doc);
        Some((doc, id))
    }
}

impl Iterator for Individual<'_> {
    type Item = Sourced;

    fn next(&mut self) -> Option<Sourced> {
        loop {
            let active = match self.active.take() {
                Some(a) => a,
                None => self.open_next()?,
            };
            let row = self.files[active.file].next_row(self.counters);
            match row {
                Some(row) => {
                    let out = self.build(&active, row);
                    self.active = Some(active);
                    if out.is_some() {
                        return out;
                    }
                }
                // file exhausted; `active` is dropped and the next file opened
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use crate::transform::testutil::{metadata, window};
    use std::fs;
    use tempfile::TempDir;

    fn run(names_and_bodies: &[(&str, &str)], counters: &mut Counters) -> Vec<Value> {
        let tmp = TempDir::new().unwrap();
        let mut files = Vec::new();
        for (name, body) in names_and_bodies {
            let path = tmp.path().join(name);
            fs::write(&path, body).unwrap();
            files.push(DataFile::open_csv(path, 0, counters).unwrap());
        }
        let reg = HandlerRegistry::standard().unwrap();
        let md = metadata();
        let ctx = SourceContext {
            tool: "mpstat",
            handler: reg.classify("mpstat").unwrap(),
            metadata: &md,
            window: window(),
        };
        Individual::new(ctx, &mut files, counters).map(|(doc, _)| doc).collect()
    }

    #[test]
    fn one_document_per_row() {
        let mut counters = Counters::new();
        let docs = run(
            &[
                ("cpu0_cpu_busy.csv", "timestamp_ms,usr,sys\n1709251200000,10,2\n1709251201000,11,3\n"),
                ("cpu1_cpu_busy.csv", "timestamp_ms,usr,sys\n1709251200000,20,4\n"),
            ],
            &mut counters,
        );
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["mpstat"]["cpu"]["id"], "cpu0");
        assert_eq!(docs[0]["mpstat"]["cpu"]["usr"], "10");
        assert_eq!(docs[1]["@timestamp"], "2024-03-01T00:00:01.000000");
        assert_eq!(docs[1]["mpstat"]["cpu"]["sys"], "3");
        assert_eq!(docs[2]["mpstat"]["cpu"]["id"], "cpu1");
        assert_eq!(docs[2]["@metadata"]["host"], "h1");
        assert!(counters.is_empty());
    }

    #[test]
    fn file_without_identifier_is_skipped_whole() {
        let mut counters = Counters::new();
        let docs = run(
            &[
                ("memory.csv", "timestamp_ms,x\n1709251200000,1\n"),
                ("cpu2_cpu_idle.csv", "timestamp_ms,idle\n1709251200000,90\n"),
            ],
            &mut counters,
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["mpstat"]["cpu"]["id"], "cpu2");
        assert_eq!(counters.get(Counter::FilenameWithoutIdentifier), 1);
    }

    #[test]
    fn header_sentinel_enforced() {
        let mut counters = Counters::new();
        let docs = run(&[("cpu0_cpu_busy.csv", "ts,usr\n1709251200000,10\n")], &mut counters);
        assert!(docs.is_empty());
        assert_eq!(counters.total(), 1);
        assert_eq!(counters.get(Counter::FirstColumnNotTimestampMs), 1);
    }
}
