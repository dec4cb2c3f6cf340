//! Pre-built records (`<tool>/json/*`).
//!
//! Each file is a JSON array of objects that are already documents. The
//! only changes made are the `@timestamp` normalization and the
//! `@metadata` stamp.

use serde_json::Value;
use tracing::{debug, warn};

use super::{SourceContext, Sourced};
use crate::counters::{Counter, Counters};
use crate::identity::document_id;
use crate::locator::DataFile;
use crate::timestamp::{format_ts, from_epoch_seconds};

struct Active {
    basename: String,
    records: std::vec::IntoIter<Value>,
    missing_logged: bool,
}

pub struct JsonRecords<'a> {
    ctx: SourceContext<'a>,
    files: &'a mut [DataFile],
    counters: &'a mut Counters,
    next_file: usize,
    active: Option<Active>,
}

impl<'a> JsonRecords<'a> {
    pub fn new(ctx: SourceContext<'a>, files: &'a mut [DataFile], counters: &'a mut Counters) -> Self {
        Self {
            ctx,
            files,
            counters,
            next_file: 0,
            active: None,
        }
    }

    fn open_next(&mut self) -> Option<Active> {
        while self.next_file < self.files.len() {
            let file = &mut self.files[self.next_file];
            self.next_file += 1;
            file.finish();
            let parsed = std::fs::read_to_string(&file.path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()));
            match parsed {
                Ok(Value::Array(records)) => {
                    return Some(Active {
                        basename: file.basename.clone(),
                        records: records.into_iter(),
                        missing_logged: false,
                    })
                }
                Ok(_) => {
                    warn!(path = %file.path.display(), "Bad JSON file: not an array");
                    self.counters.incr(Counter::BadJsonFile);
                }
                Err(e) => {
                    warn!(path = %file.path.display(), "Bad JSON file: {}", e);
                    self.counters.incr(Counter::BadJsonFile);
                }
            }
        }
        None
    }

    fn build(&mut self, active: &mut Active, record: Value) -> Option<Sourced> {
        let Value::Object(mut doc) = record else {
            self.counters.incr(Counter::JsonRecordNotObject);
            return None;
        };
        let Some(ts) = doc.get("@timestamp") else {
            if !active.missing_logged {
                active.missing_logged = true;
                warn!(file = %active.basename, "JSON records with missing @timestamp");
            }
            self.counters.incr(Counter::JsonDocMissingTimestamp);
            return None;
        };
        match ts.as_f64().and_then(from_epoch_seconds) {
            Some(parsed) => {
                doc.insert("@timestamp".to_string(), Value::String(format_ts(&parsed)));
            }
            None => {
                debug!(file = %active.basename, "Passing @timestamp through unvalidated");
                self.counters.incr(Counter::JsonDocTimestampNotValidated);
            }
        }
        doc.insert("@metadata".to_string(), self.ctx.metadata.clone());
        let doc = Value::Object(doc);
        let id = document_id(&doc);
        Some((doc, id))
    }
}

impl Iterator for JsonRecords<'_> {
    type Item = Sourced;

    fn next(&mut self) -> Option<Sourced> {
        loop {
            let mut active = match self.active.take() {
                Some(a) => a,
                None => self.open_next()?,
            };
            let Some(record) = active.records.next() else {
                continue;
            };
            let out = self.build(&mut active, record);
            self.active = Some(active);
            if out.is_some() {
                return out;
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

    fn run(bodies: &[&str], counters: &mut Counters) -> Vec<Value> {
        let tmp = TempDir::new().unwrap();
        let mut files = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            let path = tmp.path().join(format!("{}.json", i));
            fs::write(&path, body).unwrap();
            files.push(DataFile::pending(path, None));
        }
        let reg = HandlerRegistry::standard().unwrap();
        let md = metadata();
        let ctx = SourceContext {
            tool: "prometheus-metrics",
            handler: reg.classify("prometheus-metrics").unwrap(),
            metadata: &md,
            window: window(),
        };
        JsonRecords::new(ctx, &mut files, counters).map(|(doc, _)| doc).collect()
    }

    #[test]
    fn epoch_seconds_are_normalized() {
        let mut counters = Counters::new();
        let docs = run(
            &[r#"[{"@timestamp": 1700000000.25, "value": 3}, {"@timestamp": "2024-03-01T00:00:00.000000", "value": 4}]"#],
            &mut counters,
        );
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["@timestamp"], "2023-11-14T22:13:20.250000");
        assert_eq!(docs[0]["value"], 3);
        assert_eq!(docs[0]["@metadata"]["runid"], "run1");
        assert_eq!(docs[1]["@timestamp"], "2024-03-01T00:00:00.000000");
        assert_eq!(counters.get(Counter::JsonDocTimestampNotValidated), 1);
    }

    #[test]
    fn missing_timestamps_are_counted_not_synthesized() {
        let mut counters = Counters::new();
        let docs = run(
            &[r#"[{"value": 1}, {"value": 2}, {"@timestamp": 1700000000, "value": 3}, 7]"#],
            &mut counters,
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["value"], 3);
        assert_eq!(counters.get(Counter::JsonDocMissingTimestamp), 2);
        assert_eq!(counters.get(Counter::JsonRecordNotObject), 1);
    }

    #[test]
    fn bad_files_are_skipped() {
        let mut counters = Counters::new();
        let docs = run(
            &["{not json", r#"{"an": "object"}"#, r#"[{"@timestamp": 1700000000}]"#],
            &mut counters,
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(counters.get(Counter::BadJsonFile), 2);
    }
}
