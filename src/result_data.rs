//! `result.json` files → result-data documents.

use serde_json::Value;
use tracing::warn;

use crate::archive::RunArchive;
use crate::counters::{Counter, Counters};
use crate::identity::document_id;
use crate::models::{metadata_value, RunMetadata};
use crate::transform::Sourced;

/// Convert `{date, value}` time-series values to floats, in place.
///
/// Arrays whose first element is an object carrying both `date` and
/// `value` are treated as time series; everything else is walked
/// recursively. Values that do not parse as numbers are left alone.
pub fn convert_to_float(value: &mut Value) {
    match value {
        Value::Object(map) => map.values_mut().for_each(convert_to_float),
        Value::Array(items) => {
            let is_series = items
                .first()
                .and_then(Value::as_object)
                .map(|o| o.contains_key("date") && o.contains_key("value"))
                .unwrap_or(false);
            if !is_series {
                items.iter_mut().for_each(convert_to_float);
                return;
            }
            for item in items.iter_mut() {
                let Some(v) = item.get_mut("value") else {
                    continue;
                };
                let parsed = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                if let Some(f) = parsed.and_then(serde_json::Number::from_f64) {
                    *v = Value::Number(f);
                }
            }
        }
        _ => {}
    }
}

pub struct ResultData {
    metadata: Value,
    timestamp: String,
    paths: Vec<std::path::PathBuf>,
    counters: Counters,
}

impl ResultData {
    pub fn new(archive: &RunArchive) -> Self {
        let run = RunMetadata {
            runtstamp: archive.start_run().to_string(),
            runid: archive.run_id().to_string(),
            experiment: archive.experiment().to_string(),
        };
        let paths = archive
            .members()
            .iter()
            .filter(|m| m.is_file() && m.basename() == "result.json")
            .map(|m| archive.path_of(&m.name))
            .collect();
        Self {
            metadata: metadata_value(&run),
            timestamp: archive.start_run().to_string(),
            paths,
            counters: Counters::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        "ResultData"
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn absorb(&mut self, other: &Counters) {
        self.counters.merge(other);
    }

    /// Lazily read every `result.json`.
    pub fn make_source(&mut self) -> impl Iterator<Item = Sourced> + '_ {
        let metadata = &self.metadata;
        let timestamp = &self.timestamp;
        let counters = &mut self.counters;
        self.paths.iter().filter_map(move |path| {
            let text = match std::fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), "Unreadable JSON file: {}", e);
                    counters.incr(Counter::UnreadableJsonFile);
                    return None;
                }
            };
            let mut results: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), "Invalid JSON file: {}", e);
                    counters.incr(Counter::NotValidJsonFile);
                    return None;
                }
            };
            convert_to_float(&mut results);
            let mut doc = serde_json::Map::new();
            doc.insert("results".to_string(), results);
            doc.insert("@metadata".to_string(), metadata.clone());
            doc.insert("@timestamp".to_string(), Value::String(timestamp.clone()));
            let doc = Value::Object(doc);
            let id = document_id(&doc);
            Some((doc, id))
        })
    }
}
