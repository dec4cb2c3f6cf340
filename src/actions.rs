//! Wrapping documents into create actions addressed to an index.
//!
//! | Documents | Index | Type |
//! |-----------|-------|------|
//! | tool data | `<prefix>.tool-data-<tool>.<YYYY-MM-DD>` | `pbench-tool-data-<tool>` |
//! | result data | `<prefix>.result-data.<YYYY-MM-DD>` | `pbench-result-data` |
//! | run | `<prefix>.run.<YYYY-MM>` | `pbench-run` |
//! | table of contents | `<prefix>.run.<YYYY-MM>` | `pbench-run-toc-entry` |
//!
//! Daily indices take their day from the document's own `@timestamp`.

use serde_json::Value;
use tracing::warn;

use crate::counters::{Counter, Counters};
use crate::models::Action;
use crate::timestamp::day_bucket;

pub const RUN_DOC_TYPE: &str = "pbench-run";
pub const TOC_DOC_TYPE: &str = "pbench-run-toc-entry";
pub const RESULT_DOC_TYPE: &str = "pbench-result-data";

#[derive(Debug, Clone)]
pub struct ActionBuilder {
    prefix: String,
}

impl ActionBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Monthly run index for a run started in `year`-`month`.
    pub fn run_index(&self, year: i32, month: u32) -> String {
        format!("{}.run.{:04}-{:02}", self.prefix, year, month)
    }

    pub fn run(&self, year: i32, month: u32, run_id: &str, source: Value) -> Action {
        Action::create(
            self.run_index(year, month),
            RUN_DOC_TYPE.to_string(),
            run_id.to_string(),
            source,
        )
    }

    pub fn toc(&self, year: i32, month: u32, run_id: &str, id: String, source: Value) -> Action {
        Action::create(self.run_index(year, month), TOC_DOC_TYPE.to_string(), id, source)
            .with_parent(run_id)
    }

    pub fn tool_data(&self, tool: &str, source: Value, id: String, counters: &mut Counters) -> Option<Action> {
        let day = routing_day(&source, counters)?;
        Some(Action::create(
            format!("{}.tool-data-{}.{}", self.prefix, tool, day),
            format!("pbench-tool-data-{}", tool),
            id,
            source,
        ))
    }

    pub fn result_data(&self, source: Value, id: String, counters: &mut Counters) -> Option<Action> {
        let day = routing_day(&source, counters)?;
        Some(Action::create(
            format!("{}.result-data.{}", self.prefix, day),
            RESULT_DOC_TYPE.to_string(),
            id,
            source,
        ))
    }
}

fn routing_day(source: &Value, counters: &mut Counters) -> Option<String> {
    match source.get("@timestamp").and_then(Value::as_str) {
        Some(ts) => Some(day_bucket(ts).to_string()),
        None => {
            warn!("Document without a string @timestamp cannot be routed");
            counters.incr(Counter::UnroutableTimestamp);
            None
        }
    }
}
