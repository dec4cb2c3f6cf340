//! Recoverable-condition bookkeeping.
//!
//! Every unit of work (the run document, each `ToolData`, the result data)
//! owns one [`Counters`] context. Transformers increment it when they skip
//! a row, record or file. At the end of a run the contexts are gathered
//! into an [`IndexReport`] so that silent data loss shows up in the output
//! even when indexing as a whole succeeded.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A recoverable condition that caused data to be skipped or flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    FirstColumnNotTimestampMs,
    ColumnHeaderNotMatched,
    ColumnSubfieldsDoNotMatchHandler,
    ExpectedColumnMetadataNotFound,
    InconsistentTimestampsAcrossCsvFiles,
    InvalidTimestamp,
    RowWiderThanHeader,
    ToolTsBeforeStartRunTs,
    ToolTsAfterEndRunTs,
    CsvFileWithoutHandler,
    CsvFileWithoutHeader,
    UnreadableCsvFile,
    FilenameWithoutIdentifier,
    BadJsonFile,
    JsonRecordNotObject,
    JsonDocMissingTimestamp,
    JsonDocTimestampNotValidated,
    MalformedStdoutFile,
    UnreadableJsonFile,
    NotValidJsonFile,
    UnroutableTimestamp,
    SosreportNotExpanded,
}

impl Counter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::FirstColumnNotTimestampMs => "first_column_not_timestamp_ms",
            Counter::ColumnHeaderNotMatched => "column_header_not_matched",
            Counter::ColumnSubfieldsDoNotMatchHandler => "column_subfields_do_not_match_handler",
            Counter::ExpectedColumnMetadataNotFound => "expected_column_metadata_not_found",
            Counter::InconsistentTimestampsAcrossCsvFiles => {
                "inconsistent_timestamps_across_csv_files"
            }
            Counter::InvalidTimestamp => "invalid_timestamp",
            Counter::RowWiderThanHeader => "row_wider_than_header",
            Counter::ToolTsBeforeStartRunTs => "tool_ts_before_start_run_ts",
            Counter::ToolTsAfterEndRunTs => "tool_ts_after_end_run_ts",
            Counter::CsvFileWithoutHandler => "csv_file_without_handler",
            Counter::CsvFileWithoutHeader => "csv_file_without_header",
            Counter::UnreadableCsvFile => "unreadable_csv_file",
            Counter::FilenameWithoutIdentifier => "filename_without_identifier",
            Counter::BadJsonFile => "bad_json_file",
            Counter::JsonRecordNotObject => "json_record_not_object",
            Counter::JsonDocMissingTimestamp => "json_doc_missing_timestamp",
            Counter::JsonDocTimestampNotValidated => "json_doc_timestamp_not_validated",
            Counter::MalformedStdoutFile => "malformed_stdout_file",
            Counter::UnreadableJsonFile => "unreadable_json_file",
            Counter::NotValidJsonFile => "not_valid_json_file",
            Counter::UnroutableTimestamp => "unroutable_timestamp",
            Counter::SosreportNotExpanded => "sosreport_not_expanded",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit-of-work tally of recoverable conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    counts: BTreeMap<Counter, u64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, counter: Counter) {
        *self.counts.entry(counter).or_insert(0) += 1;
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts.get(&counter).copied().unwrap_or(0)
    }

    /// Sum over every counter.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn merge(&mut self, other: &Counters) {
        for (counter, n) in &other.counts {
            *self.counts.entry(*counter).or_insert(0) += n;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        self.counts.iter().map(|(c, n)| (*c, *n))
    }
}

impl Serialize for Counters {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (counter, n) in &self.counts {
            map.serialize_entry(counter.as_str(), n)?;
        }
        map.end()
    }
}

/// Counters of one unit of work, labelled for the report.
#[derive(Debug, Clone, Serialize)]
pub struct OpContext {
    pub object: String,
    pub counters: Counters,
}

/// End-of-run report of every context that recorded something.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct IndexReport {
    contexts: Vec<OpContext>,
}

impl IndexReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished context. Contexts sharing a label are folded together.
    pub fn push(&mut self, object: impl Into<String>, counters: &Counters) {
        let object = object.into();
        match self.contexts.iter_mut().find(|c| c.object == object) {
            Some(existing) => existing.counters.merge(counters),
            None => self.contexts.push(OpContext {
                object,
                counters: counters.clone(),
            }),
        }
    }

    pub fn contexts(&self) -> &[OpContext] {
        &self.contexts
    }

    /// True when at least one context recorded a condition.
    pub fn has_errors(&self) -> bool {
        self.contexts.iter().any(|c| !c.counters.is_empty())
    }

    /// Totals per counter across all contexts.
    pub fn totals(&self) -> Counters {
        let mut all = Counters::new();
        for ctx in &self.contexts {
            all.merge(&ctx.counters);
        }
        all
    }

    /// Pretty JSON of the contexts that recorded something.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let noisy: Vec<&OpContext> = self
            .contexts
            .iter()
            .filter(|c| !c.counters.is_empty())
            .collect();
        serde_json::to_string_pretty(&noisy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incr_and_get() {
        let mut c = Counters::new();
        assert!(c.is_empty());
        c.incr(Counter::BadJsonFile);
        c.incr(Counter::BadJsonFile);
        c.incr(Counter::InvalidTimestamp);
        assert_eq!(c.get(Counter::BadJsonFile), 2);
        assert_eq!(c.get(Counter::InvalidTimestamp), 1);
        assert_eq!(c.get(Counter::RowWiderThanHeader), 0);
        assert_eq!(c.total(), 3);
    }

    #[test]
    fn report_folds_same_object() {
        let mut a = Counters::new();
        a.incr(Counter::BadJsonFile);
        let mut b = Counters::new();
        b.incr(Counter::BadJsonFile);
        b.incr(Counter::JsonDocMissingTimestamp);

        let mut report = IndexReport::new();
        report.push("ToolData-prometheus-metrics", &a);
        report.push("ToolData-prometheus-metrics", &b);
        report.push("ResultData", &Counters::new());

        assert_eq!(report.contexts().len(), 2);
        assert!(report.has_errors());
        assert_eq!(report.totals().get(Counter::BadJsonFile), 2);
    }

    #[test]
    fn report_json_skips_quiet_contexts() {
        let mut a = Counters::new();
        a.incr(Counter::MalformedStdoutFile);
        let mut report = IndexReport::new();
        report.push("quiet", &Counters::new());
        report.push("ToolData-proc-vmstat", &a);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["object"], "ToolData-proc-vmstat");
        assert_eq!(arr[0]["counters"]["malformed_stdout_file"], 1);
    }
}
