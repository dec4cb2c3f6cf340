//! Handler registry: how each monitoring tool's output is laid out and
//! how it should be turned into documents.
//!
//! The table is declarative. Each known tool has a [`Prospectus`]
//! (file layout + transformation method) and a list of [`HandlerRecord`]s,
//! one per file-name pattern the tool emits. A record names the metric
//! class and metric the file describes, and carries the precompiled rules
//! used to pull identifiers, sub-fields and metadata out of column headers.
//!
//! ```text
//! iostat ─┬─ prospectus: csv / unify
//!         ├─ disk_IOPS\.csv        → disk.iops    (id)-(read|write)
//!         ├─ disk_Queue_Size\.csv  → disk.qsize   (id)
//!         └─ ...
//! ```
//!
//! Patterns are compiled once in [`HandlerRegistry::standard`] and anchored
//! at both ends.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{bail, Context, Result};
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════
// Prospectus
// ═══════════════════════════════════════════════════════════════════════

/// How a tool's files are laid out in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// `<tool>/csv/*.csv`, first column `timestamp_ms`.
    Csv,
    /// `<tool>/json/*`, each file an array of records.
    Json,
    /// `<tool>/<tool>-stdout.txt`.
    Stdout,
}

/// How a tool's files are turned into documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Unify,
    Individual,
    Json,
    PeriodicTimestampKeyValue,
}

impl fmt::Display for Handling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Handling::Csv => "csv",
            Handling::Json => "json",
            Handling::Stdout => "stdout",
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Unify => "unify",
            Method::Individual => "individual",
            Method::Json => "json",
            Method::PeriodicTimestampKeyValue => "periodic_timestamp_key_value",
        })
    }
}

/// A compatible (handling, method) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prospectus {
    handling: Handling,
    method: Method,
}

impl Prospectus {
    pub fn new(handling: Handling, method: Method) -> Result<Self> {
        let compatible = matches!(
            (handling, method),
            (Handling::Csv, Method::Unify)
                | (Handling::Csv, Method::Individual)
                | (Handling::Json, Method::Json)
                | (Handling::Stdout, Method::PeriodicTimestampKeyValue)
        );
        if !compatible {
            bail!("method '{}' cannot consume '{}' files", method, handling);
        }
        Ok(Self { handling, method })
    }

    pub fn handling(&self) -> Handling {
        self.handling
    }

    pub fn method(&self) -> Method {
        self.method
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Handler records
// ═══════════════════════════════════════════════════════════════════════

/// Extracts `(id, subfield)` from a column header.
#[derive(Debug, Clone)]
pub struct ColumnRule {
    pub pattern: Regex,
}

/// Extracts metadata fields from a column header.
///
/// `fields` is ordered; each entry is both the capture-group name and the
/// document field it populates.
#[derive(Debug, Clone)]
pub struct MetadataRule {
    pub pattern: Regex,
    pub fields: Vec<String>,
}

/// Handling instructions for one file pattern of one tool.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub file_pattern: Regex,
    pub class: String,
    pub metric: String,
    pub display: String,
    pub units: String,
    pub subfields: BTreeSet<String>,
    pub column_rule: Option<ColumnRule>,
    pub metadata_rule: Option<MetadataRule>,
}

impl HandlerRecord {
    pub fn matches_file(&self, basename: &str) -> bool {
        self.file_pattern.is_match(basename)
    }

    /// Identifier embedded in a file name (`(?P<id>...)` in the file pattern).
    pub fn file_identifier(&self, basename: &str) -> Option<String> {
        self.file_pattern
            .captures(basename)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str().to_string())
    }
}

/// Registry entry for an indexed tool.
#[derive(Debug, Clone)]
pub struct ToolHandler {
    pub name: String,
    pub prospectus: Prospectus,
    pub records: Vec<HandlerRecord>,
}

impl ToolHandler {
    /// Index of the first record whose file pattern matches `basename`.
    pub fn record_for(&self, basename: &str) -> Option<usize> {
        self.records.iter().position(|r| r.matches_file(basename))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Declarative table
// ═══════════════════════════════════════════════════════════════════════

struct RecordSpec {
    file: &'static str,
    class: &'static str,
    metric: &'static str,
    display: &'static str,
    units: &'static str,
    subfields: &'static [&'static str],
    column: Option<&'static str>,
    metadata: Option<(&'static str, &'static [&'static str])>,
}

struct ToolSpec {
    name: &'static str,
    prospectus: Option<(Handling, Method)>,
    records: &'static [RecordSpec],
}

const ID_ONLY: Option<&str> = Some(r"(?P<id>.+)");
const ID_READ_WRITE: Option<&str> = Some(r"(?P<id>.+)-(?P<subfield>read|write)");
const READ_WRITE: &[&str] = &["read", "write"];
const PID_COMMAND: Option<(&str, &[&str])> =
    Some((r"(?P<pid>.+?)-(?P<command>.+)", &["pid", "command"]));

const fn disk(
    file: &'static str,
    metric: &'static str,
    display: &'static str,
    units: &'static str,
    split_read_write: bool,
) -> RecordSpec {
    RecordSpec {
        file,
        class: "disk",
        metric,
        display,
        units,
        subfields: if split_read_write { READ_WRITE } else { &[] },
        column: if split_read_write { ID_READ_WRITE } else { ID_ONLY },
        metadata: None,
    }
}

const fn pidstat(
    file: &'static str,
    metric: &'static str,
    display: &'static str,
    units: &'static str,
) -> RecordSpec {
    RecordSpec {
        file,
        class: "pidstat",
        metric,
        display,
        units,
        subfields: &[],
        column: ID_ONLY,
        metadata: PID_COMMAND,
    }
}

const IOSTAT: &[RecordSpec] = &[
    disk(r"disk_IOPS\.csv", "iops", "IOPS", "count_per_sec", true),
    disk(r"disk_Queue_Size\.csv", "qsize", "Queue_Size", "count", false),
    disk(r"disk_Request_Merges_per_sec\.csv", "reqmerges", "Request_Merges", "count_per_sec", true),
    disk(r"disk_Request_Size_in_512_byte_sectors\.csv", "reqsize", "Request_Size", "count_512b_sectors", false),
    disk(r"disk_Throughput_MB_per_sec\.csv", "tput", "Throughput", "MB_per_sec", true),
    disk(r"disk_Utilization_percent\.csv", "util", "Utilization", "percent", false),
    disk(r"disk_Wait_Time_msec\.csv", "wtime", "Wait_Time", "msec", true),
];

const PIDSTAT: &[RecordSpec] = &[
    pidstat(
        r"context_switches_nonvoluntary_switches_sec\.csv",
        "context_switches_nonvoluntary_switches",
        "Context_Switches_Nonvoluntary",
        "count_per_sec",
    ),
    pidstat(
        r"context_switches_voluntary_switches_sec\.csv",
        "context_switches_voluntary_switches",
        "Context_Switches_Voluntary",
        "count_per_sec",
    ),
    pidstat(r"cpu_usage_percent_cpu\.csv", "cpu_usage", "CPU_Usage", "percent_cpu"),
    pidstat(r"file_io_io_reads_KB_sec\.csv", "io_reads", "IO_Reads", "KB_per_sec"),
    pidstat(r"file_io_io_writes_KB_sec\.csv", "io_writes", "IO_Writes", "KB_per_sec"),
    pidstat(
        r"memory_faults_major_faults_sec\.csv",
        "memory_faults_major",
        "Memory_Faults_Major",
        "count_per_sec",
    ),
    pidstat(
        r"memory_faults_minor_faults_sec\.csv",
        "memory_faults_minor",
        "Memory_Faults_Minor",
        "count_per_sec",
    ),
    pidstat(r"memory_usage_resident_set_size\.csv", "rss", "RSS", "KB"),
    pidstat(r"memory_usage_virtual_size\.csv", "vsz", "VSZ", "KB"),
];

// mpstat names its files after cpu cores, so the id comes from the file name.
const MPSTAT: &[RecordSpec] = &[RecordSpec {
    file: r"(?P<id>cpu.+)_cpu\w+\.csv",
    class: "mpstat",
    metric: "cpu",
    display: "CPU",
    units: "percent_cpu",
    subfields: &[],
    column: None,
    metadata: None,
}];

const PROC_VMSTAT: &[RecordSpec] = &[RecordSpec {
    file: r"proc-vmstat-stdout\.txt",
    class: "vmstat",
    metric: "metric",
    display: "",
    units: "",
    subfields: &[],
    column: None,
    metadata: None,
}];

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "iostat",
        prospectus: Some((Handling::Csv, Method::Unify)),
        records: IOSTAT,
    },
    ToolSpec {
        name: "pidstat",
        prospectus: Some((Handling::Csv, Method::Unify)),
        records: PIDSTAT,
    },
    ToolSpec {
        name: "proc-interrupts",
        prospectus: Some((Handling::Csv, Method::Individual)),
        records: &[],
    },
    ToolSpec {
        name: "mpstat",
        prospectus: Some((Handling::Csv, Method::Individual)),
        records: MPSTAT,
    },
    ToolSpec {
        name: "prometheus-metrics",
        prospectus: Some((Handling::Json, Method::Json)),
        records: &[],
    },
    ToolSpec {
        name: "proc-vmstat",
        prospectus: Some((Handling::Stdout, Method::PeriodicTimestampKeyValue)),
        records: PROC_VMSTAT,
    },
    ToolSpec {
        name: "sar",
        prospectus: None,
        records: &[],
    },
    ToolSpec {
        name: "turbostat",
        prospectus: None,
        records: &[],
    },
    ToolSpec {
        name: "perf",
        prospectus: None,
        records: &[],
    },
];

/// Deprecated csv file names mapped to their current names.
const ALIASES: &[(&str, &str)] = &[
    ("disk_Request_Merges.csv", "disk_Request_Merges_per_sec.csv"),
    ("disk_Request_Size.csv", "disk_Request_Size_in_512_byte_sectors.csv"),
    ("disk_Throughput.csv", "disk_Throughput_MB_per_sec.csv"),
    ("disk_Utilization.csv", "disk_Utilization_percent.csv"),
    ("disk_Wait_Time.csv", "disk_Wait_Time_msec.csv"),
];

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .with_context(|| format!("invalid handler pattern: {}", pattern))
}

fn compile_record(spec: &RecordSpec) -> Result<HandlerRecord> {
    let column_rule = match spec.column {
        Some(p) => Some(ColumnRule {
            pattern: anchored(p)?,
        }),
        None => None,
    };
    let metadata_rule = match spec.metadata {
        Some((p, fields)) => Some(MetadataRule {
            pattern: anchored(p)?,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }),
        None => None,
    };
    Ok(HandlerRecord {
        file_pattern: anchored(spec.file)?,
        class: spec.class.to_string(),
        metric: spec.metric.to_string(),
        display: spec.display.to_string(),
        units: spec.units.to_string(),
        subfields: spec.subfields.iter().map(|s| s.to_string()).collect(),
        column_rule,
        metadata_rule,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// All known tools, compiled.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    /// `None` marks a tool that is known but deliberately not indexed.
    tools: BTreeMap<String, Option<ToolHandler>>,
    aliases: BTreeMap<String, String>,
}

impl HandlerRegistry {
    /// The built-in handler table.
    pub fn standard() -> Result<Self> {
        let mut tools = BTreeMap::new();
        for spec in TOOLS {
            let handler = match spec.prospectus {
                Some((handling, method)) => Some(ToolHandler {
                    name: spec.name.to_string(),
                    prospectus: Prospectus::new(handling, method)
                        .with_context(|| format!("tool '{}'", spec.name))?,
                    records: spec
                        .records
                        .iter()
                        .map(compile_record)
                        .collect::<Result<Vec<_>>>()?,
                }),
                None => None,
            };
            tools.insert(spec.name.to_string(), handler);
        }
        let aliases = ALIASES
            .iter()
            .map(|(old, new)| (old.to_string(), new.to_string()))
            .collect();
        Ok(Self { tools, aliases })
    }

    /// Handler for `tool`, or `None` when the tool is unknown or is
    /// intentionally left unindexed. Neither case is an error.
    pub fn classify(&self, tool: &str) -> Option<&ToolHandler> {
        self.tools.get(tool).and_then(|h| h.as_ref())
    }

    /// Whether the tool appears in the table at all.
    pub fn is_known(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }

    /// Record for a csv file name, trying the alias table when the name
    /// itself matches nothing.
    pub fn record_for_csv(&self, handler: &ToolHandler, basename: &str) -> Option<usize> {
        handler.record_for(basename).or_else(|| {
            self.aliases
                .get(basename)
                .and_then(|current| handler.record_for(current))
        })
    }

    /// `(tool, handler)` pairs in name order, unindexed tools included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&ToolHandler>)> {
        self.tools.iter().map(|(name, h)| (name.as_str(), h.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::standard().unwrap()
    }

    #[test]
    fn prospectus_rejects_incompatible_pairs() {
        assert!(Prospectus::new(Handling::Csv, Method::Unify).is_ok());
        assert!(Prospectus::new(Handling::Csv, Method::Json).is_err());
        assert!(Prospectus::new(Handling::Json, Method::Individual).is_err());
        assert!(Prospectus::new(Handling::Stdout, Method::Unify).is_err());
        assert!(Prospectus::new(Handling::Stdout, Method::PeriodicTimestampKeyValue).is_ok());
    }

    #[test]
    fn classify_known_tools() {
        let reg = registry();
        let iostat = reg.classify("iostat").unwrap();
        assert_eq!(iostat.prospectus.method(), Method::Unify);
        assert_eq!(iostat.records.len(), 7);
        assert_eq!(reg.classify("pidstat").unwrap().records.len(), 9);
        assert_eq!(
            reg.classify("proc-vmstat").unwrap().prospectus.handling(),
            Handling::Stdout
        );
    }

    #[test]
    fn unindexed_and_unknown_tools_classify_to_none() {
        let reg = registry();
        for tool in ["sar", "turbostat", "perf"] {
            assert!(reg.classify(tool).is_none());
            assert!(reg.is_known(tool));
        }
        assert!(reg.classify("label").is_none());
        assert!(!reg.is_known("label"));
    }

    #[test]
    fn file_patterns_are_anchored() {
        let reg = registry();
        let iostat = reg.classify("iostat").unwrap();
        assert_eq!(iostat.record_for("disk_IOPS.csv"), Some(0));
        assert_eq!(iostat.record_for("disk_IOPS.csv.bak"), None);
        assert_eq!(iostat.record_for("old_disk_IOPS.csv"), None);
    }

    #[test]
    fn aliases_resolve_to_current_records() {
        let reg = registry();
        let iostat = reg.classify("iostat").unwrap();
        let idx = reg.record_for_csv(iostat, "disk_Throughput.csv").unwrap();
        assert_eq!(iostat.records[idx].metric, "tput");
        assert!(reg.record_for_csv(iostat, "disk_Unknown.csv").is_none());
    }

    #[test]
    fn mpstat_identifier_from_filename() {
        let reg = registry();
        let mpstat = reg.classify("mpstat").unwrap();
        let rec = &mpstat.records[0];
        assert_eq!(rec.file_identifier("cpu0_cpu_busy.csv").as_deref(), Some("cpu0"));
        assert_eq!(rec.file_identifier("cpuall_cpuall.csv").as_deref(), Some("cpuall"));
        assert!(rec.file_identifier("memory.csv").is_none());
    }

    #[test]
    fn pidstat_records_carry_metadata_rule() {
        let reg = registry();
        let rec = &reg.classify("pidstat").unwrap().records[0];
        let rule = rec.metadata_rule.as_ref().unwrap();
        assert_eq!(rule.fields, vec!["pid".to_string(), "command".to_string()]);
    }
}
