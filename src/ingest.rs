//! Indexing pipeline orchestration.
//!
//! Opens the run archive, drives every producer in a fixed order, wraps
//! the documents into actions and submits them to a [`DocumentSink`] in
//! batches of `ingest.batch_size`:
//!
//! ```text
//! RunArchive ──▶ run document ─┐
//!            ──▶ table of contents ─┤
//!            ──▶ result data ─┼──▶ ActionBuilder ──▶ batches ──▶ DocumentSink
//!            ──▶ ToolData × (iteration, sample, host, tool) ─┘
//! ```
//!
//! Producers are lazy; at most one batch of actions is held in memory.
//! Each unit of work keeps its own counters, which end up in the
//! [`IndexReport`] of the returned [`IndexSummary`].

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::actions::ActionBuilder;
use crate::archive::RunArchive;
use crate::config::Config;
use crate::counters::{Counters, IndexReport};
use crate::layout;
use crate::models::Action;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::registry::HandlerRegistry;
use crate::result_data::ResultData;
use crate::run_doc;
use crate::sink::{open_sink, DocumentSink, MemorySink, SubmitOutcome};
use crate::sosreport;
use crate::toc;
use crate::transform::ToolData;

/// What to index and how.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub run_dir: PathBuf,
    /// Overrides the id read from the run's `.md5` file.
    pub run_id: Option<String>,
    /// User-supplied JSON stored in the run document.
    pub metadata_json: Option<String>,
    /// Produce every action but store nothing.
    pub dry_run: bool,
}

/// Outcome of indexing one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub run_id: String,
    pub produced: u64,
    pub created: u64,
    pub duplicates: u64,
    pub failed: u64,
    #[serde(skip)]
    pub report: IndexReport,
}

/// Collects actions and hands them to the sink in batches.
struct Submitter<'s, 'p> {
    sink: &'s mut dyn DocumentSink,
    progress: &'p dyn IndexProgressReporter,
    batch_size: usize,
    pending: Vec<Action>,
    error_log: Option<BufWriter<std::fs::File>>,
    unit: String,
    summary: IndexSummary,
}

impl Submitter<'_, '_> {
    fn begin(&mut self, unit: impl Into<String>) {
        self.unit = unit.into();
        self.progress.report(IndexProgressEvent::Producing {
            unit: self.unit.clone(),
        });
    }

    async fn push(&mut self, action: Action) -> Result<()> {
        self.pending.push(action);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let outcomes = self.sink.submit(&batch).await?;
        self.summary.produced += batch.len() as u64;
        for (action, outcome) in batch.iter().zip(outcomes) {
            match outcome {
                SubmitOutcome::Created => self.summary.created += 1,
                SubmitOutcome::Duplicate => self.summary.duplicates += 1,
                SubmitOutcome::Failed(reason) => {
                    self.summary.failed += 1;
                    warn!(index = %action.index, id = %action.id, "Submission failed: {}", reason);
                    if let Some(log) = self.error_log.as_mut() {
                        let line = serde_json::json!({
                            "index": action.index,
                            "doc_type": action.doc_type,
                            "id": action.id,
                            "reason": reason,
                        });
                        writeln!(log, "{}", line)?;
                    }
                }
            }
        }
        self.progress.report(IndexProgressEvent::Submitted {
            unit: self.unit.clone(),
            submitted: self.summary.produced,
        });
        Ok(())
    }

    async fn finish(mut self) -> Result<IndexSummary> {
        self.flush().await?;
        if let Some(log) = self.error_log.as_mut() {
            log.flush()?;
        }
        Ok(self.summary)
    }
}

fn open_error_log(config: &Config) -> Result<Option<BufWriter<std::fs::File>>> {
    let Some(path) = &config.ingest.error_log else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open error log {}", path.display()))?;
    Ok(Some(BufWriter::new(file)))
}

/// Index one run into `sink`.
///
/// Fatal archive problems come back as an [`IndexError`](crate::error::IndexError)
/// inside the `anyhow::Error`; everything recoverable is counted in the
/// summary's report.
pub async fn index_run(
    config: &Config,
    opts: &IndexOptions,
    sink: &mut dyn DocumentSink,
    progress: &dyn IndexProgressReporter,
) -> Result<IndexSummary> {
    let archive = RunArchive::open(&opts.run_dir, opts.run_id.as_deref())?;
    let registry = HandlerRegistry::standard()?;
    let builder = ActionBuilder::new(config.index.prefix.clone());
    let (year, month, _) = archive.date();
    let run_id = archive.run_id().to_string();
    info!(run = archive.dirname(), run_id = %run_id, "Indexing run");

    let mut report = IndexReport::new();
    let mut submitter = Submitter {
        sink,
        progress,
        batch_size: config.ingest.batch_size.max(1),
        pending: Vec::new(),
        error_log: open_error_log(config)?,
        unit: String::new(),
        summary: IndexSummary {
            run_id: run_id.clone(),
            ..IndexSummary::default()
        },
    };

    // Run document
    submitter.begin("RunDoc");
    let mut run_counters = Counters::new();
    let sosreports = sosreport::collect(&archive, &mut run_counters)?;
    let run_source = run_doc::build(&archive, &sosreports, opts.metadata_json.as_deref());
    submitter
        .push(builder.run(year, month, &run_id, run_source))
        .await?;
    report.push("RunDoc", &run_counters);

    // Table of contents
    submitter.begin("Toc");
    for entry in toc::build(&archive) {
        let id = entry.id(&run_id);
        submitter
            .push(builder.toc(year, month, &run_id, id, entry.to_value()))
            .await?;
    }

    // Result data
    let mut results = ResultData::new(&archive);
    submitter.begin(results.label());
    let mut routing = Counters::new();
    for (doc, id) in results.make_source() {
        if let Some(action) = builder.result_data(doc, id, &mut routing) {
            submitter.push(action).await?;
        }
    }
    results.absorb(&routing);
    report.push(results.label(), results.counters());

    // Tool data
    for coords in layout::resolve(archive.mdconf(), archive.dirname(), archive.members()) {
        let mut tool_data = ToolData::new(&registry, &archive, &coords);
        let tool = tool_data.tool().to_string();
        submitter.begin(tool_data.label());
        let mut routing = Counters::new();
        if let Some(source) = tool_data.make_source() {
            for (doc, id) in source {
                if let Some(action) = builder.tool_data(&tool, doc, id, &mut routing) {
                    submitter.push(action).await?;
                }
            }
        }
        tool_data.absorb(&routing);
        report.push(tool_data.label(), tool_data.counters());
    }

    let mut summary = submitter.finish().await?;
    summary.report = report;
    Ok(summary)
}

/// The `index` command: pick the sink, index the run, print a summary.
pub async fn run_index(config: &Config, opts: &IndexOptions, mode: ProgressMode) -> Result<IndexSummary> {
    let progress = mode.reporter();
    let mut sink: Box<dyn DocumentSink> = if opts.dry_run {
        Box::new(MemorySink::new())
    } else {
        open_sink(config).await?
    };

    let summary = index_run(config, opts, sink.as_mut(), progress.as_ref()).await?;

    if opts.dry_run {
        println!("index {} (dry-run)", opts.run_dir.display());
    } else {
        println!("index {} -> {}", opts.run_dir.display(), sink.name());
    }
    println!("  run id:      {}", summary.run_id);
    println!("  actions:     {}", summary.produced);
    println!("  created:     {}", summary.created);
    println!("  duplicates:  {}", summary.duplicates);
    println!("  failed:      {}", summary.failed);
    println!("{}", summary.report.to_json()?);

    Ok(summary)
}
