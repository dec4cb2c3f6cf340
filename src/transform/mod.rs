//! Tool data → documents.
//!
//! A [`ToolData`] is one tool at one (iteration, sample, host) coordinate.
//! It owns its data files and its counters. [`ToolData::make_source`]
//! selects the transformer from the tool's prospectus once and returns it
//! as a [`ToolSource`], a lazy iterator of `(document, id)` pairs:
//!
//! | Method | Strategy | Input |
//! |--------|----------|-------|
//! | unify | [`unify::Unify`] | several csv files, lock-step |
//! | individual | [`individual::Individual`] | one csv file at a time |
//! | json | [`json_records::JsonRecords`] | arrays of pre-built records |
//! | periodic_timestamp_key_value | [`periodic::Periodic`] | `<tool>-stdout.txt` |
//!
//! Draining a source consumes the file cursors; it cannot be restarted.

pub mod individual;
pub mod json_records;
pub mod periodic;
pub mod unify;

use serde_json::Value;
use tracing::debug;

use crate::archive::RunArchive;
use crate::counters::Counters;
use crate::layout::ToolCoordinates;
use crate::locator::{locate, DataFile};
use crate::models::{metadata_value, RunMetadata, ToolMetadata};
use crate::registry::{HandlerRegistry, Method, ToolHandler};
use crate::timestamp::RunWindow;

/// A produced document and its content id.
pub type Sourced = (Value, String);

/// Read-only inputs shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub tool: &'a str,
    pub handler: &'a ToolHandler,
    /// Serialized [`ToolMetadata`], stamped as `@metadata`.
    pub metadata: &'a Value,
    pub window: RunWindow,
}

/// The transformer selected for a tool.
pub enum ToolSource<'a> {
    Unified(unify::Unify<'a>),
    Individual(individual::Individual<'a>),
    Json(json_records::JsonRecords<'a>),
    Periodic(periodic::Periodic<'a>),
}

impl Iterator for ToolSource<'_> {
    type Item = Sourced;

    fn next(&mut self) -> Option<Sourced> {
        match self {
            ToolSource::Unified(s) => s.next(),
            ToolSource::Individual(s) => s.next(),
            ToolSource::Json(s) => s.next(),
            ToolSource::Periodic(s) => s.next(),
        }
    }
}

pub struct ToolData<'r> {
    tool: String,
    handler: Option<&'r ToolHandler>,
    metadata: Value,
    window: RunWindow,
    files: Vec<DataFile>,
    counters: Counters,
}

impl<'r> ToolData<'r> {
    /// Classify the tool and locate its files.
    pub fn new(registry: &'r HandlerRegistry, archive: &RunArchive, coords: &ToolCoordinates) -> Self {
        let run = RunMetadata {
            runtstamp: archive.start_run().to_string(),
            runid: archive.run_id().to_string(),
            experiment: archive.experiment().to_string(),
        };
        let metadata = ToolMetadata::new(run, &coords.iteration, &coords.sample, &coords.host, &coords.toolgroup);
        let mut counters = Counters::new();
        let handler = registry.classify(&coords.tool);
        let files = match handler {
            Some(h) => locate(registry, h, coords, archive, &mut counters),
            None => {
                debug!(tool = %coords.tool, "Tool not indexed");
                Vec::new()
            }
        };
        Self::from_parts(
            &coords.tool,
            handler,
            metadata_value(&metadata),
            RunWindow::new(archive.start_run(), archive.end_run()),
            files,
            counters,
        )
    }

    /// Assemble from already located files.
    pub fn from_parts(
        tool: &str,
        handler: Option<&'r ToolHandler>,
        metadata: Value,
        window: RunWindow,
        files: Vec<DataFile>,
        counters: Counters,
    ) -> Self {
        Self {
            tool: tool.to_string(),
            handler,
            metadata,
            window,
            files,
            counters,
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Report label of this unit of work.
    pub fn label(&self) -> String {
        format!("ToolData-{}", self.tool)
    }

    pub fn files(&self) -> &[DataFile] {
        &self.files
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Fold counters gathered downstream (e.g. while routing) into this context.
    pub fn absorb(&mut self, other: &Counters) {
        self.counters.merge(other);
    }

    /// The transformer for this tool, or `None` when the tool is not
    /// indexed or has no data files.
    pub fn make_source(&mut self) -> Option<ToolSource<'_>> {
        let handler = self.handler?;
        if self.files.is_empty() {
            return None;
        }
        let ctx = SourceContext {
            tool: &self.tool,
            handler,
            metadata: &self.metadata,
            window: self.window,
        };
        let files = &mut self.files;
        let counters = &mut self.counters;
        Some(match handler.prospectus.method() {
            Method::Unify => ToolSource::Unified(unify::Unify::new(ctx, files, counters)),
            Method::Individual => ToolSource::Individual(individual::Individual::new(ctx, files, counters)),
            Method::Json => ToolSource::Json(json_records::JsonRecords::new(ctx, files, counters)),
            Method::PeriodicTimestampKeyValue => {
                ToolSource::Periodic(periodic::Periodic::new(ctx, files, counters))
            }
        })
    }
}
