//! Periodic `timestamp:` / `key value` logs.
//!
//! ```text
//! timestamp: 1709251200.00
//! nr_free_pages 1000
//! nr_dirty 12
//! timestamp: 1709251203.00
//! nr_free_pages 990
//! ```
//!
//! Each `timestamp:` line closes the record in progress and opens a new
//! one; end of file closes the last. Blank lines are ignored. Anything
//! else ends the file: the record in progress is discarded, records
//! already produced stand, and the file is counted as malformed.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};

use serde_json::{Map, Value};
use tracing::warn;

use super::{SourceContext, Sourced};
use crate::counters::{Counter, Counters};
use crate::identity::document_id;
use crate::locator::DataFile;
use crate::models::stamped;
use crate::timestamp::{format_ts, parse_epoch_seconds};

const TIMESTAMP_PREFIX: &str = "timestamp:";

/// A record being accumulated.
struct Block {
    timestamp: String,
    values: Map<String, Value>,
}

enum State {
    NoRecord,
    Accumulating(Block),
}

struct Active {
    class: String,
    path: String,
    lines: Lines<BufReader<File>>,
    state: State,
}

pub struct Periodic<'a> {
    ctx: SourceContext<'a>,
    files: &'a mut [DataFile],
    counters: &'a mut Counters,
    next_file: usize,
    active: Option<Active>,
}

impl<'a> Periodic<'a> {
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
            let Some(record) = file.record else {
                continue;
            };
            match File::open(&file.path) {
                Ok(f) => {
                    return Some(Active {
                        class: self.ctx.handler.records[record].class.clone(),
                        path: file.path.display().to_string(),
                        lines: BufReader::new(f).lines(),
                        state: State::NoRecord,
                    })
                }
                Err(e) => {
                    warn!(path = %file.path.display(), "Unreadable stdout file: {}", e);
                    self.counters.incr(Counter::MalformedStdoutFile);
                }
            }
        }
        None
    }

    fn finish_block(&self, class: &str, block: Block) -> Sourced {
        let mut inner = Map::new();
        inner.insert(class.to_string(), Value::Object(block.values));
        let mut doc = stamped(block.timestamp, self.ctx.metadata);
        doc.insert(self.ctx.tool.to_string(), Value::Object(inner));
        let doc = Value::Object(doc);
        let id = document_id(&doc);
        (doc, id)
    }

    fn malformed(&mut self, active: &Active, line: &str) {
        warn!(path = %active.path, line, "Malformed stdout file");
        self.counters.incr(Counter::MalformedStdoutFile);
    }

    /// Step the active file. `Ok(Some)` is a finished record, `Ok(None)`
    /// means keep reading, `Err(())` means the file is over.
    fn step(&mut self, active: &mut Active) -> Result<Option<Sourced>, ()> {
        let line = match active.lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                self.malformed(active, &e.to_string());
                return Err(());
            }
            None => {
                return match std::mem::replace(&mut active.state, State::NoRecord) {
                    State::Accumulating(block) => Ok(Some(self.finish_block(&active.class, block))),
                    State::NoRecord => Err(()),
                };
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if let Some(raw) = trimmed.strip_prefix(TIMESTAMP_PREFIX) {
            let Some(ts) = parse_epoch_seconds(raw) else {
                self.malformed(active, trimmed);
                return Err(());
            };
            self.ctx.window.check(&ts, self.counters);
            let next = Block {
                timestamp: format_ts(&ts),
                values: Map::new(),
            };
            return Ok(match std::mem::replace(&mut active.state, State::Accumulating(next)) {
                State::Accumulating(done) => Some(self.finish_block(&active.class, done)),
                State::NoRecord => None,
            });
        }

        let mut parts = trimmed.split_whitespace();
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            self.malformed(active, trimmed);
            return Err(());
        };
        match &mut active.state {
            State::Accumulating(block) => {
                block
                    .values
                    .insert(key.to_string(), Value::String(value.to_string()));
                Ok(None)
            }
            State::NoRecord => {
                self.malformed(active, trimmed);
                Err(())
            }
        }
    }
}

impl Iterator for Periodic<'_> {
    type Item = Sourced;

    fn next(&mut self) -> Option<Sourced> {
        loop {
            let mut active = match self.active.take() {
                Some(a) => a,
                None => self.open_next()?,
            };
            match self.step(&mut active) {
                Ok(Some(doc)) => {
                    self.active = Some(active);
                    return Some(doc);
                }
                Ok(None) => self.active = Some(active),
                // drop `active`, move on to the next file
                Err(()) => {}
            }
        }
    }
}
