//! # pbench-index
//!
//! Turns pbench benchmark-run directories into normalized,
//! content-addressed documents ready for bulk indexing.
//!
//! A run directory holds the output of many monitoring tools (iostat,
//! mpstat, pidstat, prometheus exporters, `/proc/vmstat` samplers, ...) in
//! per-tool formats: csv column files, arrays of JSON records, or periodic
//! `key: value` dumps. A declarative handler table says how each tool's
//! files are read; the transformers turn them into time-stamped documents
//! whose id is the SHA-256 of their canonical JSON, so re-indexing a run
//! never creates a duplicate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ RunArchive  │──▶│ layout +     │──▶│ transform    │──▶│ actions  │
//! │ metadata.log│   │ locator      │   │ unify/indiv/ │   │ (index,  │
//! │ member scan │   │ (registry)   │   │ json/periodic│   │  id)     │
//! └─────────────┘   └──────────────┘   └──────────────┘   └────┬─────┘
//!        │                                                     │
//!        ├──▶ run document, table of contents, result data ────┤
//!        │                                                     ▼
//!        │                                        ┌──────────────────────┐
//!        └── counters ──▶ IndexReport             │ DocumentSink         │
//!                                                 │ memory/jsonl/sqlite  │
//!                                                 └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`archive`] | Open and validate a run directory |
//! | [`mdconf`] | `metadata.log` parser and [`mdconf::ConfigReader`] |
//! | [`layout`] | Iterations, samples, hosts and tools of a run |
//! | [`registry`] | Tool handler table |
//! | [`locator`] | Data files of one tool, with read cursors |
//! | [`fields`] | Column header → identifier / subfield mapping |
//! | [`transform`] | Tool data transformers |
//! | [`result_data`] | `result.json` documents |
//! | [`toc`] | Table-of-contents documents |
//! | [`run_doc`] | The run document |
//! | [`sosreport`] | Host identity from sosreports |
//! | [`actions`] | Index routing |
//! | [`identity`] | Canonical JSON and content ids |
//! | [`counters`] | Recoverable-condition bookkeeping |
//! | [`sink`] | Create-only document sinks |
//! | [`ingest`] | Pipeline driver |
//! | [`config`] | TOML configuration |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite sink schema |

pub mod actions;
pub mod archive;
pub mod config;
pub mod counters;
pub mod db;
pub mod error;
pub mod fields;
pub mod identity;
pub mod ingest;
pub mod layout;
pub mod locator;
pub mod mdconf;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod registry;
pub mod result_data;
pub mod run_doc;
pub mod sink;
pub mod sosreport;
pub mod stats;
pub mod timestamp;
pub mod toc;
pub mod transform;
