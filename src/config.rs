//! TOML configuration.
//!
//! ```toml
//! [index]
//! prefix = "pbench"
//!
//! [sink]
//! kind = "sqlite"          # sqlite | jsonl | memory
//! path = "./data/pbench-index.sqlite"
//!
//! [ingest]
//! batch_size = 500
//! error_log = "./data/index-errors.jsonl"
//! ```
//!
//! Every section is optional. Any failure to read or validate the file is
//! reported as [`IndexError::ConfigFile`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::IndexError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Prepended to every index name.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "pbench".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Sqlite,
    Jsonl,
    Memory,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkKind::Sqlite => "sqlite",
            SinkKind::Jsonl => "jsonl",
            SinkKind::Memory => "memory",
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            path: default_sink_path(),
        }
    }
}

fn default_sink_kind() -> SinkKind {
    SinkKind::Sqlite
}
fn default_sink_path() -> PathBuf {
    PathBuf::from("./data/pbench-index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Failed submissions are appended here as JSON lines.
    #[serde(default)]
    pub error_log: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            error_log: None,
        }
    }
}

fn default_batch_size() -> usize {
    500
}

fn config_error(path: &Path, err: anyhow::Error) -> anyhow::Error {
    IndexError::ConfigFile {
        path: path.to_path_buf(),
        reason: format!("{:#}", err),
    }
    .into()
}

pub fn load_config(path: &Path) -> Result<Config> {
    read_config(path).map_err(|e| config_error(path, e))
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.index.prefix.is_empty() {
        bail!("index.prefix must not be empty");
    }
    if config.index.prefix.contains(char::is_whitespace) {
        bail!("index.prefix must not contain whitespace");
    }
    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }
    if config.sink.kind != SinkKind::Memory && config.sink.path.as_os_str().is_empty() {
        bail!("sink.path must be set when sink.kind is '{}'", config.sink.kind);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.prefix, "pbench");
        assert_eq!(config.sink.kind, SinkKind::Sqlite);
        assert_eq!(config.ingest.batch_size, 500);
        assert!(config.ingest.error_log.is_none());
    }

    #[test]
    fn full_file() {
        let config = parse_config(
            r#"
            [index]
            prefix = "dev"
            [sink]
            kind = "jsonl"
            path = "/tmp/out.ndjson"
            [ingest]
            batch_size = 10
            error_log = "/tmp/errors.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.index.prefix, "dev");
        assert_eq!(config.sink.kind, SinkKind::Jsonl);
        assert_eq!(config.sink.path, PathBuf::from("/tmp/out.ndjson"));
        assert_eq!(config.ingest.batch_size, 10);
        assert_eq!(config.ingest.error_log, Some(PathBuf::from("/tmp/errors.jsonl")));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(parse_config("[ingest]\nbatch_size = 0\n").is_err());
        assert!(parse_config("[index]\nprefix = \"\"\n").is_err());
        assert!(parse_config("[sink]\nkind = \"elastic\"\n").is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config(Path::new("/nonexistent/pbench-index.toml")).unwrap_err();
        let ie = err.downcast_ref::<IndexError>().unwrap();
        assert_eq!(ie.exit_code(), 3);
    }
}
