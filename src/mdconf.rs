//! `metadata.log` access.
//!
//! The run's `metadata.log` is an INI-style file written by the benchmark
//! harness:
//!
//! ```text
//! [pbench]
//! name = fio_test
//! iterations = 1-rw-4KiB, 2-rw-64KiB
//!
//! [tools]
//! hosts = node1 node2
//!
//! [tools/node1]
//! label = server
//! iostat = --interval=3
//! ```
//!
//! Consumers go through the [`ConfigReader`] trait so the producers can be
//! exercised against an in-memory reader in tests.

use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Lookup failure for a section or option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    Section(String),
    Option { section: String, option: String },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Section(s) => write!(f, "no section [{}]", s),
            NotFound::Option { section, option } => {
                write!(f, "no option '{}' in section [{}]", option, section)
            }
        }
    }
}

impl std::error::Error for NotFound {}

/// Read-only access to a sectioned key/value configuration.
pub trait ConfigReader {
    fn get(&self, section: &str, option: &str) -> Result<String, NotFound>;

    /// Option names of a section, in file order.
    fn options(&self, section: &str) -> Result<Vec<String>, NotFound>;

    /// `(option, value)` pairs of a section, in file order.
    fn items(&self, section: &str) -> Result<Vec<(String, String)>, NotFound>;

    fn has_section(&self, section: &str) -> bool {
        self.options(section).is_ok()
    }
}

#[derive(Debug, Clone, Default)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

/// Parsed `metadata.log`.
///
/// Option names are case-folded to lowercase; values are trimmed.
/// Indented lines continue the previous value. Lines starting with `#` or
/// `;` are comments.
#[derive(Debug, Clone, Default)]
pub struct MetadataLog {
    sections: Vec<Section>,
}

impl MetadataLog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut log = MetadataLog::default();
        let mut last_key: Option<usize> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                last_key = None;
                continue;
            }

            if raw.starts_with(|c: char| c.is_whitespace()) {
                if let (Some(section), Some(idx)) = (log.sections.last_mut(), last_key) {
                    let value = &mut section.entries[idx].1;
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    continue;
                }
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let Some(name) = rest.strip_suffix(']') else {
                    bail!("line {}: unterminated section header", lineno);
                };
                let name = name.trim().to_string();
                if log.section(&name).is_some() {
                    bail!("line {}: duplicate section [{}]", lineno, name);
                }
                log.sections.push(Section {
                    name,
                    entries: Vec::new(),
                });
                last_key = None;
                continue;
            }

            let Some(section) = log.sections.last_mut() else {
                bail!("line {}: option outside of any section", lineno);
            };
            let split = trimmed.find(['=', ':']);
            let (key, value) = match split {
                Some(pos) => (&trimmed[..pos], trimmed[pos + 1..].trim()),
                None => bail!("line {}: expected 'key = value'", lineno),
            };
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                bail!("line {}: empty option name", lineno);
            }
            match section.entries.iter().position(|(k, _)| *k == key) {
                Some(pos) => {
                    section.entries[pos].1 = value.to_string();
                    last_key = Some(pos);
                }
                None => {
                    section.entries.push((key, value.to_string()));
                    last_key = Some(section.entries.len() - 1);
                }
            }
        }
        Ok(log)
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Section names in file order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }
}

impl ConfigReader for MetadataLog {
    fn get(&self, section: &str, option: &str) -> Result<String, NotFound> {
        let sec = self
            .section(section)
            .ok_or_else(|| NotFound::Section(section.to_string()))?;
        let option = option.to_lowercase();
        sec.entries
            .iter()
            .find(|(k, _)| *k == option)
            .map(|(_, v)| v.clone())
            .ok_or(NotFound::Option {
                section: section.to_string(),
                option,
            })
    }

    fn options(&self, section: &str) -> Result<Vec<String>, NotFound> {
        self.section(section)
            .map(|s| s.entries.iter().map(|(k, _)| k.clone()).collect())
            .ok_or_else(|| NotFound::Section(section.to_string()))
    }

    fn items(&self, section: &str) -> Result<Vec<(String, String)>, NotFound> {
        self.section(section)
            .map(|s| s.entries.clone())
            .ok_or_else(|| NotFound::Section(section.to_string()))
    }
}
