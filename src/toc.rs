//! Table of contents of the run tree.
//!
//! One document per directory, listing the files directly inside it. The
//! documents are children of the run document in the monthly run index.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::archive::{MemberKind, RunArchive};
use crate::identity::canonical_json;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocFile {
    pub name: String,
    pub size: u64,
    /// Octal permission bits, e.g. `0o644`.
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkpath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocEntry {
    /// Path relative to the run directory, with leading and trailing `/`.
    pub directory: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<TocFile>,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

impl TocEntry {
    /// Id derived from the parent run id, the directory and its files.
    pub fn id(&self, parent_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parent_id.as_bytes());
        hasher.update(self.directory.as_bytes());
        for file in &self.files {
            if let Ok(v) = serde_json::to_value(file) {
                hasher.update(canonical_json(&v).as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `run/a/b` → `/a/b/`, `run` → `/`.
fn toc_dir(dirname: &str, member_dir: &str) -> String {
    let rest = member_dir.strip_prefix(dirname).unwrap_or(member_dir);
    let rest = rest.trim_matches('/');
    if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", rest)
    }
}

/// Table-of-contents entries in directory order.
pub fn build(archive: &RunArchive) -> Vec<TocEntry> {
    let dirname = archive.dirname();
    let timestamp = archive.start_run().to_string();
    let mut dirs: BTreeMap<String, Vec<TocFile>> = BTreeMap::new();
    for member in archive.members() {
        match member.kind {
            MemberKind::Dir => {
                dirs.entry(toc_dir(dirname, &member.name)).or_default();
            }
            MemberKind::File | MemberKind::Symlink => {
                dirs.entry(toc_dir(dirname, member.dirname()))
                    .or_default()
                    .push(TocFile {
                        name: member.basename().to_string(),
                        size: member.size,
                        mode: format!("0o{:o}", member.mode),
                        linkpath: member.linkpath.clone(),
                    });
            }
        }
    }
    dirs.into_iter()
        .map(|(directory, files)| TocEntry {
            directory,
            files,
            timestamp: timestamp.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toc_dir_shapes() {
        assert_eq!(toc_dir("run", "run"), "/");
        assert_eq!(toc_dir("run", "run/1-a/sample1"), "/1-a/sample1/");
    }

    #[test]
    fn id_depends_on_parent_and_files() {
        let entry = TocEntry {
            directory: "/".into(),
            files: vec![TocFile {
                name: "metadata.log".into(),
                size: 10,
                mode: "0o644".into(),
                linkpath: None,
            }],
            timestamp: "2024-03-01T00:00:00".into(),
        };
        let mut other = entry.clone();
        other.files[0].size = 11;
        assert_eq!(entry.id("run1"), entry.id("run1"));
        assert_ne!(entry.id("run1"), entry.id("run2"));
        assert_ne!(entry.id("run1"), other.id("run1"));

        let v = entry.to_value();
        assert_eq!(v["@timestamp"], "2024-03-01T00:00:00");
        assert_eq!(v["files"][0]["mode"], "0o644");
        assert!(v["files"][0].get("linkpath").is_none());
    }
}
