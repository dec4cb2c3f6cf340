//! An extracted run archive.
//!
//! [`RunArchive::open`] validates the run directory up front so that every
//! archive-level problem surfaces as a classified [`IndexError`] before a
//! single document is produced. After that the archive is read-only: the
//! producers look at its member list, its `metadata.log` and the run dates
//! computed here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::IndexError;
use crate::mdconf::{ConfigReader, MetadataLog};
use crate::timestamp::fix_date_format;

/// Kind of an archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Dir,
    File,
    Symlink,
}

/// One entry of the run tree.
#[derive(Debug, Clone)]
pub struct Member {
    /// `/`-separated path starting with the run directory name.
    pub name: String,
    pub kind: MemberKind,
    pub size: u64,
    pub mode: u32,
    pub linkpath: Option<String>,
}

impl Member {
    pub fn is_file(&self) -> bool {
        self.kind == MemberKind::File
    }

    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Parent directory name, `""` for the top-level entry.
    pub fn dirname(&self) -> &str {
        self.name.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
    }
}

#[derive(Debug)]
pub struct RunArchive {
    root: PathBuf,
    run_dir: PathBuf,
    dirname: String,
    mdconf: MetadataLog,
    start_run: String,
    end_run: String,
    date: (i32, u32, u32),
    run_id: String,
    experiment: String,
    members: Vec<Member>,
}

fn unsupported(path: &Path, reason: impl Into<String>) -> anyhow::Error {
    IndexError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

fn bad_mdlog(path: &Path, reason: impl Into<String>) -> anyhow::Error {
    IndexError::BadMetadataLog {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

fn bad_date(path: &Path, reason: impl Into<String>) -> anyhow::Error {
    IndexError::BadDate {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
    .into()
}

impl RunArchive {
    /// Open and validate an extracted run directory.
    ///
    /// `run_id` overrides the id normally read from the `.md5` file that
    /// sits next to the run (`<run>.tar.xz.md5` or `<run>.md5`).
    pub fn open(run_dir: &Path, run_id: Option<&str>) -> Result<Self> {
        if !run_dir.is_dir() {
            return Err(unsupported(run_dir, "not a directory"));
        }
        let dirname = run_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| unsupported(run_dir, "run directory name is not valid UTF-8"))?;
        let root = run_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mdlog_path = run_dir.join("metadata.log");
        if !mdlog_path.is_file() {
            return Err(unsupported(run_dir, "missing metadata.log"));
        }
        let mdconf = MetadataLog::load(&mdlog_path)
            .map_err(|e| bad_mdlog(run_dir, format!("{:#}", e)))?;

        let raw_start = mdconf
            .get("run", "start_run")
            .map_err(|e| bad_mdlog(run_dir, e.to_string()))?;
        let raw_end = mdconf
            .get("run", "end_run")
            .map_err(|e| bad_mdlog(run_dir, e.to_string()))?;
        let experiment = mdconf
            .get("pbench", "name")
            .map_err(|e| bad_mdlog(run_dir, e.to_string()))?;

        let start_run =
            fix_date_format(&raw_start).map_err(|e| bad_date(run_dir, e.to_string()))?;
        let end_run = fix_date_format(&raw_end).map_err(|e| bad_date(run_dir, e.to_string()))?;
        let date = split_date(&start_run)
            .ok_or_else(|| bad_date(run_dir, format!("bad start_run '{}'", start_run)))?;

        let run_id = match run_id {
            Some(id) => id.to_string(),
            None => read_md5(&root, &dirname)?,
        };

        let members = scan_members(&root, run_dir)?;
        debug!(run = %dirname, members = members.len(), "Opened run archive");

        Ok(Self {
            root,
            run_dir: run_dir.to_path_buf(),
            dirname,
            mdconf,
            start_run,
            end_run,
            date,
            run_id,
            experiment,
            members,
        })
    }

    pub fn dirname(&self) -> &str {
        &self.dirname
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn mdconf(&self) -> &MetadataLog {
        &self.mdconf
    }

    /// Normalized `[run] start_run`, UTC.
    pub fn start_run(&self) -> &str {
        &self.start_run
    }

    pub fn end_run(&self) -> &str {
        &self.end_run
    }

    /// `(year, month, day)` of the run start.
    pub fn date(&self) -> (i32, u32, u32) {
        self.date
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `[pbench] name`.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Filesystem path of a member name.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Files whose parent directory is exactly `dir` (a member name).
    pub fn files_in<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a Member> + 'a {
        self.members
            .iter()
            .filter(move |m| m.is_file() && m.dirname() == dir)
    }

    /// Last modification day of the run directory, `YYYY-MM-DD`.
    pub fn file_date(&self) -> String {
        std::fs::metadata(&self.run_dir)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

fn split_date(ts: &str) -> Option<(i32, u32, u32)> {
    let day = ts.split('T').next()?;
    let mut parts = day.split('-');
    let y = parts.next()?.parse().ok()?;
    let m = parts.next()?.parse().ok()?;
    let d = parts.next()?.parse().ok()?;
    Some((y, m, d))
}

fn read_md5(root: &Path, dirname: &str) -> Result<String> {
    let candidates = [
        root.join(format!("{}.tar.xz.md5", dirname)),
        root.join(format!("{}.md5", dirname)),
    ];
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        return Err(IndexError::FileNotFound(candidates[0].clone()).into());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    text.split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| unsupported(path, "empty md5 file"))
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn scan_members(root: &Path, run_dir: &Path) -> Result<Vec<Member>> {
    let mut members = Vec::new();
    for entry in WalkDir::new(run_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", run_dir.display()))?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let meta = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let file_type = entry.file_type();
        let (kind, linkpath) = if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map(|t| t.to_string_lossy().into_owned())
                .ok();
            (MemberKind::Symlink, target)
        } else if file_type.is_dir() {
            (MemberKind::Dir, None)
        } else {
            (MemberKind::File, None)
        };
        members.push(Member {
            name,
            kind,
            size: if kind == MemberKind::File { meta.len() } else { 0 },
            mode: mode_of(&meta),
            linkpath,
        });
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_run(tmp: &TempDir, mdlog: &str) -> PathBuf {
        let run = tmp.path().join("fio_run_2024.03.01");
        fs::create_dir_all(run.join("1-rw/sample1")).unwrap();
        fs::write(run.join("metadata.log"), mdlog).unwrap();
        fs::write(run.join("1-rw/sample1/result.json"), "{}").unwrap();
        run
    }

    const MDLOG: &str = "[pbench]\nname = fio\n\n[run]\nstart_run = 2024-03-01_10:00:00.5\nend_run = 2024-03-01T11:00:00.25\n";

    fn exit_code(err: &anyhow::Error) -> Option<u8> {
        err.downcast_ref::<IndexError>().map(|e| e.exit_code())
    }

    #[test]
    fn open_valid_run() {
        let tmp = TempDir::new().unwrap();
        let run = write_run(&tmp, MDLOG);
        fs::write(tmp.path().join("fio_run_2024.03.01.tar.xz.md5"), "abc123  fio_run.tar.xz\n").unwrap();

        let ar = RunArchive::open(&run, None).unwrap();
        assert_eq!(ar.run_id(), "abc123");
        assert_eq!(ar.start_run(), "2024-03-01T10:00:00.5");
        assert_eq!(ar.date(), (2024, 3, 1));
        assert_eq!(ar.experiment(), "fio");
        assert_eq!(ar.members()[0].name, "fio_run_2024.03.01");
        assert!(ar
            .members()
            .iter()
            .any(|m| m.name == "fio_run_2024.03.01/1-rw/sample1/result.json" && m.size == 2));
        let files: Vec<_> = ar.files_in("fio_run_2024.03.01/1-rw/sample1").collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn run_id_argument_wins_over_md5_file() {
        let tmp = TempDir::new().unwrap();
        let run = write_run(&tmp, MDLOG);
        let ar = RunArchive::open(&run, Some("given")).unwrap();
        assert_eq!(ar.run_id(), "given");
    }

    #[test]
    fn classified_failures() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert_eq!(exit_code(&RunArchive::open(&missing, Some("x")).unwrap_err()), Some(4));

        let run = write_run(&tmp, MDLOG);
        assert_eq!(exit_code(&RunArchive::open(&run, None).unwrap_err()), Some(6));

        fs::write(run.join("metadata.log"), "[pbench]\nname = fio\n").unwrap();
        assert_eq!(exit_code(&RunArchive::open(&run, Some("x")).unwrap_err()), Some(7));

        fs::write(run.join("metadata.log"), "garbage without section\n").unwrap();
        assert_eq!(exit_code(&RunArchive::open(&run, Some("x")).unwrap_err()), Some(7));

        fs::write(
            run.join("metadata.log"),
            "[pbench]\nname = fio\n[run]\nstart_run = someday\nend_run = later\n",
        )
        .unwrap();
        assert_eq!(exit_code(&RunArchive::open(&run, Some("x")).unwrap_err()), Some(5));

        fs::remove_file(run.join("metadata.log")).unwrap();
        assert_eq!(exit_code(&RunArchive::open(&run, Some("x")).unwrap_err()), Some(4));
    }
}
