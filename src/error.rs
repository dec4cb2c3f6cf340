//! Archive-level fatal errors.
//!
//! Anything in this enum aborts the whole run. Per-record and per-file
//! problems never end up here; they are tallied on a
//! [`Counters`](crate::counters::Counters) context instead.
//!
//! The classification is consumed upstream to decide whether an archive
//! is worth retrying, so every variant maps to a stable exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that abort indexing of a run archive.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("bad configuration file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("unsupported archive format, {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("bad date in {path}: {reason}")]
    BadDate { path: PathBuf, reason: String },

    #[error("no such file: {0}")]
    FileNotFound(PathBuf),

    #[error("the metadata.log file is malformed in {path}: {reason}")]
    BadMetadataLog { path: PathBuf, reason: String },

    #[error("bad hostname in sosreport {name}: {reason}")]
    SosreportHostname { name: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Process exit status for this failure class.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 3 | Bad configuration file |
    /// | 4 | Archive has no `metadata.log` or an unexpected layout |
    /// | 5 | Bad `start_run` / `end_run` date |
    /// | 6 | A required file is missing |
    /// | 7 | `metadata.log` cannot be parsed |
    /// | 10 | Sosreport without a usable hostname |
    /// | 12 | Anything else |
    pub fn exit_code(&self) -> u8 {
        match self {
            IndexError::ConfigFile { .. } => 3,
            IndexError::UnsupportedFormat { .. } => 4,
            IndexError::BadDate { .. } => 5,
            IndexError::FileNotFound(_) => 6,
            IndexError::BadMetadataLog { .. } => 7,
            IndexError::SosreportHostname { .. } => 10,
            IndexError::Other(_) => 12,
        }
    }

    /// Whether re-running the same archive later could succeed.
    ///
    /// Format and configuration problems are properties of the input and
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Other(_))
    }
}

/// Exit status used when the sink reported failed submissions.
pub const EXIT_INDEXING_FAILURES: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            IndexError::ConfigFile {
                path: "c".into(),
                reason: String::new(),
            },
            IndexError::UnsupportedFormat {
                path: "a".into(),
                reason: String::new(),
            },
            IndexError::BadDate {
                path: "a".into(),
                reason: String::new(),
            },
            IndexError::FileNotFound("x".into()),
            IndexError::BadMetadataLog {
                path: "a".into(),
                reason: String::new(),
            },
            IndexError::SosreportHostname {
                name: "s".into(),
                reason: String::new(),
            },
            IndexError::Other("boom".into()),
        ];
        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&EXIT_INDEXING_FAILURES));
    }

    #[test]
    fn only_operational_errors_are_retryable() {
        assert!(IndexError::Other("x".into()).is_retryable());
        assert!(!IndexError::FileNotFound("x".into()).is_retryable());
        assert!(!IndexError::BadDate {
            path: "a".into(),
            reason: "b".into()
        }
        .is_retryable());
    }
}
