//! Error types for the archive pipeline.
//!
//! Every stage returns [`ArchiveError`]; the binaries map it to a distinct
//! process exit status through [`ArchiveError::exit_status`].

use crate::manifest::PluginCategory;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What a manifest was missing when assembly failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingItem {
    /// A required file or directory does not exist under the run directory.
    File(PathBuf),

    /// No plugin output matched a mandatory result category.
    Category(PluginCategory),
}

impl fmt::Display for MissingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingItem::File(path) => write!(f, "required path {}", path.display()),
            MissingItem::Category(category) => write!(f, "{} output", category),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Missing data: {0}")]
    MissingData(MissingItem),

    #[error("Packaging failed: {0}")]
    Packaging(String),

    #[error("Integrity check failed for {path}: expected {expected}, got {actual} ({mismatches} mismatched)")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
        mismatches: usize,
    },

    #[error("Destination is not mounted: {0}")]
    NotMounted(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Nothing to evict under {0}")]
    NothingToEvict(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ArchiveError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ArchiveError::MissingData(_) => ExitStatus::MissingData,
            ArchiveError::Packaging(_) => ExitStatus::PackagingFailure,
            ArchiveError::Integrity { .. } => ExitStatus::IntegrityFailure,
            ArchiveError::NotMounted(_) => ExitStatus::NotMounted,
            ArchiveError::Io { .. } => ExitStatus::IoFailure,
            ArchiveError::NothingToEvict(_) => ExitStatus::NothingToEvict,
            ArchiveError::Config(_) => ExitStatus::Usage,
            ArchiveError::Cancelled => ExitStatus::Cancelled,
        }
    }
}

/// Closed set of process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Usage,
    MissingData,
    PackagingFailure,
    IntegrityFailure,
    NotMounted,
    IoFailure,
    NothingToEvict,
    Cancelled,
}

impl ExitStatus {
    pub const fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Usage => 1,
            ExitStatus::MissingData => 2,
            ExitStatus::PackagingFailure => 3,
            ExitStatus::IntegrityFailure => 4,
            ExitStatus::NotMounted => 5,
            ExitStatus::IoFailure => 6,
            ExitStatus::NothingToEvict => 7,
            ExitStatus::Cancelled => 130,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let all = [
            ExitStatus::Success,
            ExitStatus::Usage,
            ExitStatus::MissingData,
            ExitStatus::PackagingFailure,
            ExitStatus::IntegrityFailure,
            ExitStatus::NotMounted,
            ExitStatus::IoFailure,
            ExitStatus::NothingToEvict,
            ExitStatus::Cancelled,
        ];
        let mut codes: Vec<u8> = all.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_error_maps_to_exit_status() {
        let err = ArchiveError::MissingData(MissingItem::Category(PluginCategory::VariantCaller));
        assert_eq!(err.exit_status(), ExitStatus::MissingData);
        assert_eq!(err.exit_status().code(), 2);

        let err = ArchiveError::NotMounted(PathBuf::from("/mnt/archive"));
        assert_eq!(err.exit_status().code(), 5);
        assert!(err.to_string().contains("/mnt/archive"));
    }
}
