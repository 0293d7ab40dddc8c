//! Utility modules for the run archiver.

pub mod errors;
pub mod logger;

pub use errors::{ArchiveError, ExitStatus, MissingItem, Result};
