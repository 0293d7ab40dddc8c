//! Run Archiver Library
//!
//! Archive-and-verify pipeline for sequencing run directories: assemble a
//! manifest, checksum and package it into one bundle, verify the bundle by
//! extracting it, then copy it to durable storage and confirm the copy.

pub mod archive;
pub mod checksum;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod manifest;
pub mod naming;
pub mod notify;
pub mod retention;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{ArchiveError, ExitStatus};
pub type Result<T> = std::result::Result<T, ArchiveError>;
