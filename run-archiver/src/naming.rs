//! Run directory naming conventions.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use tracing::warn;

lazy_static! {
    /// Analysis directories: `Auto_user_<NAME>_<analysis>_<result>`
    static ref AUTO_USER: Regex = Regex::new(r"^Auto_user_(.*?\w{3})_\d+_\d+/?$").unwrap();

    /// Trailing underscore-delimited run number
    static ref RUN_ID: Regex = Regex::new(r"_(\d+)$").unwrap();
}

/// Bundle name for a run directory.
///
/// `Auto_user_<NAME>_<n>_<n>` yields `<NAME>`; anything else falls back to
/// the directory name itself with a warning.
pub fn run_name(run_dir: &Path) -> String {
    let dir_name = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| run_dir.to_string_lossy().to_string());

    match AUTO_USER.captures(&dir_name).and_then(|c| c.get(1)) {
        Some(name) => name.as_str().to_string(),
        None => {
            warn!(dir = %dir_name, "Run directory does not follow the Auto_user naming; using it as-is");
            dir_name
        }
    }
}

/// Numeric run id from a name ending in `_<digits>`.
pub fn run_id(name: &str) -> Option<u64> {
    RUN_ID
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
