//! Sidecar checksum listings in `md5sum` format (`<digest>  <path>`).
//!
//! Paths containing a backslash, newline or carriage return are written the
//! way GNU md5sum writes them: the line starts with `\` and those three
//! characters are escaped in the path.

use super::digest::{Digest, Hasher};
use super::ChecksumRecord;
use crate::utils::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Name of the listing at the root of every bundle
pub const LISTING_NAME: &str = "checksum-listing";

pub fn format_line(record: &ChecksumRecord) -> String {
    let path = record.path.to_string_lossy();
    if !path.contains(&['\\', '\n', '\r'][..]) {
        return format!("{}  {}", record.digest, path);
    }

    let mut escaped = String::with_capacity(path.len() + 4);
    for c in path.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    format!("\\{}  {}", record.digest, escaped)
}

fn unescape(path: &str) -> Option<String> {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Parse listing content. Blank lines are ignored; anything else that is
/// not `<digest>  <path>` is an integrity failure.
pub fn parse(content: &str) -> Result<Vec<ChecksumRecord>> {
    let mut records = Vec::new();

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let malformed = || ArchiveError::Integrity {
            path: format!("{} line {}", LISTING_NAME, number + 1),
            expected: "<digest>  <path>".to_string(),
            actual: line.to_string(),
            mismatches: 1,
        };

        let (escaped, body) = match line.strip_prefix('\\') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (digest, path) = body.split_once("  ").ok_or_else(malformed)?;
        let digest: Digest = digest.parse().map_err(|_| malformed())?;
        if path.is_empty() {
            return Err(malformed());
        }
        let path = if escaped {
            unescape(path).ok_or_else(malformed)?
        } else {
            path.to_string()
        };

        records.push(ChecksumRecord {
            path: PathBuf::from(path),
            digest,
        });
    }

    Ok(records)
}

/// Rehash every listed file under `root` and compare.
///
/// All records are checked so the failure can report how many mismatched,
/// but a single mismatch fails the whole pass. Returns the number of files
/// verified.
pub fn verify_tree(
    root: &Path,
    records: &[ChecksumRecord],
    hasher: &dyn Hasher,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut first_mismatch: Option<(String, String, String)> = None;
    let mut mismatches = 0usize;

    for record in records {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let path = root.join(&record.path);
        let actual = match hasher.digest_file(&path) {
            Ok(digest) => digest.to_string(),
            Err(e) => format!("unreadable ({})", e),
        };

        if actual != record.digest.as_str() {
            warn!(path = %record.path.display(), expected = %record.digest, actual = %actual, "Checksum mismatch");
            mismatches += 1;
            if first_mismatch.is_none() {
                first_mismatch = Some((
                    record.path.to_string_lossy().to_string(),
                    record.digest.to_string(),
                    actual,
                ));
            }
        }
    }

    match first_mismatch {
        Some((path, expected, actual)) => Err(ArchiveError::Integrity {
            path,
            expected,
            actual,
            mismatches,
        }),
        None => Ok(records.len()),
    }
}
