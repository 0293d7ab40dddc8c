//! Per-file checksum index over a manifest.

use super::digest::Hasher;
use super::listing::format_line;
use super::ChecksumRecord;
use crate::fs::walker::walk_directory_with_callback;
use crate::manifest::Manifest;
use crate::utils::{ArchiveError, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A concrete file to hash: its bundle path and where to read it.
#[derive(Debug, Clone)]
struct HashTarget {
    archive_path: PathBuf,
    source_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumIndex {
    records: Vec<ChecksumRecord>,
}

impl ChecksumIndex {
    /// Hash every concrete file reachable from the manifest and write the
    /// listing to `listing_path`.
    ///
    /// Symlinks are skipped wherever they appear. With `workers <= 1` files
    /// are hashed in walk order and each line is flushed as soon as it is
    /// known; otherwise a pool of `workers` threads hashes in parallel and the
    /// listing is written in walk order once every worker has finished. Any
    /// failure aborts the pass; the caller owns cleanup of the partial listing.
    pub fn compute(
        manifest: &Manifest,
        hasher: &dyn Hasher,
        listing_path: &Path,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let targets = collect_targets(manifest)?;
        info!(files = targets.len(), workers, "Computing checksums");

        let file = File::create(listing_path).map_err(|e| ArchiveError::io(listing_path, e))?;
        let mut listing = LineWriter::new(file);

        let records = if workers <= 1 {
            let mut records = Vec::with_capacity(targets.len());
            for target in &targets {
                let record = hash_target(target, hasher, cancel)?;
                writeln!(listing, "{}", format_line(&record))
                    .map_err(|e| ArchiveError::io(listing_path, e))?;
                records.push(record);
            }
            records
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| ArchiveError::Config(format!("hash worker pool: {}", e)))?;

            let records: Vec<ChecksumRecord> = pool.install(|| {
                targets
                    .par_iter()
                    .map(|target| hash_target(target, hasher, cancel))
                    .collect::<Result<Vec<_>>>()
            })?;

            for record in &records {
                writeln!(listing, "{}", format_line(record))
                    .map_err(|e| ArchiveError::io(listing_path, e))?;
            }
            records
        };

        listing.flush().map_err(|e| ArchiveError::io(listing_path, e))?;

        Ok(Self { records })
    }

    pub fn records(&self) -> &[ChecksumRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn hash_target(
    target: &HashTarget,
    hasher: &dyn Hasher,
    cancel: &CancellationToken,
) -> Result<ChecksumRecord> {
    if cancel.is_cancelled() {
        return Err(ArchiveError::Cancelled);
    }

    let digest = hasher
        .digest_file(&target.source_path)
        .map_err(|e| ArchiveError::io(&target.source_path, e))?;

    debug!(path = %target.archive_path.display(), digest = %digest, "Hashed");

    Ok(ChecksumRecord {
        path: target.archive_path.clone(),
        digest,
    })
}

/// Expand manifest entries into concrete files, in manifest order and
/// sorted walk order within directories.
fn collect_targets(manifest: &Manifest) -> Result<Vec<HashTarget>> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();

    for entry in manifest.entries().iter().filter(|e| !e.attachment) {
        let metadata = std::fs::symlink_metadata(&entry.source_path)
            .map_err(|e| ArchiveError::io(&entry.source_path, e))?;

        if metadata.file_type().is_symlink() {
            debug!(path = %entry.archive_path.display(), "Skipping symlink");
            continue;
        }

        if metadata.is_dir() {
            walk_directory_with_callback(&entry.source_path, |file| {
                let archive_path = entry.archive_path.join(&file.relative_path);
                if seen.insert(archive_path.clone()) {
                    targets.push(HashTarget {
                        archive_path,
                        source_path: file.path.clone(),
                    });
                }
            })
            .map_err(|e| ArchiveError::io(&entry.source_path, e))?;
        } else if metadata.is_file() && seen.insert(entry.archive_path.clone()) {
            targets.push(HashTarget {
                archive_path: entry.archive_path.clone(),
                source_path: entry.source_path.clone(),
            });
        }
    }

    Ok(targets)
}
