//! Mirror pass: make room on the destination, then copy new completed runs.

use crate::config::MirrorConfig;
use run_archiver::fs::MountGuard;
use run_archiver::naming::run_id;
use run_archiver::retention::{RetentionEntry, RetentionRotator};
use run_archiver::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct MirrorReport {
    pub evicted: Vec<RetentionEntry>,
    pub copied: Vec<String>,
    pub already_mirrored: usize,
}

#[derive(Debug, Clone)]
struct RunDir {
    name: String,
    path: PathBuf,
    run_id: u64,
}

pub struct Mirror<'a> {
    config: &'a MirrorConfig,
    cancel: CancellationToken,
}

impl<'a> Mirror<'a> {
    pub fn new(config: &'a MirrorConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Mount check, retention, then copy every completed run not yet present.
    ///
    /// Each run is copied into `<name>.partial` and renamed once complete, so
    /// an interrupted pass never leaves a directory that looks mirrored.
    pub fn run(&self) -> Result<MirrorReport> {
        let dest = &self.config.destination;
        MountGuard::new(&self.config.mounts_file, &self.config.removable_root).ensure_mounted(dest)?;

        let mut report = MirrorReport {
            evicted: RetentionRotator::new(self.config.dry_run)
                .enforce_ceiling(dest, self.config.ceiling_bytes())?,
            ..Default::default()
        };

        for run in self.completed_runs()? {
            if self.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let target = dest.join(&run.name);
            if target.exists() {
                debug!(run = %run.name, "Already mirrored");
                report.already_mirrored += 1;
                continue;
            }

            if self.config.dry_run {
                info!(run = %run.name, run_id = run.run_id, "Would copy (dry run)");
            } else {
                info!(run = %run.name, run_id = run.run_id, "Mirroring run");
                self.copy_run(&run.path, &target)?;
            }
            report.copied.push(run.name);
        }

        info!(
            copied = report.copied.len(),
            evicted = report.evicted.len(),
            already_mirrored = report.already_mirrored,
            "Mirror pass complete"
        );
        Ok(report)
    }

    /// Run directories under the source carrying the completion marker,
    /// smallest run id first.
    fn completed_runs(&self) -> Result<Vec<RunDir>> {
        let source = &self.config.source;
        let read_dir = std::fs::read_dir(source).map_err(|e| ArchiveError::io(source, e))?;

        let mut runs = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ArchiveError::io(source, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let Some(run_id) = run_id(&name) else {
                continue;
            };
            if !path.join(&self.config.completion_marker).exists() {
                debug!(run = %name, "Run not complete yet");
                continue;
            }
            runs.push(RunDir { name, path, run_id });
        }

        runs.sort_by_key(|r| r.run_id);
        Ok(runs)
    }

    fn copy_run(&self, src: &Path, target: &Path) -> Result<()> {
        let mut staging = target.as_os_str().to_owned();
        staging.push(".partial");
        let staging = PathBuf::from(staging);

        if staging.exists() {
            warn!(path = %staging.display(), "Removing leftover partial copy");
            std::fs::remove_dir_all(&staging).map_err(|e| ArchiveError::io(&staging, e))?;
        }

        copy_tree(src, &staging, &self.cancel)?;
        std::fs::rename(&staging, target).map_err(|e| ArchiveError::io(target, e))
    }
}

/// Recursive copy that recreates symlinks instead of following them.
fn copy_tree(src: &Path, dst: &Path, cancel: &CancellationToken) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            ArchiveError::io(&path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(|e| ArchiveError::io(entry.path(), e))?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target).map_err(|e| ArchiveError::io(&target, e))?;
            #[cfg(not(unix))]
            warn!(path = %entry.path().display(), link = %link.display(), "Skipping symlink");
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| ArchiveError::io(entry.path(), e))?;
        }
    }
    Ok(())
}
