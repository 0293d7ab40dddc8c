//! Checksum, package and self-verify a manifest into a single bundle.

use super::packager::{write_member_list, Packager};
use super::verify::verify_bundle;
use crate::checksum::{ChecksumIndex, Hasher, LISTING_NAME};
use crate::manifest::Manifest;
use crate::utils::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Staging directory for the bundle, member list and listing
    pub work_dir: PathBuf,

    /// Parent of the verification scratch directory
    pub scratch_dir: PathBuf,

    /// Checksum worker threads
    pub hash_workers: usize,
}

/// A bundle that has passed its extract-and-verify check.
#[derive(Debug)]
pub struct ArchiveBundle {
    pub path: PathBuf,

    /// Filesystem objects stored, directories included
    pub members: usize,

    pub index: ChecksumIndex,
}

impl ArchiveBundle {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Staged files removed on drop unless they were renamed away first.
struct StagedFiles(Vec<PathBuf>);

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}

pub struct ArchiveBuilder<'a> {
    packager: &'a dyn Packager,
    hasher: &'a dyn Hasher,
    options: ArchiveOptions,
    cancel: CancellationToken,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(
        packager: &'a dyn Packager,
        hasher: &'a dyn Hasher,
        options: ArchiveOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            packager,
            hasher,
            options,
            cancel,
        }
    }

    /// Build `<work_dir>/<output_name><ext>` from the manifest.
    ///
    /// The bundle is written under a `.partial` name and only renamed into
    /// place after the extract-and-verify check passes. On any failure the
    /// partial bundle, member list and listing are removed.
    pub fn create(&self, mut manifest: Manifest, output_name: &str) -> Result<ArchiveBundle> {
        let work_dir = &self.options.work_dir;
        std::fs::create_dir_all(work_dir).map_err(|e| ArchiveError::io(work_dir, e))?;

        let bundle_name = format!("{}{}", output_name, self.packager.extension());
        let bundle_path = work_dir.join(&bundle_name);
        let partial_path = work_dir.join(format!("{}.partial", bundle_name));
        let listing_path = work_dir.join(format!("{}.{}", output_name, LISTING_NAME));
        let list_path = work_dir.join(format!("{}.members", output_name));

        let _staged = StagedFiles(vec![
            partial_path.clone(),
            listing_path.clone(),
            list_path.clone(),
        ]);

        // Step 1: checksum index, then the listing joins the bundle
        let index = ChecksumIndex::compute(
            &manifest,
            self.hasher,
            &listing_path,
            self.options.hash_workers,
            &self.cancel,
        )?;

        if !manifest.attach(LISTING_NAME, &listing_path) {
            return Err(ArchiveError::Packaging(format!(
                "run already contains a top-level {}",
                LISTING_NAME
            )));
        }

        // Step 2: package through the member list file
        let listed = write_member_list(&list_path, manifest.entries())?;
        info!(bundle = %bundle_name, members = listed, "Packaging bundle");
        let members = self
            .packager
            .create(&list_path, &partial_path, &self.cancel)?;

        // Step 3: extract into scratch and check against the listing
        let verified = verify_bundle(
            self.packager,
            self.hasher,
            &partial_path,
            &self.options.scratch_dir,
            &self.cancel,
        )?;
        if verified != index.len() {
            return Err(ArchiveError::Integrity {
                path: LISTING_NAME.to_string(),
                expected: format!("{} files", index.len()),
                actual: format!("{} files", verified),
                mismatches: index.len().abs_diff(verified),
            });
        }

        std::fs::rename(&partial_path, &bundle_path)
            .map_err(|e| ArchiveError::io(&bundle_path, e))?;

        info!(bundle = %bundle_path.display(), members, files = index.len(), "Bundle created");

        Ok(ArchiveBundle {
            path: bundle_path,
            members,
            index,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.options.work_dir
    }
}
