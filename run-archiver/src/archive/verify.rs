//! Extract-and-check verification of a finished bundle.

use super::packager::Packager;
use crate::checksum::{listing, Hasher, LISTING_NAME};
use crate::utils::{ArchiveError, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Unpack `bundle` into a fresh scratch directory under `scratch_parent`
/// and check every file against the bundled checksum listing.
///
/// The scratch directory is removed whether or not the check passes.
/// Returns the number of files verified.
pub fn verify_bundle(
    packager: &dyn Packager,
    hasher: &dyn Hasher,
    bundle: &Path,
    scratch_parent: &Path,
    cancel: &CancellationToken,
) -> Result<usize> {
    std::fs::create_dir_all(scratch_parent).map_err(|e| ArchiveError::io(scratch_parent, e))?;
    let scratch = tempfile::Builder::new()
        .prefix(".verify-")
        .tempdir_in(scratch_parent)
        .map_err(|e| ArchiveError::io(scratch_parent, e))?;

    let result = check_extracted(packager, hasher, bundle, scratch.path(), cancel);

    let scratch_path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(path = %scratch_path.display(), error = %e, "Failed to remove verification scratch directory");
    }

    if let Ok(verified) = &result {
        info!(bundle = %bundle.display(), files = verified, "Bundle verified");
    }
    result
}

fn check_extracted(
    packager: &dyn Packager,
    hasher: &dyn Hasher,
    bundle: &Path,
    scratch: &Path,
    cancel: &CancellationToken,
) -> Result<usize> {
    packager.extract(bundle, scratch)?;

    if cancel.is_cancelled() {
        return Err(ArchiveError::Cancelled);
    }

    let listing_path = scratch.join(LISTING_NAME);
    let content = std::fs::read_to_string(&listing_path).map_err(|e| ArchiveError::Integrity {
        path: LISTING_NAME.to_string(),
        expected: "checksum listing at bundle root".to_string(),
        actual: e.to_string(),
        mismatches: 1,
    })?;

    let records = listing::parse(&content)?;
    listing::verify_tree(scratch, &records, hasher, cancel)
}
