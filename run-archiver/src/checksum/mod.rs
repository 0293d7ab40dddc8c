//! Checksums: digests, the per-file index and sidecar listings.

pub mod digest;
pub mod index;
pub mod listing;

pub use digest::{Digest, Hasher, Md5Hasher};
pub use index::ChecksumIndex;
pub use listing::LISTING_NAME;

use std::path::PathBuf;

/// Digest of one concrete file, keyed by its path inside the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub path: PathBuf,
    pub digest: Digest,
}
