//! Filesystem capacity queries.

use std::path::Path;

/// Bytes available to unprivileged writers on the filesystem holding `path`.
pub fn free_bytes(path: &Path) -> std::io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Apparent size of everything under `path`, symlinks excluded.
pub fn used_bytes(path: &Path) -> std::io::Result<u64> {
    super::walker::calculate_total_size(path)
}
