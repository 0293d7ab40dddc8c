//! Destination mount checks.
//!
//! The check is advisory: nothing stops the filesystem from going away
//! between the check and the copy.

use crate::config::MountConfig;
use crate::utils::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MountGuard {
    mounts_file: PathBuf,
    removable_root: PathBuf,
}

impl MountGuard {
    pub fn new(mounts_file: impl Into<PathBuf>, removable_root: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
            removable_root: removable_root.into(),
        }
    }

    pub fn from_config(config: &MountConfig) -> Self {
        Self::new(&config.mounts_file, &config.removable_root)
    }

    /// Succeeds when `path` is a mount target, or exists and does not sit
    /// directly under the removable media root.
    pub fn ensure_mounted(&self, path: &Path) -> Result<()> {
        let target = strip_trailing_separator(path);

        match self.mount_points() {
            Ok(points) => {
                if points.iter().any(|p| *p == target) {
                    debug!(path = %target.display(), "Destination is a mount point");
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(mounts = %self.mounts_file.display(), error = %e, "Cannot read mount table, falling back to existence check");
            }
        }

        let parent_is_removable = target
            .parent()
            .map(|parent| parent == strip_trailing_separator(&self.removable_root))
            .unwrap_or(false);

        if target.exists() && !parent_is_removable {
            debug!(path = %target.display(), "Destination exists, treating as accessible");
            return Ok(());
        }

        Err(ArchiveError::NotMounted(target))
    }

    /// Mount targets listed in the mount table
    pub fn mount_points(&self) -> std::io::Result<Vec<PathBuf>> {
        let content = std::fs::read_to_string(&self.mounts_file)?;
        Ok(parse_mount_table(&content))
    }
}

/// Extract mount targets (second field) from `/proc/mounts` content.
pub fn parse_mount_table(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|target| strip_trailing_separator(Path::new(&unescape_mount_path(target))))
        .collect()
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn strip_trailing_separator(path: &Path) -> PathBuf {
    let rendered = path.to_string_lossy();
    let trimmed = rendered.trim_end_matches('/');
    if trimmed.is_empty() && rendered.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MOUNTS: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
//nas/archive /mnt/archive cifs rw,relatime 0 0
/dev/sdb1 /media/Ion\\040Backup ext4 rw,relatime 0 0
";

    #[test]
    fn test_parse_mount_table() {
        let points = parse_mount_table(MOUNTS);
        assert_eq!(points.len(), 4);
        assert!(points.contains(&PathBuf::from("/mnt/archive")));
        assert!(points.contains(&PathBuf::from("/media/Ion Backup")));
        assert!(points.contains(&PathBuf::from("/")));
    }

    #[test]
    fn test_mounted_path_with_trailing_slash() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let mounts = temp_dir.path().join("mounts");
        fs::write(&mounts, MOUNTS)?;

        let guard = MountGuard::new(&mounts, "/media");
        assert!(guard.ensure_mounted(Path::new("/mnt/archive/")).is_ok());
        assert!(guard.ensure_mounted(Path::new("/media/Ion Backup")).is_ok());
        Ok(())
    }

    #[test]
    fn test_existing_local_directory_is_accessible() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let mounts = temp_dir.path().join("mounts");
        fs::write(&mounts, MOUNTS)?;
        let dest = temp_dir.path().join("archive");
        fs::create_dir(&dest)?;

        let guard = MountGuard::new(&mounts, "/media");
        assert!(guard.ensure_mounted(&dest).is_ok());
        Ok(())
    }

    #[test]
    fn test_unmounted_removable_media_is_rejected() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let mounts = temp_dir.path().join("mounts");
        fs::write(&mounts, MOUNTS)?;
        let media_root = temp_dir.path().join("media");
        let stale_mount_point = media_root.join("usb0");
        fs::create_dir_all(&stale_mount_point)?;

        let guard = MountGuard::new(&mounts, &media_root);
        match guard.ensure_mounted(&stale_mount_point) {
            Err(ArchiveError::NotMounted(path)) => assert_eq!(path, stale_mount_point),
            other => panic!("expected NotMounted, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_missing_destination_is_rejected() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let guard = MountGuard::new(temp_dir.path().join("no-mounts"), "/media");
        let missing = temp_dir.path().join("gone");
        assert!(matches!(
            guard.ensure_mounted(&missing),
            Err(ArchiveError::NotMounted(_))
        ));
        Ok(())
    }
}
