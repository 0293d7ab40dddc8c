//! Run-number ordered eviction for mirrored destinations.
//!
//! Datasets are ordered by the run number at the end of their name, not by
//! modification time: a reanalysis created today can still belong to an
//! old run.

use crate::fs::space::used_bytes;
use crate::naming::run_id;
use crate::transfer::progress::format_bytes;
use crate::utils::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const GIB: u64 = 1024 * 1024 * 1024;

/// Ceiling in bytes for a size given in GiB, clamped at `u64::MAX`.
pub fn ceiling_from_gib(gib: u64) -> u64 {
    gib.saturating_mul(GIB)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionEntry {
    pub name: String,
    pub path: PathBuf,
    pub run_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionRotator {
    dry_run: bool,
}

impl RetentionRotator {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Immediate child directories ending in `_<digits>`, smallest run id first.
    pub fn candidates(&self, destination: &Path) -> Result<Vec<RetentionEntry>> {
        let read_dir =
            std::fs::read_dir(destination).map_err(|e| ArchiveError::io(destination, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ArchiveError::io(destination, e))?;
            let file_type = entry.file_type().map_err(|e| ArchiveError::io(entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(run_id) = run_id(&name) {
                entries.push(RetentionEntry {
                    name,
                    path: entry.path(),
                    run_id,
                });
            }
        }

        entries.sort_by(|a, b| a.run_id.cmp(&b.run_id).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Delete the dataset with the smallest run id.
    pub fn evict_oldest(&self, destination: &Path) -> Result<RetentionEntry> {
        let oldest = self
            .candidates(destination)?
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::NothingToEvict(destination.to_path_buf()))?;

        self.remove(&oldest)?;
        Ok(oldest)
    }

    /// Evict oldest-first while the destination uses more than `ceiling_bytes`.
    ///
    /// In dry-run mode nothing is deleted; the evicted sizes are subtracted
    /// from the measured usage instead so the listing matches a real pass.
    pub fn enforce_ceiling(&self, destination: &Path, ceiling_bytes: u64) -> Result<Vec<RetentionEntry>> {
        let mut used = used_bytes(destination).map_err(|e| ArchiveError::io(destination, e))?;
        let mut candidates = self.candidates(destination)?.into_iter();
        let mut evicted = Vec::new();

        info!(
            dest = %destination.display(),
            used = %format_bytes(used),
            ceiling = %format_bytes(ceiling_bytes),
            "Checking destination usage"
        );

        while used > ceiling_bytes {
            let Some(entry) = candidates.next() else {
                return Err(ArchiveError::NothingToEvict(destination.to_path_buf()));
            };

            if self.dry_run {
                let size = used_bytes(&entry.path).map_err(|e| ArchiveError::io(&entry.path, e))?;
                self.remove(&entry)?;
                used = used.saturating_sub(size);
            } else {
                self.remove(&entry)?;
                used = used_bytes(destination).map_err(|e| ArchiveError::io(destination, e))?;
            }
            evicted.push(entry);
        }

        Ok(evicted)
    }

    fn remove(&self, entry: &RetentionEntry) -> Result<()> {
        if self.dry_run {
            info!(dataset = %entry.name, run_id = entry.run_id, "Would evict (dry run)");
            return Ok(());
        }

        warn!(dataset = %entry.name, run_id = entry.run_id, "Evicting dataset");
        std::fs::remove_dir_all(&entry.path).map_err(|e| ArchiveError::io(&entry.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn dataset(root: &Path, name: &str, bytes: usize, age: Duration) -> std::io::Result<()> {
        let dir = root.join(name);
        fs::create_dir(&dir)?;
        fs::write(dir.join("data.bin"), vec![0u8; bytes])?;
        fs::File::open(&dir)?.set_modified(SystemTime::now() - age)?;
        Ok(())
    }

    #[test]
    fn test_evicts_smallest_run_id_regardless_of_mtime() -> std::io::Result<()> {
        let dest = TempDir::new()?;
        // 099 is the newest on disk but the oldest run
        dataset(dest.path(), "Auto_user_SN2_105", 10, Duration::from_secs(3600))?;
        dataset(dest.path(), "Auto_user_SN2_203", 10, Duration::from_secs(7200))?;
        dataset(dest.path(), "Auto_user_SN2_099", 10, Duration::ZERO)?;
        fs::create_dir(dest.path().join("lost+found"))?;

        let evicted = RetentionRotator::default().evict_oldest(dest.path()).unwrap();
        assert_eq!(evicted.run_id, 99);
        assert_eq!(evicted.name, "Auto_user_SN2_099");
        assert!(!dest.path().join("Auto_user_SN2_099").exists());
        assert!(dest.path().join("Auto_user_SN2_105").exists());
        assert!(dest.path().join("lost+found").exists());
        Ok(())
    }

    #[test]
    fn test_ceiling_from_gib_saturates() {
        assert_eq!(ceiling_from_gib(2), 2 * 1024 * 1024 * 1024);
        assert_eq!(ceiling_from_gib(u64::MAX / 1024), u64::MAX);
    }

    #[test]
    fn test_nothing_to_evict() -> std::io::Result<()> {
        let dest = TempDir::new()?;
        fs::create_dir(dest.path().join("scratch"))?;
        fs::write(dest.path().join("notes_12"), b"a file, not a dataset")?;

        let err = RetentionRotator::default().evict_oldest(dest.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::NothingToEvict(_)));
        Ok(())
    }

    #[test]
    fn test_enforce_ceiling_stops_once_under() -> std::io::Result<()> {
        let dest = TempDir::new()?;
        dataset(dest.path(), "R_1", 1000, Duration::ZERO)?;
        dataset(dest.path(), "R_2", 1000, Duration::ZERO)?;
        dataset(dest.path(), "R_3", 1000, Duration::ZERO)?;

        let evicted = RetentionRotator::default().enforce_ceiling(dest.path(), 2000).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].run_id, 1);
        assert!(dest.path().join("R_2").exists());
        Ok(())
    }

    #[test]
    fn test_dry_run_lists_without_deleting() -> std::io::Result<()> {
        let dest = TempDir::new()?;
        dataset(dest.path(), "R_1", 1000, Duration::ZERO)?;
        dataset(dest.path(), "R_2", 1000, Duration::ZERO)?;
        dataset(dest.path(), "R_3", 1000, Duration::ZERO)?;

        let evicted = RetentionRotator::new(true).enforce_ceiling(dest.path(), 1000).unwrap();
        let ids: Vec<u64> = evicted.iter().map(|e| e.run_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(dest.path().join("R_1").exists());
        assert!(dest.path().join("R_2").exists());
        Ok(())
    }

    #[test]
    fn test_ceiling_unreachable_is_nothing_to_evict() -> std::io::Result<()> {
        let dest = TempDir::new()?;
        fs::write(dest.path().join("loose.bin"), vec![0u8; 5000])?;
        dataset(dest.path(), "R_1", 10, Duration::ZERO)?;

        let err = RetentionRotator::default().enforce_ceiling(dest.path(), 100).unwrap_err();
        assert!(matches!(err, ArchiveError::NothingToEvict(_)));
        assert!(!dest.path().join("R_1").exists());
        Ok(())
    }
}
