//! Archive manifests.
//!
//! A manifest is the frozen, duplicate-free list of paths slated for one
//! bundle. Entries are stored relative to the run directory; attachments
//! (such as the checksum listing) live outside it and are mapped to a name
//! at the bundle root.

pub mod builder;
pub mod category;
pub mod profile;

pub use builder::ManifestBuilder;
pub use category::{PluginCategory, UnknownPluginPolicy};
pub use profile::{ManifestProfile, PathGroup, Platform, RunContext, SoftwareVersion, Strictness};

use crate::utils::{ArchiveError, MissingItem, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One member of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path stored in the bundle
    pub archive_path: PathBuf,

    /// Where the member is read from
    pub source_path: PathBuf,

    /// Attachments are packaged but never checksummed
    pub attachment: bool,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    root: PathBuf,
    entries: Vec<ManifestEntry>,
    seen: HashSet<PathBuf>,
}

impl Manifest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Build a manifest from relative paths, collapsing duplicates.
    pub fn from_paths<I, P>(root: impl Into<PathBuf>, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut manifest = Self::new(root);
        for path in paths {
            manifest.push(path);
        }
        manifest
    }

    /// Append a path relative to the root. Returns false for a duplicate.
    pub fn push(&mut self, relative: impl AsRef<Path>) -> bool {
        let relative = relative.as_ref().to_path_buf();
        let source = self.root.join(&relative);
        self.insert(ManifestEntry {
            archive_path: relative,
            source_path: source,
            attachment: false,
        })
    }

    /// Append an out-of-tree file stored under `archive_name` in the bundle.
    pub fn attach(&mut self, archive_name: impl AsRef<Path>, source: impl Into<PathBuf>) -> bool {
        self.insert(ManifestEntry {
            archive_path: archive_name.as_ref().to_path_buf(),
            source_path: source.into(),
            attachment: true,
        })
    }

    fn insert(&mut self, entry: ManifestEntry) -> bool {
        if !self.seen.insert(entry.archive_path.clone()) {
            tracing::debug!(path = %entry.archive_path.display(), "Skipping duplicate manifest entry");
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Check that every entry resolves to an existing filesystem object.
    pub fn freeze(self) -> Result<Self> {
        for entry in &self.entries {
            if std::fs::symlink_metadata(&entry.source_path).is_err() {
                return Err(ArchiveError::MissingData(MissingItem::File(
                    entry.archive_path.clone(),
                )));
            }
        }
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn contains(&self, archive_path: impl AsRef<Path>) -> bool {
        self.seen.contains(archive_path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_duplicates_are_collapsed() {
        let mut manifest = Manifest::new("/runs/R1");
        assert!(manifest.push("a.txt"));
        assert!(manifest.push("dir"));
        assert!(!manifest.push("a.txt"));
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].source_path, PathBuf::from("/runs/R1/a.txt"));
    }

    #[test]
    fn test_attachment_is_marked() {
        let mut manifest = Manifest::new("/runs/R1");
        manifest.attach("checksum-listing", "/work/checksum-listing");
        let entry = &manifest.entries()[0];
        assert!(entry.attachment);
        assert_eq!(entry.source_path, PathBuf::from("/work/checksum-listing"));
        assert!(manifest.contains("checksum-listing"));
    }

    #[test]
    fn test_freeze_rejects_missing_entry() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("present.txt"), b"x")?;

        let manifest = Manifest::from_paths(temp_dir.path(), ["present.txt", "absent.txt"]);
        match manifest.freeze() {
            Err(ArchiveError::MissingData(MissingItem::File(path))) => {
                assert_eq!(path, PathBuf::from("absent.txt"));
            }
            other => panic!("expected MissingData, got {:?}", other),
        }

        let manifest = Manifest::from_paths(temp_dir.path(), ["present.txt"]);
        assert!(manifest.freeze().is_ok());
        Ok(())
    }
}
