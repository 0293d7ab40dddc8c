//! Copy a finished bundle to durable storage and confirm it arrived intact.

use super::copier::Copier;
use crate::archive::ArchiveBundle;
use crate::checksum::{Digest, Hasher};
use crate::fs::space;
use crate::transfer::progress::format_bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Destination copy verified and local bundle released
    Committed,
    /// Destination digest differs; both copies kept
    DigestMismatch,
    /// The copy never completed
    CopyFailed,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub digest: Option<Digest>,
    /// Final bundle path, or the kept `.partial` copy after a mismatch
    pub destination: PathBuf,
    pub diagnostic: String,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Committed
    }

    fn failed(status: TransferStatus, destination: PathBuf, diagnostic: String) -> Self {
        Self {
            status,
            digest: None,
            destination,
            diagnostic,
        }
    }
}

pub struct TransferVerifier<'a> {
    copier: &'a dyn Copier,
    hasher: &'a dyn Hasher,
    keep_local: bool,
    check_free_space: bool,
    cancel: CancellationToken,
}

impl<'a> TransferVerifier<'a> {
    pub fn new(copier: &'a dyn Copier, hasher: &'a dyn Hasher, cancel: CancellationToken) -> Self {
        Self {
            copier,
            hasher,
            keep_local: false,
            check_free_space: true,
            cancel,
        }
    }

    pub fn keep_local(mut self, keep_local: bool) -> Self {
        self.keep_local = keep_local;
        self
    }

    pub fn check_free_space(mut self, check: bool) -> Self {
        self.check_free_space = check;
        self
    }

    /// Copy `bundle` to `<destination_root>[/<case_id>]/` and compare digests.
    ///
    /// The copy lands as `<bundle>.partial` and is renamed onto the final
    /// name only after its digest equals the pre-copy digest. A failed copy
    /// removes the partial; on a mismatch both copies stay in place. The
    /// local bundle is deleted only after the rename.
    pub fn commit(
        &self,
        bundle: ArchiveBundle,
        destination_root: &Path,
        case_id: Option<&str>,
    ) -> TransferOutcome {
        let target_dir = match case_id {
            Some(case) => destination_root.join(case),
            None => destination_root.to_path_buf(),
        };
        let destination = target_dir.join(bundle.file_name());

        let expected = match self.hasher.digest_file(&bundle.path) {
            Ok(digest) => digest,
            Err(e) => {
                return TransferOutcome::failed(
                    TransferStatus::CopyFailed,
                    destination,
                    format!("cannot read {}: {}", bundle.path.display(), e),
                );
            }
        };

        match std::fs::create_dir(&target_dir) {
            Ok(()) => info!(dir = %target_dir.display(), "Created destination directory"),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                info!(dir = %target_dir.display(), "Destination directory already exists");
            }
            Err(e) => {
                return TransferOutcome::failed(
                    TransferStatus::CopyFailed,
                    destination,
                    format!("cannot create {}: {}", target_dir.display(), e),
                );
            }
        }

        if self.check_free_space {
            if let Err(diagnostic) = self.ensure_room(&bundle.path, &target_dir) {
                return TransferOutcome::failed(TransferStatus::CopyFailed, destination, diagnostic);
            }
        }

        // The committed name only ever holds a verified copy.
        let staging = partial_path(&destination);
        info!(src = %bundle.path.display(), dst = %staging.display(), "Copying bundle");
        if let Err(e) = self.copier.copy(&bundle.path, &staging, &self.cancel) {
            error!(dst = %staging.display(), error = %e, "Bundle copy failed");
            discard(&staging);
            return TransferOutcome::failed(
                TransferStatus::CopyFailed,
                destination,
                format!("copy failed: {}", e),
            );
        }

        let actual = match self.hasher.digest_file(&staging) {
            Ok(digest) => digest,
            Err(e) => {
                discard(&staging);
                return TransferOutcome::failed(
                    TransferStatus::CopyFailed,
                    destination,
                    format!("cannot read back {}: {}", staging.display(), e),
                );
            }
        };

        if actual != expected {
            error!(
                local = %bundle.path.display(),
                remote = %staging.display(),
                expected = %expected,
                actual = %actual,
                "Bundle digest mismatch after copy; keeping both copies"
            );
            return TransferOutcome {
                status: TransferStatus::DigestMismatch,
                digest: Some(expected.clone()),
                diagnostic: format!("expected {}, destination copy has {}", expected, actual),
                destination: staging,
            };
        }

        if let Err(e) = std::fs::rename(&staging, &destination) {
            error!(src = %staging.display(), dst = %destination.display(), error = %e, "Cannot move verified copy into place");
            discard(&staging);
            return TransferOutcome::failed(
                TransferStatus::CopyFailed,
                destination,
                format!("cannot rename {}: {}", staging.display(), e),
            );
        }

        self.write_digest_file(&destination, &expected);

        if !self.keep_local {
            if let Err(e) = std::fs::remove_file(&bundle.path) {
                warn!(path = %bundle.path.display(), error = %e, "Failed to remove local bundle");
            }
        }

        info!(dst = %destination.display(), digest = %expected, "Bundle committed");
        TransferOutcome {
            status: TransferStatus::Committed,
            digest: Some(expected),
            diagnostic: String::new(),
            destination,
        }
    }

    fn ensure_room(&self, bundle: &Path, target_dir: &Path) -> Result<(), String> {
        let needed = std::fs::metadata(bundle)
            .map_err(|e| format!("cannot stat {}: {}", bundle.display(), e))?
            .len();
        match space::free_bytes(target_dir) {
            Ok(free) if free < needed => Err(format!(
                "destination has {} free, bundle needs {}",
                format_bytes(free),
                format_bytes(needed)
            )),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(dir = %target_dir.display(), error = %e, "Cannot query free space; copying anyway");
                Ok(())
            }
        }
    }

    /// `<bundle>.md5` beside the destination copy, md5sum format.
    fn write_digest_file(&self, destination: &Path, digest: &Digest) {
        let Some(name) = destination.file_name() else {
            return;
        };
        let mut sidecar = destination.as_os_str().to_owned();
        sidecar.push(".md5");
        let content = format!("{}  {}\n", digest, name.to_string_lossy());
        if let Err(e) = std::fs::write(&sidecar, content) {
            warn!(path = ?sidecar, error = %e, "Failed to write digest file");
        }
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut staging = destination.as_os_str().to_owned();
    staging.push(".partial");
    PathBuf::from(staging)
}

fn discard(staging: &Path) {
    match std::fs::remove_file(staging) {
        Ok(()) => info!(path = %staging.display(), "Removed incomplete copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "Failed to remove incomplete copy"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{ChecksumIndex, Md5Hasher};
    use crate::transfer::copier::FsCopier;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn bundle_in(dir: &Path) -> io::Result<ArchiveBundle> {
        let path = dir.join("R_demo.tar.gz");
        fs::write(&path, b"pretend this is a gzip stream")?;
        Ok(ArchiveBundle {
            path,
            members: 1,
            index: ChecksumIndex::default(),
        })
    }

    /// Copies, then flips a byte at the destination.
    struct CorruptingCopier;

    impl Copier for CorruptingCopier {
        fn copy(&self, src: &Path, dst: &Path, _cancel: &CancellationToken) -> io::Result<u64> {
            let mut data = fs::read(src)?;
            data[0] ^= 0xff;
            fs::write(dst, &data)?;
            Ok(data.len() as u64)
        }
    }

    struct FailingCopier;

    /// Writes the first half of the bundle, then fails like a full disk.
    struct HalfCopier;

    impl Copier for HalfCopier {
        fn copy(&self, src: &Path, dst: &Path, _cancel: &CancellationToken) -> io::Result<u64> {
            let data = fs::read(src)?;
            fs::write(dst, &data[..data.len() / 2])?;
            Err(io::Error::new(io::ErrorKind::Interrupted, "no space left on device"))
        }
    }

    impl Copier for FailingCopier {
        fn copy(&self, _src: &Path, _dst: &Path, _cancel: &CancellationToken) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "remote went away"))
        }
    }

    #[test]
    fn test_commit_moves_bundle_and_records_digest() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let bundle = bundle_in(local.path())?;
        let local_path = bundle.path.clone();
        let expected = Md5Hasher.digest_file(&local_path)?;

        let copier = FsCopier::default();
        let outcome = TransferVerifier::new(&copier, &Md5Hasher, CancellationToken::new())
            .commit(bundle, dest.path(), Some("CASE-17"));

        assert!(outcome.is_success());
        assert_eq!(outcome.digest, Some(expected.clone()));
        assert_eq!(outcome.destination, dest.path().join("CASE-17/R_demo.tar.gz"));
        assert!(!local_path.exists());
        assert_eq!(
            fs::read_to_string(dest.path().join("CASE-17/R_demo.tar.gz.md5"))?,
            format!("{}  R_demo.tar.gz\n", expected)
        );
        Ok(())
    }

    #[test]
    fn test_existing_case_directory_is_not_an_error() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        fs::create_dir(dest.path().join("CASE-17"))?;

        let copier = FsCopier::default();
        let outcome = TransferVerifier::new(&copier, &Md5Hasher, CancellationToken::new())
            .keep_local(true)
            .commit(bundle_in(local.path())?, dest.path(), Some("CASE-17"));

        assert!(outcome.is_success());
        assert!(local.path().join("R_demo.tar.gz").exists());
        Ok(())
    }

    #[test]
    fn test_mismatch_keeps_both_copies() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let bundle = bundle_in(local.path())?;
        let local_path = bundle.path.clone();

        let outcome = TransferVerifier::new(&CorruptingCopier, &Md5Hasher, CancellationToken::new())
            .commit(bundle, dest.path(), None);

        assert_eq!(outcome.status, TransferStatus::DigestMismatch);
        assert!(!outcome.is_success());
        assert!(local_path.exists());
        assert_eq!(outcome.destination, dest.path().join("R_demo.tar.gz.partial"));
        assert!(outcome.destination.exists());
        assert!(!dest.path().join("R_demo.tar.gz").exists());
        assert!(!dest.path().join("R_demo.tar.gz.md5").exists());
        Ok(())
    }

    #[test]
    fn test_copy_failure_keeps_local_bundle() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let bundle = bundle_in(local.path())?;
        let local_path = bundle.path.clone();

        let outcome = TransferVerifier::new(&FailingCopier, &Md5Hasher, CancellationToken::new())
            .commit(bundle, dest.path(), None);

        assert_eq!(outcome.status, TransferStatus::CopyFailed);
        assert!(outcome.diagnostic.contains("remote went away"));
        assert!(local_path.exists());
        Ok(())
    }

    #[test]
    fn test_missing_destination_root_fails_copy() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let bundle = bundle_in(local.path())?;

        let copier = FsCopier::default();
        let outcome = TransferVerifier::new(&copier, &Md5Hasher, CancellationToken::new())
            .commit(bundle, &dest.path().join("absent/root"), Some("CASE"));

        assert_eq!(outcome.status, TransferStatus::CopyFailed);
        assert!(local.path().join("R_demo.tar.gz").exists());
        Ok(())
    }

    #[test]
    fn test_interrupted_copy_leaves_no_bundle_at_destination() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let bundle = bundle_in(local.path())?;
        let local_path = bundle.path.clone();

        let outcome = TransferVerifier::new(&HalfCopier, &Md5Hasher, CancellationToken::new())
            .commit(bundle, dest.path(), None);

        assert_eq!(outcome.status, TransferStatus::CopyFailed);
        assert!(local_path.exists());
        assert!(!dest.path().join("R_demo.tar.gz").exists());
        assert!(!dest.path().join("R_demo.tar.gz.partial").exists());
        Ok(())
    }

    #[test]
    fn test_failed_copy_keeps_earlier_commit_intact() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let earlier = dest.path().join("R_demo.tar.gz");
        fs::write(&earlier, b"bundle from an earlier commit")?;

        let outcome = TransferVerifier::new(&HalfCopier, &Md5Hasher, CancellationToken::new())
            .commit(bundle_in(local.path())?, dest.path(), None);

        assert_eq!(outcome.status, TransferStatus::CopyFailed);
        assert_eq!(fs::read(&earlier)?, b"bundle from an earlier commit");
        Ok(())
    }

    #[test]
    fn test_cancelled_copy_removes_partial() -> io::Result<()> {
        let local = TempDir::new()?;
        let dest = TempDir::new()?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let copier = FsCopier::default();
        let outcome = TransferVerifier::new(&copier, &Md5Hasher, cancel)
            .commit(bundle_in(local.path())?, dest.path(), None);

        assert_eq!(outcome.status, TransferStatus::CopyFailed);
        assert!(fs::read_dir(dest.path())?.next().is_none());
        Ok(())
    }
}
