//! Archive job executor - runs one run directory through the pipeline.
//!
//! Stages run strictly in sequence, each consuming the complete output of
//! the previous one:
//! - Manifest assembly and validation
//! - Checksum, package and self-verify
//! - Destination mount check
//! - Copy and post-copy digest check
//!
//! The first failing stage ends the run. Whatever happened, exactly one
//! report goes to the notifier before the outcome is returned.

use crate::archive::{verify_bundle, ArchiveBuilder, ArchiveOptions, Compression, TarPackager};
use crate::checksum::{ChecksumIndex, Md5Hasher};
use crate::config::Config;
use crate::fs::MountGuard;
use crate::manifest::{Manifest, ManifestBuilder, Platform, RunContext, SoftwareVersion};
use crate::naming;
use crate::notify::{NotificationSink, NotifyContext, PipelineOutcome, Stage};
use crate::transfer::{FsCopier, TransferStatus, TransferVerifier};
use crate::utils::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

/// One archive request
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub run_dir: PathBuf,
    pub destination: PathBuf,
    pub case_id: Option<String>,

    /// Bundle name without extension; derived from the run directory if unset
    pub output_name: Option<String>,

    pub platform: Option<Platform>,
    pub version: Option<SoftwareVersion>,
}

/// Main archive executor
pub struct ArchiveExecutor {
    config: Config,
    notifier: Box<dyn NotificationSink>,
    cancel_token: CancellationToken,
}

impl ArchiveExecutor {
    /// Create an executor with no cancellation support
    pub fn new(config: Config, notifier: Box<dyn NotificationSink>) -> Self {
        Self::with_cancel(config, notifier, CancellationToken::new())
    }

    pub fn with_cancel(
        config: Config,
        notifier: Box<dyn NotificationSink>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            notifier,
            cancel_token,
        }
    }

    /// Run the whole pipeline and report the outcome.
    pub fn execute(&self, job: &ArchiveJob) -> PipelineOutcome {
        let run_name = job
            .output_name
            .clone()
            .unwrap_or_else(|| naming::run_name(&job.run_dir));

        let span = info_span!("archive", run = %run_name);
        let _enter = span.enter();
        let start_time = std::time::Instant::now();

        info!(run_dir = %job.run_dir.display(), dest = %job.destination.display(), "Starting archive run");

        let outcome = self.run_stages(job, &run_name);

        let mut context = NotifyContext::new(&run_name)
            .with_field("run_dir", job.run_dir.display().to_string())
            .with_field("duration_secs", start_time.elapsed().as_secs().to_string());
        if let Some(case_id) = &job.case_id {
            context = context.with_field("case_id", case_id.clone());
        }

        if let Err(e) = self.notifier.notify(&outcome, &context) {
            warn!(sink = self.notifier.name(), error = %e, "Notification failed");
        }

        outcome
    }

    fn run_stages(&self, job: &ArchiveJob, run_name: &str) -> PipelineOutcome {
        let failed = |stage, e: ArchiveError| PipelineOutcome::failed(stage, &e);

        // Stage 1: manifest
        let manifest = match self.check_cancelled().and_then(|_| self.build_manifest(job)) {
            Ok(manifest) => manifest,
            Err(e) => return failed(Stage::Manifest, e),
        };

        // Stage 2: bundle
        let packager = TarPackager::new(
            self.config.archive.compression,
            self.config.archive.compression_level,
        );
        let options = ArchiveOptions {
            work_dir: self.config.archive.work_dir.clone(),
            scratch_dir: self.config.scratch_dir().to_path_buf(),
            hash_workers: self.config.performance.hash_workers,
        };
        let builder = ArchiveBuilder::new(&packager, &Md5Hasher, options, self.cancel_token.clone());
        let bundle = match self
            .check_cancelled()
            .and_then(|_| builder.create(manifest, run_name))
        {
            Ok(bundle) => bundle,
            Err(e) => return failed(Stage::Archive, e),
        };
        let bundle_name = bundle.file_name();

        // Stage 3: destination gate
        let guard = MountGuard::from_config(&self.config.mount);
        if let Err(e) = self
            .check_cancelled()
            .and_then(|_| guard.ensure_mounted(&job.destination))
        {
            warn!(bundle = %bundle.path.display(), "Local bundle kept after failed mount check");
            return failed(Stage::Mount, e).with_bundle(bundle_name);
        }

        // Stage 4: transfer
        let copier = FsCopier::default();
        let transfer = TransferVerifier::new(&copier, &Md5Hasher, self.cancel_token.clone())
            .keep_local(self.config.transfer.keep_local)
            .check_free_space(self.config.transfer.check_free_space)
            .commit(bundle, &job.destination, job.case_id.as_deref());

        let error = match transfer.status {
            TransferStatus::Committed => {
                return PipelineOutcome::committed(bundle_name, transfer.digest, transfer.destination);
            }
            _ if self.cancel_token.is_cancelled() => ArchiveError::Cancelled,
            TransferStatus::DigestMismatch => ArchiveError::Integrity {
                path: transfer.destination.display().to_string(),
                expected: transfer
                    .digest
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                actual: transfer.diagnostic.clone(),
                mismatches: 1,
            },
            TransferStatus::CopyFailed => ArchiveError::io(
                &transfer.destination,
                std::io::Error::other(transfer.diagnostic.clone()),
            ),
        };

        failed(Stage::Transfer, error)
            .with_bundle(bundle_name)
            .with_destination(transfer.digest, transfer.destination)
    }

    fn build_manifest(&self, job: &ArchiveJob) -> Result<Manifest> {
        let context = RunContext::detect(
            &job.run_dir,
            job.platform,
            job.version.clone(),
            self.config.manifest.strictness,
        )?;
        info!(platform = %context.platform, version = %context.version, strictness = ?context.strictness, "Run context");
        ManifestBuilder::new(&self.config.manifest.profile).build(&context)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Write a checksum listing for `paths` under `root` without packaging.
pub fn checksum_paths(
    root: &Path,
    paths: &[PathBuf],
    listing: &Path,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<ChecksumIndex> {
    let manifest = Manifest::from_paths(root, paths).freeze()?;
    let index = ChecksumIndex::compute(&manifest, &Md5Hasher, listing, workers, cancel);
    if index.is_err() {
        if let Err(e) = std::fs::remove_file(listing) {
            warn!(path = %listing.display(), error = %e, "Failed to remove partial listing");
        }
    }
    index
}

/// Extract-and-verify an existing bundle; compression is taken from its name.
pub fn verify_existing(bundle: &Path, scratch_parent: &Path, cancel: &CancellationToken) -> Result<usize> {
    let compression = Compression::from_path(bundle).ok_or_else(|| {
        ArchiveError::Config(format!(
            "{}: not a .tar, .tar.gz or .tar.zst bundle",
            bundle.display()
        ))
    })?;
    let packager = TarPackager::new(compression, 0);
    verify_bundle(&packager, &Md5Hasher, bundle, scratch_parent, cancel)
}
