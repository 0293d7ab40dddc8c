//! Run Archiver - Main entry point
//!
//! Archives sequencing run directories into verified bundles on durable
//! storage.

use anyhow::Context;
use clap::{Parser, Subcommand};
use run_archiver::archive::Compression;
use run_archiver::checksum::LISTING_NAME;
use run_archiver::daemon::shutdown::ShutdownCoordinator;
use run_archiver::executor::{self, ArchiveExecutor, ArchiveJob};
use run_archiver::fs::MountGuard;
use run_archiver::manifest::{Platform, SoftwareVersion, Strictness};
use run_archiver::notify::FanoutNotifier;
use run_archiver::retention::{ceiling_from_gib, RetentionRotator};
use run_archiver::{utils, Config, ExitStatus};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bundle a run directory, verify it and commit it to the destination
    Archive {
        run_dir: PathBuf,

        /// Destination root (overrides transfer.destination)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Case or batch subdirectory under the destination
        #[arg(long = "case")]
        case_id: Option<String>,

        /// Bundle name without extension
        #[arg(long)]
        output_name: Option<String>,

        /// Instrument platform (pgm, proton, s5); read from the run if unset
        #[arg(long)]
        platform: Option<Platform>,

        /// Software version; read from the run if unset
        #[arg(long = "sw-version", value_name = "VERSION")]
        version: Option<SoftwareVersion>,

        /// Warn instead of failing when a mandatory category has no output
        #[arg(long)]
        lenient: bool,

        /// Bundle compression (none, gzip, zstd)
        #[arg(long)]
        compression: Option<Compression>,

        /// Keep the local bundle after a verified commit
        #[arg(long)]
        keep_local: bool,
    },

    /// Write a checksum listing for paths under a root
    Checksum {
        root: PathBuf,

        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Listing file to write
        #[arg(short, long, default_value = LISTING_NAME)]
        output: PathBuf,
    },

    /// Extract an existing bundle and check it against its listing
    Verify {
        bundle: PathBuf,

        /// Scratch parent for extraction (overrides archive.scratch_dir)
        #[arg(long)]
        scratch: Option<PathBuf>,
    },

    /// Evict the oldest runs until the destination is under a ceiling
    Rotate {
        dest: PathBuf,

        #[arg(long)]
        ceiling_gb: u64,

        /// List what would be evicted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("run-archiver: {:#}", e);
            return ExitStatus::Usage.into();
        }
    };
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    // Initialize logging
    if let Err(e) = utils::logger::init(&config.log) {
        eprintln!("run-archiver: {:#}", e);
        return ExitStatus::Usage.into();
    }

    tracing::info!("Starting run-archiver v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = ShutdownCoordinator::new();

    match run(args.command, config, &shutdown).await {
        Ok(status) => status.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            match e.downcast_ref::<run_archiver::ArchiveError>() {
                Some(err) => err.exit_status().into(),
                None => ExitStatus::Usage.into(),
            }
        }
    }
}

async fn run(command: Command, mut config: Config, shutdown: &ShutdownCoordinator) -> anyhow::Result<ExitStatus> {
    let cancel = shutdown.token();

    match command {
        Command::Archive {
            run_dir,
            dest,
            case_id,
            output_name,
            platform,
            version,
            lenient,
            compression,
            keep_local,
        } => {
            let destination = dest
                .or_else(|| config.transfer.destination.clone())
                .context("no destination: pass --dest or set transfer.destination")?;
            if lenient {
                config.manifest.strictness = Strictness::Lenient;
            }
            if let Some(compression) = compression {
                config.archive.compression = compression;
            }
            config.transfer.keep_local |= keep_local;

            let job = ArchiveJob {
                run_dir,
                destination,
                case_id,
                output_name,
                platform,
                version,
            };
            let notifier = Box::new(FanoutNotifier::from_config(&config.notify));
            let executor = ArchiveExecutor::with_cancel(config, notifier, cancel);

            let outcome = run_blocking(shutdown, move || executor.execute(&job)).await?;
            Ok(outcome.status)
        }

        Command::Checksum { root, paths, output } => {
            let workers = config.performance.hash_workers;
            let index = run_blocking(shutdown, move || {
                executor::checksum_paths(&root, &paths, &output, workers, &cancel)
            })
            .await??;
            tracing::info!(files = index.len(), "Checksum listing written");
            Ok(ExitStatus::Success)
        }

        Command::Verify { bundle, scratch } => {
            let scratch = scratch.unwrap_or_else(|| config.scratch_dir().to_path_buf());
            let verified = run_blocking(shutdown, move || {
                executor::verify_existing(&bundle, &scratch, &cancel)
            })
            .await??;
            tracing::info!(files = verified, "Bundle verified");
            Ok(ExitStatus::Success)
        }

        Command::Rotate {
            dest,
            ceiling_gb,
            dry_run,
        } => {
            MountGuard::from_config(&config.mount).ensure_mounted(&dest)?;
            let evicted = run_blocking(shutdown, move || {
                RetentionRotator::new(dry_run).enforce_ceiling(&dest, ceiling_from_gib(ceiling_gb))
            })
            .await??;
            tracing::info!(evicted = evicted.len(), dry_run, "Rotation complete");
            Ok(ExitStatus::Success)
        }
    }
}

/// Run blocking pipeline work off the async runtime. A shutdown signal
/// cancels the shared token and then waits for the work to wind down.
async fn run_blocking<T, F>(shutdown: &ShutdownCoordinator, work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(work);

    tokio::select! {
        result = &mut handle => Ok(result?),
        _ = shutdown.wait_for_signal() => {
            tracing::warn!("Waiting for the current stage to stop");
            Ok(handle.await?)
        }
    }
}
