mod config;
mod mirror;

use crate::config::MirrorConfig;
use crate::mirror::Mirror;
use clap::Parser;
use run_archiver::daemon::shutdown::ShutdownCoordinator;
use run_archiver::ExitStatus;
use std::path::PathBuf;
use std::process::ExitCode;

/// Mirror completed run directories to external storage, evicting the
/// oldest runs first when the mirror exceeds its space ceiling.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source directory (overrides MIRROR_SOURCE)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Mirror root (overrides MIRROR_DEST)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Space ceiling in GiB (overrides MIRROR_CEILING_GB)
    #[arg(long)]
    ceiling_gb: Option<u64>,

    /// Report what would be evicted and copied without changing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = MirrorConfig::from_env();
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(dest) = args.dest {
        config.destination = dest;
    }
    if let Some(ceiling_gb) = args.ceiling_gb {
        config.ceiling_gb = ceiling_gb;
    }
    config.dry_run |= args.dry_run;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    tracing::info!(
        "Starting run-mirror: {} -> {} (ceiling {} GiB{})",
        config.source.display(),
        config.destination.display(),
        config.ceiling_gb,
        if config.dry_run { ", dry run" } else { "" }
    );

    let shutdown = ShutdownCoordinator::new();
    let cancel = shutdown.token();
    let mut handle = tokio::task::spawn_blocking(move || Mirror::new(&config, cancel).run());

    let result = tokio::select! {
        result = &mut handle => result,
        _ = shutdown.wait_for_signal() => handle.await,
    };

    let status = match result {
        Ok(Ok(_)) => ExitStatus::Success,
        Ok(Err(e)) => {
            tracing::error!("Mirror failed: {}", e);
            e.exit_status()
        }
        Err(e) => {
            tracing::error!("Mirror task panicked: {}", e);
            ExitStatus::IoFailure
        }
    };

    status.into()
}
