//! Byte-for-byte copy primitive.

use super::progress::{format_bytes, format_duration, format_speed, ProgressTracker};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CHUNK_SIZE: usize = 1024 * 1024;

pub trait Copier: Send + Sync {
    /// Copy `src` to `dst`, returning the number of bytes written.
    fn copy(&self, src: &Path, dst: &Path, cancel: &CancellationToken) -> io::Result<u64>;
}

/// Local filesystem copy with throttled progress logging.
pub struct FsCopier {
    report_interval: Duration,
}

impl FsCopier {
    pub fn new(report_interval: Duration) -> Self {
        Self { report_interval }
    }
}

impl Default for FsCopier {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Copier for FsCopier {
    fn copy(&self, src: &Path, dst: &Path, cancel: &CancellationToken) -> io::Result<u64> {
        let total = std::fs::metadata(src)?.len();
        let mut reader = BufReader::new(File::open(src)?);
        let mut writer = BufWriter::new(File::create(dst)?);
        let mut tracker = ProgressTracker::new(total, self.report_interval);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut copied = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "copy cancelled"));
            }

            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            copied += n as u64;

            if let Some(report) = tracker.record(copied) {
                info!(dst = %dst.display(), "Copied {}", report);
            }
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        info!(
            dst = %dst.display(),
            "Copied {} in {} ({})",
            format_bytes(copied),
            format_duration(tracker.elapsed()),
            format_speed(tracker.average_speed())
        );

        Ok(copied)
    }
}
