//! Throttled progress reporting for bundle copies.
//!
//! At most one report per interval; speed is measured over the window
//! since the previous report.

use std::fmt;
use std::time::{Duration, Instant};

/// One progress line for a copy in flight
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub copied_bytes: u64,
    pub total_bytes: u64,
    pub bytes_per_second: u64,
    /// None until a speed has been measured
    pub remaining: Option<Duration>,
}

impl ProgressReport {
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            self.copied_bytes as f64 / self.total_bytes as f64 * 100.0
        }
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} ({:.1}%) at {}",
            format_bytes(self.copied_bytes),
            format_bytes(self.total_bytes),
            self.percent_complete(),
            format_speed(self.bytes_per_second)
        )?;
        if let Some(remaining) = self.remaining {
            write!(f, ", {} remaining", format_duration(remaining))?;
        }
        Ok(())
    }
}

pub struct ProgressTracker {
    total_bytes: u64,
    copied_bytes: u64,
    started: Instant,
    window_start: Instant,
    window_bytes: u64,
    report_interval: Duration,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total_bytes,
            copied_bytes: 0,
            started: now,
            window_start: now,
            window_bytes: 0,
            report_interval,
        }
    }

    /// Record the running byte count. Returns a report once per interval
    /// while the copy is unfinished.
    pub fn record(&mut self, copied_bytes: u64) -> Option<ProgressReport> {
        self.copied_bytes = copied_bytes;
        if copied_bytes >= self.total_bytes {
            return None;
        }

        let window = self.window_start.elapsed();
        if window < self.report_interval {
            return None;
        }

        let bytes_per_second = per_second(copied_bytes.saturating_sub(self.window_bytes), window);
        self.window_start = Instant::now();
        self.window_bytes = copied_bytes;

        let remaining = (bytes_per_second > 0).then(|| {
            Duration::from_secs(self.total_bytes.saturating_sub(copied_bytes) / bytes_per_second)
        });

        Some(ProgressReport {
            copied_bytes,
            total_bytes: self.total_bytes,
            bytes_per_second,
            remaining,
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average speed since the tracker was created
    pub fn average_speed(&self) -> u64 {
        per_second(self.copied_bytes, self.elapsed())
    }
}

fn per_second(bytes: u64, over: Duration) -> u64 {
    let seconds = over.as_secs_f64();
    if seconds > 0.0 {
        (bytes as f64 / seconds) as u64
    } else {
        0
    }
}

/// Binary units, two decimals: `1.50 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    match seconds {
        0..=59 => format!("{}s", seconds),
        60..=3599 => format!("{}m {}s", seconds / 60, seconds % 60),
        _ => format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60),
    }
}
