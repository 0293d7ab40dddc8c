//! Configuration management for the run archiver.
//!
//! Built-in defaults are layered under an optional TOML file, which is in
//! turn layered under `RUN_ARCHIVER__<SECTION>__<KEY>` environment variables.

use crate::archive::Compression;
use crate::manifest::{ManifestProfile, Strictness};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub transfer: TransferConfig,
    pub mount: MountConfig,
    pub manifest: ManifestConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Where bundles, member lists and checksum listings are staged
    pub work_dir: PathBuf,

    /// Parent of the extract-and-verify scratch directory (defaults to work_dir)
    pub scratch_dir: Option<PathBuf>,

    /// Bundle compression (none, gzip, zstd)
    pub compression: Compression,

    /// Compression level (0-9 for gzip, 1-22 for zstd)
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Durable destination root
    pub destination: Option<PathBuf>,

    /// Keep the local bundle after a verified commit
    pub keep_local: bool,

    /// Refuse the copy when the destination lacks room for the bundle
    pub check_free_space: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mount table to consult
    pub mounts_file: PathBuf,

    /// Removable media root; children of it must be real mounts
    pub removable_root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub strictness: Strictness,

    #[serde(flatten)]
    pub profile: ManifestProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Report recipients, passed through to the webhook payload
    pub recipients: Vec<String>,

    /// Webhook receiving a JSON report
    pub webhook_url: Option<String>,

    /// Directory receiving rendered text reports
    pub report_dir: Option<PathBuf>,

    /// Report template overriding the built-in one
    pub template: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log output (stdout, file, both)
    pub output: LogOutput,

    /// Log file, required for the file and both outputs
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Checksum worker threads (1 = sequential walk)
    pub hash_workers: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/run-archiver/work"),
            scratch_dir: None,
            compression: Compression::Gzip,
            compression_level: 6,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            destination: None,
            keep_local: false,
            check_free_space: true,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mounts_file: PathBuf::from("/proc/mounts"),
            removable_root: PathBuf::from("/media"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            file: None,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { hash_workers: 1 }
    }
}

impl Config {
    /// Load configuration: defaults, then `path` if given, then environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RUN_ARCHIVER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Scratch parent for integrity extraction
    pub fn scratch_dir(&self) -> &Path {
        self.archive
            .scratch_dir
            .as_deref()
            .unwrap_or(&self.archive.work_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginCategory;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.archive.compression, Compression::Gzip);
        assert_eq!(config.mount.mounts_file, PathBuf::from("/proc/mounts"));
        assert_eq!(config.manifest.strictness, Strictness::Strict);
        assert_eq!(config.performance.hash_workers, 1);
        assert_eq!(config.scratch_dir(), Path::new("/var/lib/run-archiver/work"));
        assert!(config
            .manifest
            .profile
            .required_categories
            .contains(&PluginCategory::VariantCaller));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> anyhow::Result<()> {
        let config = Config::from_toml_str(
            r#"
            [archive]
            compression = "zstd"
            scratch_dir = "/scratch"

            [manifest]
            strictness = "lenient"
            required_categories = ["coverage_analysis"]

            [log]
            level = "debug"
            "#,
        )?;

        assert_eq!(config.archive.compression, Compression::Zstd);
        assert_eq!(config.archive.compression_level, 6);
        assert_eq!(config.scratch_dir(), Path::new("/scratch"));
        assert_eq!(config.manifest.strictness, Strictness::Lenient);
        assert_eq!(
            config.manifest.profile.required_categories,
            vec![PluginCategory::CoverageAnalysis]
        );
        assert_eq!(config.log.level, "debug");
        assert!(config.transfer.check_free_space);
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[transfer]\ndestination = \"/mnt/archive\"\nkeep_local = true")?;
        file.flush()?;

        let config = Config::load(Some(file.path()))?;
        assert_eq!(
            config.transfer.destination.as_deref(),
            Some(Path::new("/mnt/archive"))
        );
        assert!(config.transfer.keep_local);
        assert_eq!(config.log.level, "info");
        Ok(())
    }
}
