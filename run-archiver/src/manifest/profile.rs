//! Run context and the path groups a manifest is assembled from.

use super::category::{PluginCategory, UnknownPluginPolicy};
use crate::utils::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Instrument class of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Pgm,
    Proton,
    S5,
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "pgm" => Ok(Platform::Pgm),
            "proton" => Ok(Platform::Proton),
            other if other.starts_with("s5") => Ok(Platform::S5),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Pgm => "pgm",
            Platform::Proton => "proton",
            Platform::S5 => "s5",
        })
    }
}

/// Dotted numeric software version. Missing components compare as zero,
/// so `5.10` equals `5.10.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SoftwareVersion(Vec<u32>);

impl SoftwareVersion {
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl FromStr for SoftwareVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| format!("invalid version '{s}'"))?;
        Ok(SoftwareVersion(parts))
    }
}

impl TryFrom<String> for SoftwareVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SoftwareVersion> for String {
    fn from(version: SoftwareVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        f.write_str(&rendered.join("."))
    }
}

impl Ord for SoftwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for SoftwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SoftwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SoftwareVersion {}

/// Whether mandatory plugin categories are enforced or only warned about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    #[default]
    Strict,
    /// Research runs: missing categories are logged and skipped
    Lenient,
}

/// Paths that apply to a subset of platforms and software versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathGroup {
    pub name: String,
    pub paths: Vec<String>,

    /// Platforms the group applies to (empty = all)
    #[serde(default)]
    pub platforms: Vec<Platform>,

    /// Inclusive lower bound
    #[serde(default)]
    pub min_version: Option<SoftwareVersion>,

    /// Exclusive upper bound
    #[serde(default)]
    pub before_version: Option<SoftwareVersion>,

    /// Missing paths are warnings instead of failures
    #[serde(default)]
    pub optional: bool,
}

impl PathGroup {
    pub fn applies_to(&self, platform: Platform, version: &SoftwareVersion) -> bool {
        let platform_ok = self.platforms.is_empty() || self.platforms.contains(&platform);
        let min_ok = self.min_version.as_ref().map_or(true, |min| version >= min);
        let before_ok = self
            .before_version
            .as_ref()
            .map_or(true, |before| version < before);
        platform_ok && min_ok && before_ok
    }
}

/// Everything a manifest build needs to know about expected run content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestProfile {
    /// Required for every run
    pub common: Vec<String>,

    /// Platform/version conditional groups
    pub groups: Vec<PathGroup>,

    /// Directory whose children are plugin outputs
    pub plugin_dir: String,

    /// Categories that must have at least one plugin output
    pub required_categories: Vec<PluginCategory>,

    pub unknown_plugins: UnknownPluginPolicy,
}

impl Default for ManifestProfile {
    fn default() -> Self {
        Self {
            common: vec![
                "ion_params_00.json".to_string(),
                "expMeta.dat".to_string(),
                "version.txt".to_string(),
                "basecaller_results/datasets_basecaller.json".to_string(),
            ],
            groups: vec![
                PathGroup {
                    name: "pgm-signal-processing".to_string(),
                    paths: vec![
                        "sigproc_results/bfmask.stats".to_string(),
                        "sigproc_results/analysis.bfmask.bin".to_string(),
                    ],
                    platforms: vec![Platform::Pgm],
                    min_version: None,
                    before_version: None,
                    optional: false,
                },
                PathGroup {
                    name: "block-signal-processing".to_string(),
                    paths: vec!["sigproc_results/analysis.bfmask.stats".to_string()],
                    platforms: vec![Platform::Proton, Platform::S5],
                    min_version: None,
                    before_version: None,
                    optional: false,
                },
                PathGroup {
                    name: "experiment-log".to_string(),
                    paths: vec!["explog_final.txt".to_string()],
                    platforms: Vec::new(),
                    min_version: Some(SoftwareVersion(vec![5, 0])),
                    before_version: None,
                    optional: false,
                },
                PathGroup {
                    name: "report".to_string(),
                    paths: vec!["report.pdf".to_string()],
                    platforms: Vec::new(),
                    min_version: None,
                    before_version: None,
                    optional: true,
                },
            ],
            plugin_dir: "plugin_out".to_string(),
            required_categories: vec![
                PluginCategory::VariantCaller,
                PluginCategory::CoverageAnalysis,
            ],
            unknown_plugins: UnknownPluginPolicy::Include,
        }
    }
}

/// The run being archived and the context that selects its path groups.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_dir: PathBuf,
    pub platform: Platform,
    pub version: SoftwareVersion,
    pub strictness: Strictness,
}

/// Run parameters file read when platform or version are not supplied.
pub const RUN_PARAMS_FILE: &str = "ion_params_00.json";

impl RunContext {
    /// Fill in platform and version from the run parameters file when not given.
    pub fn detect(
        run_dir: &Path,
        platform: Option<Platform>,
        version: Option<SoftwareVersion>,
        strictness: Strictness,
    ) -> Result<Self> {
        let (platform, version) = match (platform, version) {
            (Some(p), Some(v)) => (p, v),
            (platform, version) => {
                let params = read_run_params(run_dir)?;
                let platform = match platform {
                    Some(p) => p,
                    None => param_str(&params, "platform")?
                        .parse()
                        .map_err(ArchiveError::Config)?,
                };
                let version = match version {
                    Some(v) => v,
                    None => param_str(&params, "version")?
                        .parse()
                        .map_err(ArchiveError::Config)?,
                };
                (platform, version)
            }
        };

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            platform,
            version,
            strictness,
        })
    }
}

fn read_run_params(run_dir: &Path) -> Result<serde_json::Value> {
    let path = run_dir.join(RUN_PARAMS_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| ArchiveError::io(&path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| ArchiveError::Config(format!("{}: {}", path.display(), e)))
}

fn param_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ArchiveError::Config(format!("'{key}' not found in {RUN_PARAMS_FILE}")))
}
