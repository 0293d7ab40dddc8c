use run_archiver::retention::ceiling_from_gib;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Directory whose run subdirectories are mirrored
    pub source: PathBuf,
    /// Mirror root, usually removable media
    pub destination: PathBuf,
    pub ceiling_gb: u64,
    /// File whose presence marks a run as complete
    pub completion_marker: String,
    pub mounts_file: PathBuf,
    pub removable_root: PathBuf,
    pub dry_run: bool,
    pub log_level: String,
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            source: PathBuf::from(
                lookup("MIRROR_SOURCE").unwrap_or_else(|| "/results/analysis/output/Home".into()),
            ),
            destination: PathBuf::from(
                lookup("MIRROR_DEST").unwrap_or_else(|| "/media/mirror".into()),
            ),
            ceiling_gb: lookup("MIRROR_CEILING_GB")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
            completion_marker: lookup("MIRROR_COMPLETION_MARKER")
                .unwrap_or_else(|| "status.txt".into()),
            mounts_file: PathBuf::from(
                lookup("MOUNTS_FILE").unwrap_or_else(|| "/proc/mounts".into()),
            ),
            removable_root: PathBuf::from(
                lookup("REMOVABLE_ROOT").unwrap_or_else(|| "/media".into()),
            ),
            dry_run: lookup("MIRROR_DRY_RUN")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        ceiling_from_gib(self.ceiling_gb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::from_lookup(|_| None);
        assert_eq!(config.destination, PathBuf::from("/media/mirror"));
        assert_eq!(config.ceiling_gb, 1800);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("MIRROR_DEST", "/mnt/usb1"),
            ("MIRROR_CEILING_GB", "2"),
            ("MIRROR_DRY_RUN", "TRUE"),
            ("MIRROR_CEILING_GB_TYPO", "9"),
        ]);
        let config = MirrorConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.destination, PathBuf::from("/mnt/usb1"));
        assert_eq!(config.ceiling_bytes(), 2 * 1024 * 1024 * 1024);
        assert!(config.dry_run);
    }

    #[test]
    fn test_unparsable_ceiling_falls_back() {
        let config = MirrorConfig::from_lookup(|k| (k == "MIRROR_CEILING_GB").then(|| "lots".to_string()));
        assert_eq!(config.ceiling_gb, 1800);
    }
}
