//! Manifest assembly and completeness validation.

use super::category::{PluginCategory, UnknownPluginPolicy};
use super::profile::{ManifestProfile, RunContext, Strictness};
use super::Manifest;
use crate::utils::{ArchiveError, MissingItem, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct ManifestBuilder<'a> {
    profile: &'a ManifestProfile,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(profile: &'a ManifestProfile) -> Self {
        Self { profile }
    }

    /// Assemble the manifest for a run.
    ///
    /// Order: common paths, applicable path groups, then every plugin output
    /// in name order. A missing required path always fails. A mandatory
    /// category with no plugin output fails under [`Strictness::Strict`] and
    /// is logged and skipped under [`Strictness::Lenient`].
    pub fn build(&self, ctx: &RunContext) -> Result<Manifest> {
        let mut manifest = Manifest::new(&ctx.run_dir);

        for path in &self.profile.common {
            require(&ctx.run_dir, path)?;
            manifest.push(path);
        }

        for group in &self.profile.groups {
            if !group.applies_to(ctx.platform, &ctx.version) {
                debug!(group = %group.name, platform = %ctx.platform, version = %ctx.version, "Path group does not apply");
                continue;
            }
            for path in &group.paths {
                if exists(&ctx.run_dir.join(path)) {
                    manifest.push(path);
                } else if group.optional {
                    warn!(group = %group.name, path = %path, "Optional path missing, skipping");
                } else {
                    return Err(ArchiveError::MissingData(MissingItem::File(path.into())));
                }
            }
        }

        let found = self.add_plugin_outputs(ctx, &mut manifest)?;

        for category in &self.profile.required_categories {
            if found.contains(category) {
                continue;
            }
            match ctx.strictness {
                Strictness::Strict => {
                    return Err(ArchiveError::MissingData(MissingItem::Category(*category)));
                }
                Strictness::Lenient => {
                    warn!(category = %category, "No output for mandatory category, omitting it from the bundle");
                }
            }
        }

        let manifest = manifest.freeze()?;
        info!(entries = manifest.len(), run = %ctx.run_dir.display(), "Manifest assembled");
        Ok(manifest)
    }

    fn add_plugin_outputs(
        &self,
        ctx: &RunContext,
        manifest: &mut Manifest,
    ) -> Result<BTreeSet<PluginCategory>> {
        let mut found = BTreeSet::new();
        let plugin_root = ctx.run_dir.join(&self.profile.plugin_dir);

        if !plugin_root.is_dir() {
            warn!(path = %plugin_root.display(), "No plugin output directory");
            return Ok(found);
        }

        let mut names: Vec<String> = std::fs::read_dir(&plugin_root)
            .map_err(|e| ArchiveError::io(&plugin_root, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        for name in names {
            let relative = Path::new(&self.profile.plugin_dir).join(&name);
            match PluginCategory::classify(&name) {
                Some(category) => {
                    debug!(plugin = %name, category = %category, "Plugin output classified");
                    found.insert(category);
                    manifest.push(&relative);
                }
                None => match self.profile.unknown_plugins {
                    UnknownPluginPolicy::Include => {
                        info!(plugin = %name, "Including unclassified plugin output");
                        manifest.push(&relative);
                    }
                    UnknownPluginPolicy::Exclude => {
                        warn!(plugin = %name, "Excluding unclassified plugin output");
                    }
                },
            }
        }

        Ok(found)
    }
}

fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn require(run_dir: &Path, relative: &str) -> Result<()> {
    if exists(&run_dir.join(relative)) {
        Ok(())
    } else {
        Err(ArchiveError::MissingData(MissingItem::File(relative.into())))
    }
}
