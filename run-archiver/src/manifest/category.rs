//! Plugin output categories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known classes of plugin output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    VariantCaller,
    CoverageAnalysis,
    SampleId,
    FusionCaller,
    CopyNumber,
}

/// Directory-name prefixes, matched case-insensitively. Prefixes are disjoint.
const PREFIX_RULES: &[(&str, PluginCategory)] = &[
    ("variantcaller", PluginCategory::VariantCaller),
    ("coverageanalysis", PluginCategory::CoverageAnalysis),
    ("sampleid", PluginCategory::SampleId),
    ("fusioncaller", PluginCategory::FusionCaller),
    ("cnvcaller", PluginCategory::CopyNumber),
];

impl PluginCategory {
    pub const ALL: [PluginCategory; 5] = [
        PluginCategory::VariantCaller,
        PluginCategory::CoverageAnalysis,
        PluginCategory::SampleId,
        PluginCategory::FusionCaller,
        PluginCategory::CopyNumber,
    ];

    /// Classify a plugin output directory name, e.g. `variantCaller_out.1432`.
    pub fn classify(dir_name: &str) -> Option<PluginCategory> {
        let lowered = dir_name.to_ascii_lowercase();
        PREFIX_RULES
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix))
            .map(|(_, category)| *category)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            PluginCategory::VariantCaller => "variant calling",
            PluginCategory::CoverageAnalysis => "coverage analysis",
            PluginCategory::SampleId => "sample identification",
            PluginCategory::FusionCaller => "fusion calling",
            PluginCategory::CopyNumber => "copy number",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What to do with plugin output that matches no category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPluginPolicy {
    #[default]
    Include,
    Exclude,
}
