//! Manifest schema versions and the tools-version marker line.
//!
//! Every `keel.toml` starts with a marker comment declaring the schema
//! version it was authored against, e.g. `# keel-tools-version: 1.2`.
//! The marker's spelling changed at 1.2: older declarations must not put
//! whitespace after the colon, newer ones may (and canonically do).

use serde::{Deserialize, Serialize};

use crate::manifest::ManifestError;

/// The marker prefix on the first line of a manifest.
pub const TOOLS_VERSION_PREFIX: &str = "# keel-tools-version:";

/// A manifest schema version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ToolsVersion {
    pub major: u32,
    pub minor: u32,
}

impl ToolsVersion {
    /// Initial schema: dependencies, products, targets, settings.
    pub const V1_0: Self = Self { major: 1, minor: 0 };

    /// Added target resources and default localization.
    pub const V1_1: Self = Self { major: 1, minor: 1 };

    /// First version with the spaced marker form.
    pub const V1_2: Self = Self { major: 1, minor: 2 };

    /// Added plugin products and plugin targets.
    pub const V1_3: Self = Self { major: 1, minor: 3 };

    /// The newest schema this toolchain understands.
    pub const CURRENT: Self = Self::V1_3;

    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether the marker for this version may carry whitespace between
    /// the colon and the version number.
    #[must_use]
    pub fn allows_spaced_marker(self) -> bool {
        self >= Self::V1_2
    }
}

impl std::fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for ToolsVersion {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ManifestError::Malformed(format!("invalid tools version `{s}`"));
        let (major, minor) = s.split_once('.').ok_or_else(malformed)?;
        let major: u32 = major.parse().map_err(|_| malformed())?;
        let minor: u32 = minor.parse().map_err(|_| malformed())?;
        Ok(Self { major, minor })
    }
}

/// Parse the tools-version marker from manifest source text.
///
/// The marker must be the first line. Whitespace after the colon is only
/// accepted for versions that allow the spaced form.
///
/// # Errors
///
/// Returns `ManifestError::Malformed` when the marker is missing, does not
/// parse, or uses the spaced form for a version that predates it.
pub fn parse_marker(source: &str) -> Result<ToolsVersion, ManifestError> {
    let first_line = source.lines().next().unwrap_or("");
    let Some(rest) = first_line.strip_prefix(TOOLS_VERSION_PREFIX) else {
        return Err(ManifestError::Malformed(format!(
            "first line must declare a tools version, e.g. `{TOOLS_VERSION_PREFIX} {}`",
            ToolsVersion::CURRENT
        )));
    };

    let version_text = rest.trim_start();
    let had_whitespace = version_text.len() != rest.len();
    let version: ToolsVersion = version_text.trim_end().parse()?;

    if had_whitespace && !version.allows_spaced_marker() {
        return Err(ManifestError::Malformed(format!(
            "tools version markers before {} must not contain whitespace after the colon",
            ToolsVersion::V1_2
        )));
    }

    Ok(version)
}

/// The canonical marker line for a schema version, without a trailing
/// newline.
#[must_use]
pub fn marker_line(version: ToolsVersion) -> String {
    if version.allows_spaced_marker() {
        format!("{TOOLS_VERSION_PREFIX} {version}")
    } else {
        format!("{TOOLS_VERSION_PREFIX}{version}")
    }
}

/// A manifest construct that became available in a later schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFeature {
    DefaultLocalization,
    TargetResources,
    PluginProducts,
    PluginTargets,
}

impl SchemaFeature {
    /// The schema version that introduced this construct.
    #[must_use]
    pub fn introduced_in(self) -> ToolsVersion {
        match self {
            Self::DefaultLocalization | Self::TargetResources => ToolsVersion::V1_1,
            Self::PluginProducts | Self::PluginTargets => ToolsVersion::V1_3,
        }
    }

    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::DefaultLocalization => "default localization",
            Self::TargetResources => "target resources",
            Self::PluginProducts => "plugin products",
            Self::PluginTargets => "plugin targets",
        }
    }

    /// Check that a manifest declaring `declared` may use this construct.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::UnsupportedFeature` when the declared
    /// version predates the construct.
    pub fn require(self, declared: ToolsVersion) -> Result<(), ManifestError> {
        let introduced = self.introduced_in();
        if declared < introduced {
            return Err(ManifestError::UnsupportedFeature {
                feature: self.describe(),
                introduced,
                declared,
            });
        }
        Ok(())
    }
}
