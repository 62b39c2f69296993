//! Keel package manifest model.
//!
//! A [`Manifest`] is the immutable, structured form of one package's
//! `keel.toml` declaration at a specific loaded version. Instances are
//! produced by the loader (or built programmatically) and never mutated;
//! regeneration produces new source text, not a changed model.

use std::path::PathBuf;

use semver::Version;
use thiserror::Error;

use crate::identity::PackageIdentity;
use crate::tools_version::{SchemaFeature, ToolsVersion};

/// File name of a package manifest.
pub const MANIFEST_FILE: &str = "keel.toml";

/// Errors that can occur when loading or validating manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("no manifest found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error(
        "manifest declares tools version {declared}, but this toolchain supports up to {supported}"
    )]
    ToolsVersionMismatch {
        declared: ToolsVersion,
        supported: ToolsVersion,
    },

    #[error("{feature} requires tools version {introduced} or later, but the manifest declares {declared}")]
    UnsupportedFeature {
        feature: &'static str,
        introduced: ToolsVersion,
        declared: ToolsVersion,
    },
}

/// How a package entered the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// The workspace's own package.
    Root,
    /// A filesystem dependency, addressed by path and never pinned.
    Local,
    /// A source-control dependency, addressed by URL.
    Remote,
}

impl PackageKind {
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Root => "root package",
            Self::Local => "local package",
            Self::Remote => "remote package",
        }
    }
}

/// The complete manifest for one package at one loaded version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Canonical identity the workspace knows this package by.
    pub identity: PackageIdentity,

    /// How the package entered the graph.
    pub kind: PackageKind,

    /// The location the package was loaded from, as declared (pre-mirror).
    pub location: String,

    /// The released version this manifest was loaded at, if any.
    pub version: Option<Version>,

    /// The exact revision this manifest was loaded at, if any.
    pub revision: Option<String>,

    /// Schema version declared by the marker line.
    pub tools_version: ToolsVersion,

    /// Package name (required).
    pub name: String,

    /// Localization used for unlocalized resources.
    pub default_localization: Option<String>,

    /// Minimum platform versions this package supports.
    pub platforms: Vec<Platform>,

    /// Language versions the package compiles under.
    pub language_versions: Vec<String>,

    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<Dependency>,

    /// Products exposed to dependents.
    pub products: Vec<Product>,

    /// Build targets.
    pub targets: Vec<Target>,
}

/// A minimum platform version requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub version: String,
}

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// A package on the local filesystem. The path is kept exactly as
    /// declared (relative, absolute, or `~`-prefixed).
    Local {
        identity: PackageIdentity,
        path: String,
    },

    /// A package fetched from source control.
    Remote {
        identity: PackageIdentity,
        location: String,
        requirement: VersionRequirement,
    },
}

impl Dependency {
    #[must_use]
    pub fn identity(&self) -> &PackageIdentity {
        match self {
            Self::Local { identity, .. } | Self::Remote { identity, .. } => identity,
        }
    }

    /// The location exactly as the dependent declared it.
    #[must_use]
    pub fn declared_location(&self) -> &str {
        match self {
            Self::Local { path, .. } => path,
            Self::Remote { location, .. } => location,
        }
    }
}

/// A constraint on acceptable versions of a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequirement {
    /// Exactly one version.
    Exact(Version),

    /// Half-open range: `lower <= v < upper`.
    Range { lower: Version, upper: Version },

    /// A named branch. Mutable; the resolved revision is what gets pinned.
    Branch(String),

    /// An immutable commit id.
    Revision(String),
}

impl VersionRequirement {
    /// `lower` up to (excluding) the next major version.
    #[must_use]
    pub fn from_version(lower: Version) -> Self {
        let upper = next_major(&lower);
        Self::Range { lower, upper }
    }

    /// `lower` up to (excluding) the next minor version.
    #[must_use]
    pub fn up_to_next_minor(lower: Version) -> Self {
        let upper = next_minor(&lower);
        Self::Range { lower, upper }
    }

    /// Whether a concrete version satisfies this requirement. Branch and
    /// revision requirements are never satisfied by a version.
    #[must_use]
    pub fn satisfied_by(&self, version: &Version) -> bool {
        match self {
            Self::Exact(exact) => version == exact,
            Self::Range { lower, upper } => version >= lower && version < upper,
            Self::Branch(_) | Self::Revision(_) => false,
        }
    }

    /// Whether this requirement constrains released versions (as opposed
    /// to naming a branch or revision).
    #[must_use]
    pub fn is_version_based(&self) -> bool {
        matches!(self, Self::Exact(_) | Self::Range { .. })
    }
}

impl std::fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(version) => write!(f, "exactly {version}"),
            Self::Range { lower, upper } => write!(f, "{lower}..<{upper}"),
            Self::Branch(branch) => write!(f, "branch `{branch}`"),
            Self::Revision(revision) => write!(f, "revision `{revision}`"),
        }
    }
}

pub(crate) fn next_major(version: &Version) -> Version {
    Version::new(version.major + 1, 0, 0)
}

pub(crate) fn next_minor(version: &Version) -> Version {
    Version::new(version.major, version.minor + 1, 0)
}

/// A named bundle of targets exposed to dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: String,
    pub kind: ProductKind,
    pub targets: Vec<String>,
}

/// What a product builds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Library(LibraryLinkage),
    Executable,
    Plugin,
}

/// How a library product is linked into dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LibraryLinkage {
    /// The build system chooses.
    #[default]
    Automatic,
    Static,
    Dynamic,
}

/// One build unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,

    pub kind: TargetKind,

    /// Custom source directory, relative to the package root.
    pub path: Option<String>,

    pub dependencies: Vec<TargetDependency>,

    pub settings: Vec<Setting>,

    pub resources: Vec<Resource>,
}

/// The kind of build unit a target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetKind {
    #[default]
    Regular,
    Executable,
    Test,
    Plugin,
}

/// A target's dependency on another target or on a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDependency {
    /// By name, resolved to a local target or a dependency product.
    Named {
        name: String,
        condition: Option<Condition>,
    },

    /// A target in the same package.
    Target {
        name: String,
        condition: Option<Condition>,
    },

    /// A product of a declared dependency.
    Product {
        name: String,
        package: Option<String>,
        condition: Option<Condition>,
    },
}

impl TargetDependency {
    #[must_use]
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::Named { condition, .. }
            | Self::Target { condition, .. }
            | Self::Product { condition, .. } => condition.as_ref(),
        }
    }
}

/// Restricts a setting or dependency edge to platforms and/or a build
/// configuration. At least one of the two must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub platforms: Vec<String>,
    pub configuration: Option<BuildConfiguration>,
}

impl Condition {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty() && self.configuration.is_none()
    }
}

/// Debug or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildConfiguration {
    Debug,
    Release,
}

impl BuildConfiguration {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

/// One per-target build setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    /// Extra header search path for the compile step.
    HeaderSearchPath {
        path: String,
        condition: Option<Condition>,
    },

    /// Preprocessor define, optionally with a value.
    Define {
        name: String,
        value: Option<String>,
        condition: Option<Condition>,
    },

    /// System library linked into the target.
    LinkedLibrary {
        name: String,
        condition: Option<Condition>,
    },
}

impl Setting {
    #[must_use]
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            Self::HeaderSearchPath { condition, .. }
            | Self::Define { condition, .. }
            | Self::LinkedLibrary { condition, .. } => condition.as_ref(),
        }
    }
}

/// A file or directory shipped with a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub rule: ResourceRule,
    pub path: String,
    pub localization: Option<Localization>,
}

/// How a resource is treated at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRule {
    /// Copied verbatim.
    Copy,
    /// Transformed by the build system for the destination platform.
    Process,
}

/// Localization applied to an unlocalized processed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Localization {
    /// The package's default localization.
    Default,
    /// The base localization.
    Base,
}

impl Manifest {
    /// Create an empty root manifest, mainly for programmatic construction.
    #[must_use]
    pub fn new(name: &str, tools_version: ToolsVersion) -> Self {
        Self {
            identity: PackageIdentity::new(name),
            kind: PackageKind::Root,
            location: String::new(),
            version: None,
            revision: None,
            tools_version,
            name: name.to_string(),
            default_localization: None,
            platforms: Vec::new(),
            language_versions: Vec::new(),
            dependencies: Vec::new(),
            products: Vec::new(),
            targets: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == PackageKind::Root
    }

    /// Look up a target by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Look up a product by name.
    #[must_use]
    pub fn product(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    /// Validate structure and schema gating.
    ///
    /// Checked once at load time so the rest of the system can treat a
    /// `Manifest` as well-formed.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for structural problems and
    /// `UnsupportedFeature` for constructs above the declared tools
    /// version.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_name(&self.name)?;
        self.validate_dependencies()?;
        self.validate_products()?;
        self.validate_targets()?;
        self.validate_features()?;
        Ok(())
    }

    fn validate_dependencies(&self) -> Result<(), ManifestError> {
        for dependency in &self.dependencies {
            if let Dependency::Remote {
                identity,
                requirement,
                ..
            } = dependency
            {
                match requirement {
                    VersionRequirement::Range { lower, upper } => {
                        if lower >= upper {
                            return Err(ManifestError::Malformed(format!(
                                "empty version range {lower}..<{upper} for dependency `{identity}`"
                            )));
                        }
                    }
                    VersionRequirement::Branch(branch) => {
                        if branch.is_empty() {
                            return Err(ManifestError::Malformed(format!(
                                "empty branch name for dependency `{identity}`"
                            )));
                        }
                    }
                    VersionRequirement::Revision(revision) => {
                        if revision.is_empty() {
                            return Err(ManifestError::Malformed(format!(
                                "empty revision for dependency `{identity}`"
                            )));
                        }
                    }
                    VersionRequirement::Exact(_) => {}
                }
            }
        }
        Ok(())
    }

    fn validate_products(&self) -> Result<(), ManifestError> {
        for (index, product) in self.products.iter().enumerate() {
            if product.name.is_empty() {
                return Err(ManifestError::Malformed(String::from(
                    "product name cannot be empty",
                )));
            }
            if self.products[..index].iter().any(|p| p.name == product.name) {
                return Err(ManifestError::Malformed(format!(
                    "duplicate product `{}`",
                    product.name
                )));
            }
            for target in &product.targets {
                if self.target(target).is_none() {
                    return Err(ManifestError::Malformed(format!(
                        "product `{}` references unknown target `{target}`",
                        product.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_targets(&self) -> Result<(), ManifestError> {
        for (index, target) in self.targets.iter().enumerate() {
            if target.name.is_empty() {
                return Err(ManifestError::Malformed(String::from(
                    "target name cannot be empty",
                )));
            }
            if self.targets[..index].iter().any(|t| t.name == target.name) {
                return Err(ManifestError::Malformed(format!(
                    "duplicate target `{}`",
                    target.name
                )));
            }
            for dependency in &target.dependencies {
                if let TargetDependency::Target { name, .. } = dependency {
                    if self.target(name).is_none() {
                        return Err(ManifestError::Malformed(format!(
                            "target `{}` depends on unknown target `{name}`",
                            target.name
                        )));
                    }
                }
                if let Some(condition) = dependency.condition() {
                    if condition.is_empty() {
                        return Err(ManifestError::Malformed(format!(
                            "empty condition on a dependency of target `{}`",
                            target.name
                        )));
                    }
                }
            }
            for setting in &target.settings {
                if let Some(condition) = setting.condition() {
                    if condition.is_empty() {
                        return Err(ManifestError::Malformed(format!(
                            "empty condition on a setting of target `{}`",
                            target.name
                        )));
                    }
                }
            }
            for resource in &target.resources {
                if resource.localization.is_some() && resource.rule == ResourceRule::Copy {
                    return Err(ManifestError::Malformed(format!(
                        "resource `{}` in target `{}` sets a localization, which only applies to processed resources",
                        resource.path, target.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_features(&self) -> Result<(), ManifestError> {
        let declared = self.tools_version;
        if self.default_localization.is_some() {
            SchemaFeature::DefaultLocalization.require(declared)?;
        }
        if self.targets.iter().any(|t| !t.resources.is_empty()) {
            SchemaFeature::TargetResources.require(declared)?;
        }
        if self
            .products
            .iter()
            .any(|p| matches!(p.kind, ProductKind::Plugin))
        {
            SchemaFeature::PluginProducts.require(declared)?;
        }
        if self.targets.iter().any(|t| t.kind == TargetKind::Plugin) {
            SchemaFeature::PluginTargets.require(declared)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::Malformed(String::from(
            "package name cannot be empty",
        )));
    }

    if name.len() > 64 {
        return Err(ManifestError::Malformed(format!(
            "package name `{name}` exceeds 64 characters"
        )));
    }

    // Must start with a letter
    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(ManifestError::Malformed(format!(
            "package name `{name}` must start with a letter"
        )));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(ManifestError::Malformed(format!(
                "package name `{name}` can only contain letters, numbers, hyphens, and underscores"
            )));
        }
    }

    Ok(())
}
