//! Loading `keel.toml` declarations into manifests.
//!
//! The loader reads a package root, checks the tools-version marker
//! against the running toolchain, deserializes the declaration, and
//! assembles a validated [`Manifest`]. Loading has no side effects beyond
//! the file read, so it is safe to run concurrently for different
//! packages; a committed revision's manifest never changes, which makes
//! results cacheable by (identity, revision). The workspace layer owns
//! that cache.

use std::path::Path;

use semver::Version;
use serde::Deserialize;

use crate::identity::{IdentityResolver, PackageIdentity};
use crate::manifest::{
    BuildConfiguration, Condition, Dependency, LibraryLinkage, Localization, Manifest,
    ManifestError, PackageKind, Platform, Product, ProductKind, Resource, ResourceRule, Setting,
    Target, TargetDependency, TargetKind, VersionRequirement, MANIFEST_FILE,
};
use crate::tools_version::{self, ToolsVersion};

/// Provenance for one load: what the workspace knows about the package
/// whose manifest is being read.
#[derive(Debug, Clone)]
pub struct PackageOrigin {
    pub identity: PackageIdentity,
    pub kind: PackageKind,
    /// The declared, pre-mirror location.
    pub location: String,
    pub version: Option<Version>,
    pub revision: Option<String>,
}

impl PackageOrigin {
    /// Origin of the workspace's own package.
    #[must_use]
    pub fn root(location: &str) -> Self {
        Self {
            identity: PackageIdentity::from_location(location),
            kind: PackageKind::Root,
            location: location.to_string(),
            version: None,
            revision: None,
        }
    }

    /// Origin of a filesystem dependency.
    #[must_use]
    pub fn local(identity: PackageIdentity, path: &str) -> Self {
        Self {
            identity,
            kind: PackageKind::Local,
            location: path.to_string(),
            version: None,
            revision: None,
        }
    }

    /// Origin of a source-control dependency.
    #[must_use]
    pub fn remote(identity: PackageIdentity, location: &str) -> Self {
        Self {
            identity,
            kind: PackageKind::Remote,
            location: location.to_string(),
            version: None,
            revision: None,
        }
    }

    /// Record the released version this manifest is being loaded at.
    #[must_use]
    pub fn at_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Record the exact revision this manifest is being loaded at.
    #[must_use]
    pub fn at_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }
}

/// Reads and evaluates package declarations.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    tools_version: ToolsVersion,
    identities: IdentityResolver,
}

impl ManifestLoader {
    /// A loader for the current toolchain schema version.
    #[must_use]
    pub fn new(identities: IdentityResolver) -> Self {
        Self::with_tools_version(identities, ToolsVersion::CURRENT)
    }

    /// A loader that behaves like a toolchain supporting up to
    /// `tools_version`.
    #[must_use]
    pub fn with_tools_version(identities: IdentityResolver, tools_version: ToolsVersion) -> Self {
        Self {
            tools_version,
            identities,
        }
    }

    #[must_use]
    pub fn tools_version(&self) -> ToolsVersion {
        self.tools_version
    }

    #[must_use]
    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    /// Load the manifest at a package root.
    ///
    /// # Errors
    ///
    /// `NotFound` when the root has no `keel.toml`; otherwise the standard
    /// taxonomy: `ToolsVersionMismatch`, `Malformed` (including marker and
    /// shape problems), `UnsupportedFeature`, plus `Io`/`Parse` carriers.
    pub fn load(&self, package_root: &Path, origin: PackageOrigin) -> Result<Manifest, ManifestError> {
        let path = package_root.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ManifestError::NotFound(path));
        }
        let source = std::fs::read_to_string(&path)?;
        self.load_source(&source, origin)
    }

    /// Load the workspace's own manifest.
    pub fn load_root(&self, workspace_root: &Path) -> Result<Manifest, ManifestError> {
        let location = workspace_root.display().to_string();
        self.load(workspace_root, PackageOrigin::root(&location))
    }

    /// Evaluate manifest source text.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`ManifestLoader::load`], minus `NotFound`.
    pub fn load_source(&self, source: &str, origin: PackageOrigin) -> Result<Manifest, ManifestError> {
        let declared = tools_version::parse_marker(source)?;
        if declared > self.tools_version {
            return Err(ManifestError::ToolsVersionMismatch {
                declared,
                supported: self.tools_version,
            });
        }

        let wire: ManifestWire = toml::from_str(source)?;
        let manifest = self.assemble(wire, declared, origin)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn assemble(
        &self,
        wire: ManifestWire,
        declared: ToolsVersion,
        origin: PackageOrigin,
    ) -> Result<Manifest, ManifestError> {
        let mut dependencies = Vec::with_capacity(wire.dependencies.len());
        for dependency in wire.dependencies {
            dependencies.push(self.assemble_dependency(dependency)?);
        }

        let mut products = Vec::with_capacity(wire.products.len());
        for product in wire.products {
            products.push(assemble_product(product)?);
        }

        let mut targets = Vec::with_capacity(wire.targets.len());
        for target in wire.targets {
            targets.push(assemble_target(target)?);
        }

        Ok(Manifest {
            identity: origin.identity,
            kind: origin.kind,
            location: origin.location,
            version: origin.version,
            revision: origin.revision,
            tools_version: declared,
            name: wire.package.name,
            default_localization: wire.package.default_localization,
            platforms: wire
                .platforms
                .into_iter()
                .map(|p| Platform {
                    name: p.name,
                    version: p.version,
                })
                .collect(),
            language_versions: wire.package.language_versions,
            dependencies,
            products,
            targets,
        })
    }

    fn assemble_dependency(&self, wire: DependencyWire) -> Result<Dependency, ManifestError> {
        match (wire.url, wire.path) {
            (Some(url), None) => {
                let requirement = requirement_from_wire(
                    &url,
                    wire.from,
                    wire.exact,
                    wire.up_to_next_minor_from,
                    wire.range,
                    wire.branch,
                    wire.revision,
                )?;
                let identity = self.identities.identity(&url);
                Ok(Dependency::Remote {
                    identity,
                    location: url,
                    requirement,
                })
            }
            (None, Some(path)) => {
                let has_requirement = wire.from.is_some()
                    || wire.exact.is_some()
                    || wire.up_to_next_minor_from.is_some()
                    || wire.range.is_some()
                    || wire.branch.is_some()
                    || wire.revision.is_some();
                if has_requirement {
                    return Err(ManifestError::Malformed(format!(
                        "path dependency `{path}` cannot declare a version requirement"
                    )));
                }
                let identity = self.identities.identity(&path);
                Ok(Dependency::Local { identity, path })
            }
            (Some(url), Some(_)) => Err(ManifestError::Malformed(format!(
                "dependency `{url}` declares both `url` and `path`"
            ))),
            (None, None) => Err(ManifestError::Malformed(String::from(
                "a dependency must declare `url` or `path`",
            ))),
        }
    }
}

fn requirement_from_wire(
    url: &str,
    from: Option<Version>,
    exact: Option<Version>,
    up_to_next_minor_from: Option<Version>,
    range: Option<RangeWire>,
    branch: Option<String>,
    revision: Option<String>,
) -> Result<VersionRequirement, ManifestError> {
    let mut requirements = Vec::new();
    if let Some(lower) = from {
        requirements.push(VersionRequirement::from_version(lower));
    }
    if let Some(version) = exact {
        requirements.push(VersionRequirement::Exact(version));
    }
    if let Some(lower) = up_to_next_minor_from {
        requirements.push(VersionRequirement::up_to_next_minor(lower));
    }
    if let Some(range) = range {
        requirements.push(VersionRequirement::Range {
            lower: range.lower,
            upper: range.upper,
        });
    }
    if let Some(branch) = branch {
        requirements.push(VersionRequirement::Branch(branch));
    }
    if let Some(revision) = revision {
        requirements.push(VersionRequirement::Revision(revision));
    }

    match requirements.len() {
        1 => Ok(requirements.remove(0)),
        0 => Err(ManifestError::Malformed(format!(
            "dependency `{url}` must declare a version requirement \
             (`from`, `exact`, `up-to-next-minor-from`, `range`, `branch`, or `revision`)"
        ))),
        n => Err(ManifestError::Malformed(format!(
            "dependency `{url}` declares {n} version requirements, expected exactly one"
        ))),
    }
}

fn assemble_product(wire: ProductWire) -> Result<Product, ManifestError> {
    let kind = match wire.kind.as_str() {
        "library" => ProductKind::Library(match wire.linkage.as_deref() {
            None => LibraryLinkage::Automatic,
            Some("static") => LibraryLinkage::Static,
            Some("dynamic") => LibraryLinkage::Dynamic,
            Some(other) => {
                return Err(ManifestError::Malformed(format!(
                    "unknown linkage `{other}` for product `{}`",
                    wire.name
                )))
            }
        }),
        "executable" | "plugin" => {
            if wire.linkage.is_some() {
                return Err(ManifestError::Malformed(format!(
                    "linkage is only valid for library products, not `{}`",
                    wire.name
                )));
            }
            if wire.kind == "executable" {
                ProductKind::Executable
            } else {
                ProductKind::Plugin
            }
        }
        other => {
            return Err(ManifestError::Malformed(format!(
                "unknown product kind `{other}` for product `{}`",
                wire.name
            )))
        }
    };

    Ok(Product {
        name: wire.name,
        kind,
        targets: wire.targets,
    })
}

fn assemble_target(wire: TargetWire) -> Result<Target, ManifestError> {
    let kind = match wire.kind.as_deref() {
        None | Some("regular") => TargetKind::Regular,
        Some("executable") => TargetKind::Executable,
        Some("test") => TargetKind::Test,
        Some("plugin") => TargetKind::Plugin,
        Some(other) => {
            return Err(ManifestError::Malformed(format!(
                "unknown target kind `{other}` for target `{}`",
                wire.name
            )))
        }
    };

    let mut dependencies = Vec::with_capacity(wire.dependencies.len());
    for dependency in wire.dependencies {
        dependencies.push(assemble_target_dependency(dependency, &wire.name)?);
    }

    let mut settings = Vec::with_capacity(wire.settings.len());
    for setting in wire.settings {
        settings.push(assemble_setting(setting, &wire.name)?);
    }

    let mut resources = Vec::with_capacity(wire.resources.len());
    for resource in wire.resources {
        resources.push(assemble_resource(resource, &wire.name)?);
    }

    Ok(Target {
        name: wire.name,
        kind,
        path: wire.path,
        dependencies,
        settings,
        resources,
    })
}

fn assemble_target_dependency(
    wire: TargetDependencyWire,
    target_name: &str,
) -> Result<TargetDependency, ManifestError> {
    let detail = match wire {
        TargetDependencyWire::Name(name) => {
            return Ok(TargetDependency::Named {
                name,
                condition: None,
            })
        }
        TargetDependencyWire::Detailed(detail) => detail,
    };

    let condition = detail.condition.map(assemble_condition).transpose()?;
    match (detail.name, detail.target, detail.product) {
        (Some(name), None, None) => {
            if detail.package.is_some() {
                return Err(ManifestError::Malformed(format!(
                    "`package` is only valid with `product` on dependencies of target `{target_name}`"
                )));
            }
            Ok(TargetDependency::Named { name, condition })
        }
        (None, Some(name), None) => {
            if detail.package.is_some() {
                return Err(ManifestError::Malformed(format!(
                    "`package` is only valid with `product` on dependencies of target `{target_name}`"
                )));
            }
            Ok(TargetDependency::Target { name, condition })
        }
        (None, None, Some(name)) => Ok(TargetDependency::Product {
            name,
            package: detail.package,
            condition,
        }),
        _ => Err(ManifestError::Malformed(format!(
            "a dependency of target `{target_name}` must declare exactly one of `name`, `target`, or `product`"
        ))),
    }
}

fn assemble_setting(wire: SettingWire, target_name: &str) -> Result<Setting, ManifestError> {
    let condition = wire.condition.map(assemble_condition).transpose()?;
    match (wire.header_search_path, wire.define, wire.linked_library) {
        (Some(path), None, None) => Ok(Setting::HeaderSearchPath { path, condition }),
        (None, Some(DefineWire::Plain(name)), None) => Ok(Setting::Define {
            name,
            value: None,
            condition,
        }),
        (None, Some(DefineWire::Valued { name, value }), None) => Ok(Setting::Define {
            name,
            value: Some(value),
            condition,
        }),
        (None, None, Some(name)) => Ok(Setting::LinkedLibrary { name, condition }),
        _ => Err(ManifestError::Malformed(format!(
            "a setting of target `{target_name}` must declare exactly one of \
             `header-search-path`, `define`, or `linked-library`"
        ))),
    }
}

fn assemble_resource(wire: ResourceWire, target_name: &str) -> Result<Resource, ManifestError> {
    let rule = match wire.rule.as_str() {
        "copy" => ResourceRule::Copy,
        "process" => ResourceRule::Process,
        other => {
            return Err(ManifestError::Malformed(format!(
                "unknown resource rule `{other}` in target `{target_name}`"
            )))
        }
    };

    let localization = match wire.localization.as_deref() {
        None => None,
        Some("default") => Some(Localization::Default),
        Some("base") => Some(Localization::Base),
        Some(other) => {
            return Err(ManifestError::Malformed(format!(
                "unknown localization `{other}` in target `{target_name}`"
            )))
        }
    };

    Ok(Resource {
        rule,
        path: wire.path,
        localization,
    })
}

fn assemble_condition(wire: ConditionWire) -> Result<Condition, ManifestError> {
    let configuration = match wire.configuration.as_deref() {
        None => None,
        Some("debug") => Some(BuildConfiguration::Debug),
        Some("release") => Some(BuildConfiguration::Release),
        Some(other) => {
            return Err(ManifestError::Malformed(format!(
                "unknown configuration `{other}`, expected `debug` or `release`"
            )))
        }
    };
    Ok(Condition {
        platforms: wire.platforms,
        configuration,
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestWire {
    package: PackageSection,
    #[serde(default)]
    platforms: Vec<PlatformWire>,
    #[serde(default)]
    dependencies: Vec<DependencyWire>,
    #[serde(default)]
    products: Vec<ProductWire>,
    #[serde(default)]
    targets: Vec<TargetWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PackageSection {
    name: String,
    #[serde(default)]
    default_localization: Option<String>,
    #[serde(default)]
    language_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlatformWire {
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct DependencyWire {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    from: Option<Version>,
    #[serde(default)]
    exact: Option<Version>,
    #[serde(default)]
    up_to_next_minor_from: Option<Version>,
    #[serde(default)]
    range: Option<RangeWire>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeWire {
    lower: Version,
    upper: Version,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProductWire {
    name: String,
    kind: String,
    #[serde(default)]
    linkage: Option<String>,
    #[serde(default)]
    targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetWire {
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    dependencies: Vec<TargetDependencyWire>,
    #[serde(default)]
    settings: Vec<SettingWire>,
    #[serde(default)]
    resources: Vec<ResourceWire>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetDependencyWire {
    Name(String),
    Detailed(TargetDependencyDetail),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetDependencyDetail {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    condition: Option<ConditionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionWire {
    #[serde(default)]
    platforms: Vec<String>,
    #[serde(default)]
    configuration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SettingWire {
    #[serde(default)]
    header_search_path: Option<String>,
    #[serde(default)]
    define: Option<DefineWire>,
    #[serde(default)]
    linked_library: Option<String>,
    #[serde(default)]
    condition: Option<ConditionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DefineWire {
    Plain(String),
    Valued { name: String, value: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceWire {
    rule: String,
    path: String,
    #[serde(default)]
    localization: Option<String>,
}
