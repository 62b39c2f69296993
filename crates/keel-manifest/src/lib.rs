//! Package manifests for the Keel programming language.
//!
//! This crate provides:
//! - Parsing and validation of `keel.toml` manifests
//! - Tools-version markers and schema feature gating
//! - Package identity derivation from declared locations
//! - Mirror tables for redirecting dependency locations
//! - Regeneration of manifest source text from the model

mod generate;
mod identity;
mod loader;
mod manifest;
mod mirrors;
mod tools_version;

pub use generate::generate;
pub use identity::{IdentityResolver, PackageIdentity};
pub use loader::{ManifestLoader, PackageOrigin};
pub use manifest::{
    BuildConfiguration, Condition, Dependency, LibraryLinkage, Localization, Manifest,
    ManifestError, PackageKind, Platform, Product, ProductKind, Resource, ResourceRule, Setting,
    Target, TargetDependency, TargetKind, VersionRequirement, MANIFEST_FILE,
};
pub use mirrors::{MirrorEntry, MirrorMap, MIRRORS_FILE};
pub use tools_version::{SchemaFeature, ToolsVersion, TOOLS_VERSION_PREFIX};
