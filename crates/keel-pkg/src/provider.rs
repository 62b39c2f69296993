//! The package provider consumed by the resolver.
//!
//! The solver never touches repositories or the filesystem. It asks a
//! [`Provider`] for candidate versions, manifests, and exact revisions,
//! and the provider decides where those come from: the workspace-backed
//! implementation clones repositories on demand, the in-memory one in
//! [`crate::testing`] answers from fixtures.

use keel_manifest::{Dependency, Manifest, ManifestError, PackageIdentity, PackageKind};
use semver::Version;
use std::fmt;
use thiserror::Error;

use crate::vcs::VcsError;

/// Errors surfaced by a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No repository is known for the package's location.
    #[error("unknown package '{identity}' at '{location}'")]
    UnknownPackage {
        identity: PackageIdentity,
        location: String,
    },

    /// The package exists but the requested version is not published.
    #[error("package '{identity}' has no version {version}")]
    UnknownVersion {
        identity: PackageIdentity,
        version: Version,
    },

    /// The package exists but the requested branch or revision does not.
    #[error("package '{identity}' has no reference '{reference}'")]
    UnknownReference {
        identity: PackageIdentity,
        reference: String,
    },

    /// A candidate manifest failed to load.
    #[error("manifest of '{identity}' at {selector}: {source}")]
    Manifest {
        identity: PackageIdentity,
        selector: Selector,
        #[source]
        source: ManifestError,
    },

    /// The underlying version control operation failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// A dependency as the resolver sees it: identity plus how to reach it.
///
/// `location` is the declared, pre-mirror location. Providers apply the
/// workspace's mirror table themselves when fetching, so the resolver
/// and the pins it produces only ever see original locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub identity: PackageIdentity,
    pub kind: PackageKind,
    pub location: String,
}

impl PackageReference {
    /// Reference for a declared dependency edge.
    #[must_use]
    pub fn from_dependency(dependency: &Dependency) -> Self {
        match dependency {
            Dependency::Local { identity, path } => Self {
                identity: identity.clone(),
                kind: PackageKind::Local,
                location: path.clone(),
            },
            Dependency::Remote {
                identity, location, ..
            } => Self {
                identity: identity.clone(),
                kind: PackageKind::Remote,
                location: location.clone(),
            },
        }
    }

    /// Reference for the package a manifest describes.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            identity: manifest.identity.clone(),
            kind: manifest.kind,
            location: manifest.location.clone(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.location)
    }
}

/// Which state of a package a provider call is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A published, tagged version.
    Version(Version),
    /// The current tip of a named branch.
    Branch(String),
    /// An exact revision.
    Revision(String),
    /// The working tree of a filesystem dependency.
    Local,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(version) => write!(f, "{version}"),
            Self::Branch(name) => write!(f, "branch `{name}`"),
            Self::Revision(revision) => write!(f, "revision `{revision}`"),
            Self::Local => write!(f, "local working tree"),
        }
    }
}

/// Source of candidate versions, manifests, and revisions during resolution.
///
/// Calls take `&mut self` because fetching populates caches. Within one
/// resolution the answers must be coherent: `manifest` and `revision`
/// for the same reference and selector describe the same commit.
pub trait Provider {
    /// All published versions of the package, ascending.
    fn available_versions(
        &mut self,
        package: &PackageReference,
    ) -> Result<Vec<Version>, ProviderError>;

    /// The manifest of the package at the selected state.
    fn manifest(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<Manifest, ProviderError>;

    /// The exact revision the selector denotes.
    fn revision(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<String, ProviderError>;
}

/// Parse a tag name as a version, tolerating a leading `v`.
#[must_use]
pub fn version_from_tag(tag: &str) -> Option<Version> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        return None;
    }
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}
