//! In-memory doubles for exercising resolution and checkouts.
//!
//! This module provides a [`Provider`] backed by staged package records
//! and a [`RepositoryProvider`] whose repositories live in a shared
//! store, so tests can publish versions, move branches, and tag
//! revisions without a real source control host. Both doubles hand out
//! deterministic data: versions added through [`InMemoryProvider`] get
//! the synthetic revision `rev-<version>`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keel_manifest::{
    Dependency, Manifest, PackageIdentity, PackageKind, ToolsVersion, VersionRequirement,
    MANIFEST_FILE,
};
use semver::Version;

use crate::provider::{PackageReference, Provider, ProviderError, Selector};
use crate::vcs::{Repository, RepositoryProvider, VcsError};

/// A root manifest with the given name and dependency edges.
#[must_use]
pub fn manifest(name: &str, dependencies: Vec<Dependency>) -> Manifest {
    let mut manifest = Manifest::new(name, ToolsVersion::CURRENT);
    manifest.dependencies = dependencies;
    manifest
}

/// A source-control dependency edge on `location`.
#[must_use]
pub fn remote_dependency(location: &str, requirement: VersionRequirement) -> Dependency {
    Dependency::Remote {
        identity: PackageIdentity::from_location(location),
        location: location.to_string(),
        requirement,
    }
}

/// A filesystem dependency edge on `path`.
#[must_use]
pub fn local_dependency(path: &str) -> Dependency {
    Dependency::Local {
        identity: PackageIdentity::from_location(path),
        path: path.to_string(),
    }
}

/// The revision [`InMemoryProvider::add_version`] records for a version.
#[must_use]
pub fn synthetic_revision(version: &Version) -> String {
    format!("rev-{version}")
}

#[derive(Debug, Default)]
struct PackageRecord {
    versions: BTreeMap<Version, (String, Manifest)>,
    branches: BTreeMap<String, (String, Manifest)>,
    revisions: BTreeMap<String, Manifest>,
    local: Option<Manifest>,
}

/// A [`Provider`] serving staged manifests straight from memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    packages: HashMap<PackageIdentity, PackageRecord>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, identity: PackageIdentity) -> &mut PackageRecord {
        self.packages.entry(identity).or_default()
    }

    /// Publish `manifest` as a tagged version of the package at
    /// `location`, under the revision [`synthetic_revision`] yields.
    pub fn add_version(&mut self, location: &str, version: Version, mut manifest: Manifest) {
        let identity = PackageIdentity::from_location(location);
        let revision = synthetic_revision(&version);
        manifest.identity = identity.clone();
        manifest.kind = PackageKind::Remote;
        manifest.location = location.to_string();
        manifest.version = Some(version.clone());
        manifest.revision = Some(revision.clone());
        self.record(identity)
            .versions
            .insert(version, (revision, manifest));
    }

    /// Stage `manifest` as the current tip of `branch`. The tip is also
    /// reachable by its revision.
    pub fn add_branch(
        &mut self,
        location: &str,
        branch: &str,
        revision: &str,
        mut manifest: Manifest,
    ) {
        let identity = PackageIdentity::from_location(location);
        manifest.identity = identity.clone();
        manifest.kind = PackageKind::Remote;
        manifest.location = location.to_string();
        manifest.version = None;
        manifest.revision = Some(revision.to_string());
        let record = self.record(identity);
        record
            .branches
            .insert(branch.to_string(), (revision.to_string(), manifest.clone()));
        record.revisions.insert(revision.to_string(), manifest);
    }

    /// Stage `manifest` at a bare revision.
    pub fn add_revision(&mut self, location: &str, revision: &str, mut manifest: Manifest) {
        let identity = PackageIdentity::from_location(location);
        manifest.identity = identity.clone();
        manifest.kind = PackageKind::Remote;
        manifest.location = location.to_string();
        manifest.version = None;
        manifest.revision = Some(revision.to_string());
        self.record(identity)
            .revisions
            .insert(revision.to_string(), manifest);
    }

    /// Stage `manifest` as the working tree of a filesystem package.
    pub fn add_local(&mut self, path: &str, mut manifest: Manifest) {
        let identity = PackageIdentity::from_location(path);
        manifest.identity = identity.clone();
        manifest.kind = PackageKind::Local;
        manifest.location = path.to_string();
        manifest.version = None;
        manifest.revision = None;
        self.record(identity).local = Some(manifest);
    }

    fn lookup(&self, package: &PackageReference) -> Result<&PackageRecord, ProviderError> {
        self.packages
            .get(&package.identity)
            .ok_or_else(|| ProviderError::UnknownPackage {
                identity: package.identity.clone(),
                location: package.location.clone(),
            })
    }
}

impl Provider for InMemoryProvider {
    fn available_versions(
        &mut self,
        package: &PackageReference,
    ) -> Result<Vec<Version>, ProviderError> {
        let record = self.lookup(package)?;
        Ok(record.versions.keys().cloned().collect())
    }

    fn manifest(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<Manifest, ProviderError> {
        let record = self.lookup(package)?;
        match selector {
            Selector::Version(version) => record
                .versions
                .get(version)
                .map(|(_, manifest)| manifest.clone())
                .ok_or_else(|| ProviderError::UnknownVersion {
                    identity: package.identity.clone(),
                    version: version.clone(),
                }),
            Selector::Branch(branch) => record
                .branches
                .get(branch)
                .map(|(_, manifest)| manifest.clone())
                .ok_or_else(|| ProviderError::UnknownReference {
                    identity: package.identity.clone(),
                    reference: branch.clone(),
                }),
            Selector::Revision(revision) => record.revisions.get(revision).cloned().ok_or_else(
                || ProviderError::UnknownReference {
                    identity: package.identity.clone(),
                    reference: revision.clone(),
                },
            ),
            Selector::Local => {
                record
                    .local
                    .clone()
                    .ok_or_else(|| ProviderError::UnknownPackage {
                        identity: package.identity.clone(),
                        location: package.location.clone(),
                    })
            }
        }
    }

    fn revision(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<String, ProviderError> {
        let record = self.lookup(package)?;
        match selector {
            Selector::Version(version) => record
                .versions
                .get(version)
                .map(|(revision, _)| revision.clone())
                .ok_or_else(|| ProviderError::UnknownVersion {
                    identity: package.identity.clone(),
                    version: version.clone(),
                }),
            Selector::Branch(branch) => record
                .branches
                .get(branch)
                .map(|(revision, _)| revision.clone())
                .ok_or_else(|| ProviderError::UnknownReference {
                    identity: package.identity.clone(),
                    reference: branch.clone(),
                }),
            Selector::Revision(revision) => {
                if record.revisions.contains_key(revision) {
                    Ok(revision.clone())
                } else {
                    Err(ProviderError::UnknownReference {
                        identity: package.identity.clone(),
                        reference: revision.clone(),
                    })
                }
            }
            Selector::Local => Err(ProviderError::UnknownReference {
                identity: package.identity.clone(),
                reference: "local working tree".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RepositoryModel {
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    manifests: BTreeMap<String, String>,
}

/// A [`RepositoryProvider`] over repositories staged in memory.
///
/// Clones share the backing store, so tags or branches added after a
/// clone are visible through the existing handle once it fetches; this
/// is how tests stage "the upstream moved" scenarios. Cloning writes a
/// small marker file into the destination so the clone can be reopened
/// later.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepositories {
    store: Arc<Mutex<HashMap<String, RepositoryModel>>>,
}

const ORIGIN_FILE: &str = ".origin";

impl InMemoryRepositories {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, HashMap<String, RepositoryModel>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an empty repository at `location`.
    pub fn add_repository(&self, location: &str) {
        self.store().entry(location.to_string()).or_default();
    }

    /// Tag `revision` in the repository at `location` and store the
    /// manifest source checked out for it.
    pub fn add_tag(&self, location: &str, tag: &str, revision: &str, manifest_source: &str) {
        let mut store = self.store();
        let model = store.entry(location.to_string()).or_default();
        model.tags.insert(tag.to_string(), revision.to_string());
        model
            .manifests
            .insert(revision.to_string(), manifest_source.to_string());
    }

    /// Point `branch` at `revision`, storing the manifest source
    /// checked out for the new tip.
    pub fn set_branch(&self, location: &str, branch: &str, revision: &str, manifest_source: &str) {
        let mut store = self.store();
        let model = store.entry(location.to_string()).or_default();
        model
            .branches
            .insert(branch.to_string(), revision.to_string());
        model
            .manifests
            .insert(revision.to_string(), manifest_source.to_string());
    }
}

impl RepositoryProvider for InMemoryRepositories {
    fn clone_repository(
        &self,
        location: &str,
        destination: &Path,
    ) -> Result<Box<dyn Repository>, VcsError> {
        if !self.store().contains_key(location) {
            return Err(VcsError::CloneFailed {
                location: location.to_string(),
                reason: "no such repository".to_string(),
            });
        }
        fs::create_dir_all(destination)?;
        fs::write(destination.join(ORIGIN_FILE), location)?;
        Ok(Box::new(InMemoryRepository {
            location: location.to_string(),
            path: destination.to_path_buf(),
            store: Arc::clone(&self.store),
        }))
    }

    fn open_repository(&self, path: &Path) -> Result<Box<dyn Repository>, VcsError> {
        let location = fs::read_to_string(path.join(ORIGIN_FILE)).map_err(|_| {
            VcsError::NotARepository {
                path: path.display().to_string(),
            }
        })?;
        Ok(Box::new(InMemoryRepository {
            location,
            path: path.to_path_buf(),
            store: Arc::clone(&self.store),
        }))
    }
}

#[derive(Debug)]
struct InMemoryRepository {
    location: String,
    path: PathBuf,
    store: Arc<Mutex<HashMap<String, RepositoryModel>>>,
}

impl InMemoryRepository {
    fn model(&self) -> Result<RepositoryModel, VcsError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.location)
            .cloned()
            .ok_or_else(|| VcsError::NotARepository {
                path: self.path.display().to_string(),
            })
    }
}

impl Repository for InMemoryRepository {
    fn tags(&self) -> Result<Vec<String>, VcsError> {
        Ok(self.model()?.tags.keys().cloned().collect())
    }

    fn resolve_revision(&self, reference: &str) -> Result<String, VcsError> {
        let model = self.model()?;
        if let Some(revision) = model.tags.get(reference) {
            return Ok(revision.clone());
        }
        if let Some(revision) = model.branches.get(reference) {
            return Ok(revision.clone());
        }
        if model.manifests.contains_key(reference) {
            return Ok(reference.to_string());
        }
        Err(VcsError::UnknownReference {
            reference: reference.to_string(),
        })
    }

    fn fetch(&mut self) -> Result<(), VcsError> {
        // The store is shared, so new upstream state is already visible.
        Ok(())
    }

    fn checkout(&mut self, revision: &str) -> Result<(), VcsError> {
        let model = self.model()?;
        let Some(source) = model.manifests.get(revision) else {
            return Err(VcsError::UnknownReference {
                reference: revision.to_string(),
            });
        };
        fs::write(self.path.join(MANIFEST_FILE), source)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_versions_come_back_ascending() {
        let mut provider = InMemoryProvider::new();
        let location = "https://example.com/util.git";
        provider.add_version(location, Version::new(1, 2, 0), manifest("util", vec![]));
        provider.add_version(location, Version::new(1, 0, 0), manifest("util", vec![]));
        provider.add_version(location, Version::new(1, 10, 0), manifest("util", vec![]));

        let reference = PackageReference {
            identity: PackageIdentity::from_location(location),
            kind: PackageKind::Remote,
            location: location.to_string(),
        };
        let versions = provider.available_versions(&reference).unwrap();
        assert_eq!(
            versions,
            vec![
                Version::new(1, 0, 0),
                Version::new(1, 2, 0),
                Version::new(1, 10, 0),
            ]
        );
        assert_eq!(
            provider
                .revision(&reference, &Selector::Version(Version::new(1, 2, 0)))
                .unwrap(),
            "rev-1.2.0"
        );
    }

    #[test]
    fn staged_manifests_carry_their_origin() {
        let mut provider = InMemoryProvider::new();
        let location = "https://example.com/Util.git";
        provider.add_version(location, Version::new(2, 0, 0), manifest("util", vec![]));

        let reference = PackageReference {
            identity: PackageIdentity::from_location(location),
            kind: PackageKind::Remote,
            location: location.to_string(),
        };
        let loaded = provider
            .manifest(&reference, &Selector::Version(Version::new(2, 0, 0)))
            .unwrap();
        assert_eq!(loaded.identity, PackageIdentity::new("util"));
        assert_eq!(loaded.kind, PackageKind::Remote);
        assert_eq!(loaded.location, location);
        assert_eq!(loaded.version, Some(Version::new(2, 0, 0)));
        assert_eq!(loaded.revision.as_deref(), Some("rev-2.0.0"));
    }

    #[test]
    fn cloned_repository_sees_tags_added_afterwards() {
        let repositories = InMemoryRepositories::new();
        let location = "https://example.com/util.git";
        repositories.add_tag(location, "1.0.0", "aaa", "# keel-tools-version: 1.3\n");

        let dir = tempfile::tempdir().unwrap();
        let clone = repositories
            .clone_repository(location, &dir.path().join("util"))
            .unwrap();
        assert_eq!(clone.tags().unwrap(), vec!["1.0.0"]);

        repositories.add_tag(location, "1.1.0", "bbb", "# keel-tools-version: 1.3\n");
        assert_eq!(clone.tags().unwrap(), vec!["1.0.0", "1.1.0"]);
        assert_eq!(clone.resolve_revision("1.1.0").unwrap(), "bbb");
    }

    #[test]
    fn checkout_writes_the_manifest_and_reopen_finds_the_origin() {
        let repositories = InMemoryRepositories::new();
        let location = "https://example.com/util.git";
        let source = "# keel-tools-version: 1.3\n\n[package]\nname = \"util\"\n";
        repositories.add_tag(location, "1.0.0", "aaa", source);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("util");
        let mut clone = repositories.clone_repository(location, &path).unwrap();
        clone.checkout("aaa").unwrap();
        assert_eq!(fs::read_to_string(path.join(MANIFEST_FILE)).unwrap(), source);

        let reopened = repositories.open_repository(&path).unwrap();
        assert_eq!(reopened.resolve_revision("1.0.0").unwrap(), "aaa");

        let err = repositories
            .open_repository(&dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, VcsError::NotARepository { .. }));
    }
}
