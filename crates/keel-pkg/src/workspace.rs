//! Workspace state over one package root.
//!
//! This module provides:
//! - Pin lifecycle: load, validate, re-resolve, atomic save
//! - A repository-backed [`Provider`] with scratch clones under `.keel`
//! - Update semantics with per-identity change reporting
//! - Checkout materialization driven by the pin set
//!
//! A workspace root holds `keel.toml`, the `keel.pins` file next to it,
//! and a `.keel` directory with mirror configuration, scratch clones the
//! provider reads manifests from, and the checkouts builds consume.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use keel_manifest::{
    Dependency, IdentityResolver, Manifest, ManifestError, ManifestLoader, MirrorMap,
    PackageIdentity, PackageKind, PackageOrigin, VersionRequirement, MIRRORS_FILE,
};
use semver::Version;
use thiserror::Error;

use crate::checkout::{CheckoutError, CheckoutManager, CheckoutOutcome};
use crate::pins::{Pin, PinState, Pins, PinsError, PINS_FILE};
use crate::provider::{version_from_tag, PackageReference, Provider, ProviderError, Selector};
use crate::resolver::{self, ResolveError};
use crate::vcs::{RepositoryProvider, VcsError};

/// Directory holding workspace-local state, under the workspace root.
pub const STATE_DIR: &str = ".keel";

const REPOSITORIES_DIR: &str = "repositories";
const CHECKOUTS_DIR: &str = "checkouts";

/// Errors surfaced by workspace operations.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Pins(#[from] PinsError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

/// Where a workspace stands between its declarations and its checkouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceStatus {
    /// No pins, or pins that no longer match the declarations.
    Unresolved,
    /// Valid pins but no checkout yet.
    Resolved,
    /// Valid pins with checkouts that lag behind them.
    CheckoutsPending,
    /// Every pin has a checkout at its pinned revision.
    Ready,
}

/// How an update run should behave.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Identities whose pins are dropped before re-resolving. Empty
    /// means every pin is up for renewal.
    pub packages: Vec<PackageIdentity>,
    /// Compute and report changes without writing anything.
    pub dry_run: bool,
}

/// One identity whose pinned state moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinChange {
    pub identity: PackageIdentity,
    pub old: PinState,
    pub new: PinState,
}

/// What an update run changed. Entry lists are sorted by identity.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub added: Vec<PackageIdentity>,
    pub removed: Vec<PackageIdentity>,
    pub updated: Vec<PinChange>,
    pub unchanged: Vec<PackageIdentity>,
    /// The pin set the update produced.
    pub pins: Pins,
}

impl UpdateOutcome {
    /// Whether the update left every pin as it was.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

fn compute_changes(previous: &Pins, pins: Pins) -> UpdateOutcome {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut updated = Vec::new();
    let mut unchanged = Vec::new();
    for pin in pins.iter() {
        match previous.get(&pin.identity) {
            None => added.push(pin.identity.clone()),
            Some(old) if old.state != pin.state => updated.push(PinChange {
                identity: pin.identity.clone(),
                old: old.state.clone(),
                new: pin.state.clone(),
            }),
            Some(_) => unchanged.push(pin.identity.clone()),
        }
    }
    for pin in previous.iter() {
        if !pins.contains(&pin.identity) {
            removed.push(pin.identity.clone());
        }
    }
    UpdateOutcome {
        added,
        removed,
        updated,
        unchanged,
        pins,
    }
}

/// One workspace root and the state machine over it.
pub struct Workspace<'a, R> {
    root: PathBuf,
    repositories: &'a R,
    resolver: IdentityResolver,
    loader: ManifestLoader,
    provider: WorkspaceProvider<'a, R>,
}

impl<'a, R: RepositoryProvider> Workspace<'a, R> {
    /// Open the workspace at `root`, reading its mirror configuration.
    pub fn open(root: impl Into<PathBuf>, repositories: &'a R) -> Result<Self, WorkspaceError> {
        let root = root.into();
        let mirrors = MirrorMap::load_or_default(root.join(STATE_DIR).join(MIRRORS_FILE))?;
        let resolver = IdentityResolver::new(mirrors);
        let provider = WorkspaceProvider::new(&root, repositories, resolver.clone());
        Ok(Self {
            loader: ManifestLoader::new(resolver.clone()),
            root,
            repositories,
            resolver,
            provider,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The mirror table this workspace applies to fetches and checkouts.
    #[must_use]
    pub fn mirrors(&self) -> &MirrorMap {
        self.resolver.mirrors()
    }

    /// Directory a pinned identity is checked out into.
    #[must_use]
    pub fn checkout_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.checkouts_dir().join(identity.as_str())
    }

    /// Bring the pins in line with the declarations.
    ///
    /// Valid pins are answered as they are. Stale pins are demoted to
    /// advisory preferences and the graph is re-resolved; the pins file
    /// is only rewritten after a successful resolution, so a failure
    /// leaves the previous pins untouched.
    pub fn resolve(&mut self) -> Result<Pins, WorkspaceError> {
        let manifest = self.loader.load_root(&self.root)?;
        self.provider.refresh();
        let previous = self.load_pins()?;
        if let Some(pins) = previous.as_ref() {
            if self.pins_are_valid(&manifest, pins) {
                tracing::debug!(target: "workspace", packages = pins.len(), "pins are valid");
                return Ok(pins.clone());
            }
        }
        let preferences = previous.unwrap_or_default();
        let pins = resolver::resolve(&manifest, &mut self.provider, &preferences)?;
        pins.save(self.pins_path())?;
        tracing::info!(target: "workspace", packages = pins.len(), "resolved");
        Ok(pins)
    }

    /// Re-resolve with pins renewed instead of preferred.
    ///
    /// Pins for the named identities (all of them when none are named)
    /// stop acting as preferences, so those packages move to the newest
    /// state their requirements allow. With `dry_run` the would-be pins
    /// are computed and reported but nothing is written.
    pub fn update(&mut self, options: &UpdateOptions) -> Result<UpdateOutcome, WorkspaceError> {
        let manifest = self.loader.load_root(&self.root)?;
        self.provider.refresh();
        let previous = self.load_pins()?.unwrap_or_default();
        let preferences = if options.packages.is_empty() {
            Pins::new()
        } else {
            let mut kept = previous.clone();
            for identity in &options.packages {
                kept.remove(identity);
            }
            kept
        };
        let pins = resolver::resolve(&manifest, &mut self.provider, &preferences)?;
        let outcome = compute_changes(&previous, pins);
        if !options.dry_run {
            outcome.pins.save(self.pins_path())?;
            tracing::info!(
                target: "workspace",
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                updated = outcome.updated.len(),
                "updated pins"
            );
        }
        Ok(outcome)
    }

    /// Resolve if needed, then bring every checkout to its pinned state.
    pub fn materialize(
        &mut self,
    ) -> Result<Vec<(PackageIdentity, CheckoutOutcome)>, WorkspaceError>
    where
        R: Sync,
    {
        let pins = self.resolve()?;
        let manager = self.checkout_manager();
        Ok(manager.materialize(&pins)?)
    }

    /// Where the workspace stands without changing anything on disk.
    pub fn status(&mut self) -> Result<WorkspaceStatus, WorkspaceError> {
        let manifest = self.loader.load_root(&self.root)?;
        let Some(pins) = self.load_pins()? else {
            return Ok(WorkspaceStatus::Unresolved);
        };
        if !self.pins_are_valid(&manifest, &pins) {
            return Ok(WorkspaceStatus::Unresolved);
        }
        let manager = self.checkout_manager();
        let mut present = 0usize;
        let mut matched = 0usize;
        for pin in pins.iter() {
            match manager.checkout_revision(&pin.identity) {
                Some(revision) if revision == pin.state.revision() => {
                    present += 1;
                    matched += 1;
                }
                Some(_) => present += 1,
                None => {}
            }
        }
        if matched == pins.len() {
            return Ok(WorkspaceStatus::Ready);
        }
        if present == 0 {
            return Ok(WorkspaceStatus::Resolved);
        }
        Ok(WorkspaceStatus::CheckoutsPending)
    }

    /// Whether `pins` still satisfy every reachable declaration.
    ///
    /// Walks the graph from the root's declarations through the pinned
    /// manifests, loaded at their pinned revisions. Every remote edge
    /// must be covered by a satisfying pin and the pin set must equal
    /// the reachable set exactly. A manifest that cannot be loaded makes
    /// the pins stale rather than failing the walk; the re-resolution
    /// that follows surfaces any real error.
    fn pins_are_valid(&mut self, root: &Manifest, pins: &Pins) -> bool {
        let mut reachable: BTreeSet<PackageIdentity> = BTreeSet::new();
        let mut locals: BTreeSet<PackageIdentity> = BTreeSet::new();
        let mut queue: Vec<Dependency> = root.dependencies.clone();
        while let Some(dependency) = queue.pop() {
            let reference = PackageReference::from_dependency(&dependency);
            let identity = reference.identity.clone();
            match &dependency {
                Dependency::Local { .. } => {
                    if !locals.insert(identity) {
                        continue;
                    }
                    let Ok(manifest) = self.provider.manifest(&reference, &Selector::Local)
                    else {
                        return false;
                    };
                    queue.extend(manifest.dependencies);
                }
                Dependency::Remote { requirement, .. } => {
                    let Some(pin) = pins.get(&identity) else {
                        return false;
                    };
                    if !pin_satisfies(pin, requirement) {
                        return false;
                    }
                    if reachable.insert(identity) {
                        let selector = Selector::Revision(pin.state.revision().to_string());
                        let Ok(manifest) = self.provider.manifest(&reference, &selector) else {
                            return false;
                        };
                        queue.extend(manifest.dependencies);
                    }
                }
            }
        }
        reachable.len() == pins.len()
    }

    fn pins_path(&self) -> PathBuf {
        self.root.join(PINS_FILE)
    }

    fn checkouts_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(CHECKOUTS_DIR)
    }

    fn checkout_manager(&self) -> CheckoutManager<'_, R> {
        CheckoutManager::new(self.repositories, &self.resolver, self.checkouts_dir())
    }

    fn load_pins(&self) -> Result<Option<Pins>, WorkspaceError> {
        let path = self.pins_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Pins::load(path)?))
    }
}

fn pin_satisfies(pin: &Pin, requirement: &VersionRequirement) -> bool {
    match requirement {
        VersionRequirement::Exact(_) | VersionRequirement::Range { .. } => pin
            .state
            .version()
            .is_some_and(|version| requirement.satisfied_by(version)),
        VersionRequirement::Branch(name) => {
            matches!(&pin.state, PinState::Branch { name: pinned, .. } if pinned == name)
        }
        VersionRequirement::Revision(revision) => {
            matches!(&pin.state, PinState::Revision { revision: pinned } if pinned == revision)
        }
    }
}

/// [`Provider`] over scratch clones in the workspace's state directory.
///
/// Each identity gets one clone under `.keel/repositories`, reused
/// across resolutions. Mutable lookups (tag lists, branch tips) are
/// refreshed once per resolution; manifests are cached by revision for
/// the workspace's lifetime, since a committed revision never changes.
/// Local manifests are read straight from their directories and never
/// cached.
struct WorkspaceProvider<'a, R> {
    repositories: &'a R,
    resolver: IdentityResolver,
    loader: ManifestLoader,
    root: PathBuf,
    scratch: PathBuf,
    fetched: HashSet<PackageIdentity>,
    tags: HashMap<PackageIdentity, BTreeMap<Version, String>>,
    branch_revisions: HashMap<(PackageIdentity, String), String>,
    manifests: HashMap<(PackageIdentity, String), Manifest>,
}

impl<'a, R: RepositoryProvider> WorkspaceProvider<'a, R> {
    fn new(root: &Path, repositories: &'a R, resolver: IdentityResolver) -> Self {
        Self {
            repositories,
            loader: ManifestLoader::new(resolver.clone()),
            resolver,
            root: root.to_path_buf(),
            scratch: root.join(STATE_DIR).join(REPOSITORIES_DIR),
            fetched: HashSet::new(),
            tags: HashMap::new(),
            branch_revisions: HashMap::new(),
            manifests: HashMap::new(),
        }
    }

    /// Forget per-resolution state so the next run sees current remotes.
    fn refresh(&mut self) {
        self.fetched.clear();
        self.tags.clear();
        self.branch_revisions.clear();
    }

    fn repository(
        &mut self,
        package: &PackageReference,
    ) -> Result<Box<dyn crate::vcs::Repository>, ProviderError> {
        let path = self.scratch.join(package.identity.as_str());
        if path.is_dir() {
            return Ok(self.repositories.open_repository(&path)?);
        }
        fs::create_dir_all(&self.scratch).map_err(VcsError::from)?;
        let location = self.resolver.effective_location(&package.location);
        let repository = self.repositories.clone_repository(&location, &path)?;
        // A fresh clone is already up to date.
        self.fetched.insert(package.identity.clone());
        tracing::debug!(
            target: "workspace",
            package = %package.identity,
            %location,
            "cloned scratch repository"
        );
        Ok(repository)
    }

    fn ensure_version_tags(&mut self, package: &PackageReference) -> Result<(), ProviderError> {
        if self.tags.contains_key(&package.identity) {
            return Ok(());
        }
        let mut repository = self.repository(package)?;
        if self.fetched.insert(package.identity.clone()) {
            repository.fetch()?;
        }
        let mut map = BTreeMap::new();
        for tag in repository.tags()? {
            if let Some(version) = version_from_tag(&tag) {
                let revision = repository.resolve_revision(&tag)?;
                map.insert(version, revision);
            }
        }
        self.tags.insert(package.identity.clone(), map);
        Ok(())
    }

    fn local_manifest(&mut self, package: &PackageReference) -> Result<Manifest, ProviderError> {
        let path = self.root.join(&package.location);
        let origin = PackageOrigin::local(package.identity.clone(), &package.location);
        self.loader
            .load(&path, origin)
            .map_err(|source| ProviderError::Manifest {
                identity: package.identity.clone(),
                selector: Selector::Local,
                source,
            })
    }

    fn manifest_at(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
        revision: &str,
    ) -> Result<Manifest, ProviderError> {
        let key = (package.identity.clone(), revision.to_string());
        if let Some(manifest) = self.manifests.get(&key) {
            return Ok(manifest.clone());
        }
        let mut repository = self.repository(package)?;
        if let Err(error) = repository.checkout(revision) {
            match error {
                VcsError::UnknownReference { .. } => {
                    repository.fetch()?;
                    repository.checkout(revision).map_err(|error| match error {
                        VcsError::UnknownReference { .. } => ProviderError::UnknownReference {
                            identity: package.identity.clone(),
                            reference: revision.to_string(),
                        },
                        other => ProviderError::Vcs(other),
                    })?;
                }
                other => return Err(ProviderError::Vcs(other)),
            }
        }
        let mut origin =
            PackageOrigin::remote(package.identity.clone(), &package.location).at_revision(revision);
        if let Selector::Version(version) = selector {
            origin = origin.at_version(version.clone());
        }
        let path = self.scratch.join(package.identity.as_str());
        let manifest = self
            .loader
            .load(&path, origin)
            .map_err(|source| ProviderError::Manifest {
                identity: package.identity.clone(),
                selector: selector.clone(),
                source,
            })?;
        self.manifests.insert(key, manifest.clone());
        Ok(manifest)
    }
}

impl<R: RepositoryProvider> Provider for WorkspaceProvider<'_, R> {
    fn available_versions(
        &mut self,
        package: &PackageReference,
    ) -> Result<Vec<Version>, ProviderError> {
        if package.kind == PackageKind::Local {
            return Ok(Vec::new());
        }
        self.ensure_version_tags(package)?;
        Ok(self
            .tags
            .get(&package.identity)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn manifest(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<Manifest, ProviderError> {
        if let Selector::Local = selector {
            return self.local_manifest(package);
        }
        let revision = self.revision(package, selector)?;
        self.manifest_at(package, selector, &revision)
    }

    fn revision(
        &mut self,
        package: &PackageReference,
        selector: &Selector,
    ) -> Result<String, ProviderError> {
        match selector {
            Selector::Version(version) => {
                self.ensure_version_tags(package)?;
                self.tags
                    .get(&package.identity)
                    .and_then(|map| map.get(version))
                    .cloned()
                    .ok_or_else(|| ProviderError::UnknownVersion {
                        identity: package.identity.clone(),
                        version: version.clone(),
                    })
            }
            Selector::Branch(name) => {
                let key = (package.identity.clone(), name.clone());
                if let Some(revision) = self.branch_revisions.get(&key) {
                    return Ok(revision.clone());
                }
                let mut repository = self.repository(package)?;
                // Branch tips move; look one up against a fresh fetch.
                if self.fetched.insert(package.identity.clone()) {
                    repository.fetch()?;
                }
                let revision =
                    repository
                        .resolve_revision(name)
                        .map_err(|error| match error {
                            VcsError::UnknownReference { .. } => {
                                ProviderError::UnknownReference {
                                    identity: package.identity.clone(),
                                    reference: name.clone(),
                                }
                            }
                            other => ProviderError::Vcs(other),
                        })?;
                self.branch_revisions.insert(key, revision.clone());
                Ok(revision)
            }
            Selector::Revision(revision) => {
                let mut repository = self.repository(package)?;
                match repository.resolve_revision(revision) {
                    Ok(found) => Ok(found),
                    Err(VcsError::UnknownReference { .. }) => {
                        repository.fetch()?;
                        self.fetched.insert(package.identity.clone());
                        repository
                            .resolve_revision(revision)
                            .map_err(|error| match error {
                                VcsError::UnknownReference { .. } => {
                                    ProviderError::UnknownReference {
                                        identity: package.identity.clone(),
                                        reference: revision.clone(),
                                    }
                                }
                                other => ProviderError::Vcs(other),
                            })
                    }
                    Err(other) => Err(ProviderError::Vcs(other)),
                }
            }
            Selector::Local => Err(ProviderError::UnknownReference {
                identity: package.identity.clone(),
                reference: "local working tree".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryRepositories;
    use keel_manifest::MANIFEST_FILE;
    use tempfile::TempDir;

    fn remote_source(name: &str) -> String {
        format!("# keel-tools-version: 1.3\n\n[package]\nname = \"{name}\"\n")
    }

    fn write_root(root: &Path, dependencies: &str) {
        let source =
            format!("# keel-tools-version: 1.3\n\n[package]\nname = \"app\"\n{dependencies}");
        fs::write(root.join(MANIFEST_FILE), source).unwrap();
    }

    fn version(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn resolves_and_materializes_a_simple_external_dependency() {
        let util = "https://example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.1.0", "aaa", &remote_source("util"));
        repositories.add_tag(util, "1.2.0", "bbb", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Unresolved);

        let pins = workspace.resolve().unwrap();
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.2.0")));
        assert_eq!(pin.state.revision(), "bbb");
        assert!(dir.path().join(PINS_FILE).exists());
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Resolved);

        let outcomes = workspace.materialize().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, CheckoutOutcome::Fresh);
        let checkout = workspace.checkout_path(&PackageIdentity::new("util"));
        assert_eq!(
            fs::read_to_string(checkout.join(MANIFEST_FILE)).unwrap(),
            remote_source("util")
        );
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Ready);
    }

    #[test]
    fn plain_reload_keeps_pins_and_update_moves_them() {
        let util = "https://example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.1.0", "aaa", &remote_source("util"));
        repositories.add_tag(util, "1.2.0", "bbb", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        workspace.resolve().unwrap();
        let saved = fs::read_to_string(dir.path().join(PINS_FILE)).unwrap();

        repositories.add_tag(util, "1.3.0", "ccc", &remote_source("util"));
        let pins = workspace.resolve().unwrap();
        assert_eq!(
            pins.get(&PackageIdentity::new("util")).unwrap().state.version(),
            Some(&version("1.2.0"))
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(PINS_FILE)).unwrap(),
            saved
        );

        let outcome = workspace.update(&UpdateOptions::default()).unwrap();
        assert!(outcome.added.is_empty());
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        let change = &outcome.updated[0];
        assert_eq!(change.identity, PackageIdentity::new("util"));
        assert_eq!(change.old.version(), Some(&version("1.2.0")));
        assert_eq!(change.new.version(), Some(&version("1.3.0")));
        assert_ne!(
            fs::read_to_string(dir.path().join(PINS_FILE)).unwrap(),
            saved
        );

        let pins = workspace.resolve().unwrap();
        assert_eq!(
            pins.get(&PackageIdentity::new("util")).unwrap().state.version(),
            Some(&version("1.3.0"))
        );
    }

    #[test]
    fn pins_record_the_original_location_when_a_mirror_serves_it() {
        let original = "https://example.com/util.git";
        let mirror = "https://mirror.example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(mirror, "1.0.0", "aaa", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let state = dir.path().join(STATE_DIR);
        fs::create_dir_all(&state).unwrap();
        let mut mirrors = MirrorMap::new();
        mirrors.set(original, mirror);
        mirrors.save(state.join(MIRRORS_FILE)).unwrap();

        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        let pins = workspace.resolve().unwrap();
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.location, original);
        let text = fs::read_to_string(dir.path().join(PINS_FILE)).unwrap();
        assert!(!text.contains("mirror.example.com"));

        workspace.materialize().unwrap();
        let checkout = workspace.checkout_path(&PackageIdentity::new("util"));
        assert_eq!(
            fs::read_to_string(checkout.join(MANIFEST_FILE)).unwrap(),
            remote_source("util")
        );
    }

    #[test]
    fn targeted_update_only_moves_the_named_identities() {
        let util = "https://example.com/util.git";
        let extra = "https://example.com/extra.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.0.0", "u1", &remote_source("util"));
        repositories.add_tag(extra, "2.0.0", "e1", &remote_source("extra"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n\n\
             [[dependencies]]\nurl = \"https://example.com/extra.git\"\nfrom = \"2.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        workspace.resolve().unwrap();

        repositories.add_tag(util, "1.1.0", "u2", &remote_source("util"));
        repositories.add_tag(extra, "2.1.0", "e2", &remote_source("extra"));
        let outcome = workspace
            .update(&UpdateOptions {
                packages: vec![PackageIdentity::new("util")],
                dry_run: false,
            })
            .unwrap();

        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].identity, PackageIdentity::new("util"));
        assert_eq!(outcome.unchanged, vec![PackageIdentity::new("extra")]);
        let pins = &outcome.pins;
        assert_eq!(
            pins.get(&PackageIdentity::new("util")).unwrap().state.version(),
            Some(&version("1.1.0"))
        );
        assert_eq!(
            pins.get(&PackageIdentity::new("extra")).unwrap().state.version(),
            Some(&version("2.0.0"))
        );
    }

    #[test]
    fn dry_run_reports_changes_without_writing_them() {
        let util = "https://example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.0.0", "aaa", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        workspace.resolve().unwrap();
        let saved = fs::read_to_string(dir.path().join(PINS_FILE)).unwrap();

        repositories.add_tag(util, "1.1.0", "bbb", &remote_source("util"));
        let outcome = workspace
            .update(&UpdateOptions {
                packages: Vec::new(),
                dry_run: true,
            })
            .unwrap();
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(
            outcome.updated[0].new.version(),
            Some(&version("1.1.0"))
        );
        assert_eq!(
            fs::read_to_string(dir.path().join(PINS_FILE)).unwrap(),
            saved
        );

        let pins = workspace.resolve().unwrap();
        assert_eq!(
            pins.get(&PackageIdentity::new("util")).unwrap().state.version(),
            Some(&version("1.0.0"))
        );
    }

    #[test]
    fn status_follows_checkouts_and_declaration_edits() {
        let util = "https://example.com/util.git";
        let extra = "https://example.com/extra.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.0.0", "u1", &remote_source("util"));
        repositories.add_tag(extra, "2.0.0", "e1", &remote_source("extra"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n\n\
             [[dependencies]]\nurl = \"https://example.com/extra.git\"\nfrom = \"2.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Unresolved);

        workspace.materialize().unwrap();
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Ready);

        let checkouts = dir.path().join(STATE_DIR).join(CHECKOUTS_DIR);
        fs::remove_file(checkouts.join("util.state")).unwrap();
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::CheckoutsPending);

        fs::remove_file(checkouts.join("extra.state")).unwrap();
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Resolved);

        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nexact = \"9.9.9\"\n\n\
             [[dependencies]]\nurl = \"https://example.com/extra.git\"\nfrom = \"2.0.0\"\n",
        );
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Unresolved);
    }

    #[test]
    fn failed_resolution_leaves_the_previous_pins_untouched() {
        let util = "https://example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.add_tag(util, "1.0.0", "aaa", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        workspace.resolve().unwrap();
        let saved = fs::read_to_string(dir.path().join(PINS_FILE)).unwrap();

        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nexact = \"9.9.9\"\n",
        );
        let error = workspace.resolve().unwrap_err();
        assert!(matches!(
            error,
            WorkspaceError::Resolve(ResolveError::Unsatisfiable { .. })
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join(PINS_FILE)).unwrap(),
            saved
        );
    }

    #[test]
    fn branch_dependency_pins_the_tip_and_update_follows_it() {
        let util = "https://example.com/util.git";
        let repositories = InMemoryRepositories::new();
        repositories.set_branch(util, "main", "tip1", &remote_source("util"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nbranch = \"main\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        let pins = workspace.resolve().unwrap();
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.revision(), "tip1");

        repositories.set_branch(util, "main", "tip2", &remote_source("util"));
        let pins = workspace.resolve().unwrap();
        assert_eq!(
            pins.get(&PackageIdentity::new("util")).unwrap().state.revision(),
            "tip1"
        );

        let outcome = workspace.update(&UpdateOptions::default()).unwrap();
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].old.revision(), "tip1");
        assert_eq!(outcome.updated[0].new.revision(), "tip2");
    }

    #[test]
    fn follows_requirements_of_fetched_manifests() {
        let util = "https://example.com/util.git";
        let extra = "https://example.com/extra.git";
        let repositories = InMemoryRepositories::new();
        let util_source = format!(
            "# keel-tools-version: 1.3\n\n[package]\nname = \"util\"\n\n\
             [[dependencies]]\nurl = \"{extra}\"\nfrom = \"1.0.0\"\n"
        );
        repositories.add_tag(util, "1.2.0", "u1", &util_source);
        repositories.add_tag(extra, "1.4.0", "e1", &remote_source("extra"));

        let dir = TempDir::new().unwrap();
        write_root(
            dir.path(),
            "\n[[dependencies]]\nurl = \"https://example.com/util.git\"\nfrom = \"1.0.0\"\n",
        );
        let mut workspace = Workspace::open(dir.path(), &repositories).unwrap();
        let pins = workspace.resolve().unwrap();

        assert_eq!(pins.len(), 2);
        assert_eq!(
            pins.get(&PackageIdentity::new("extra")).unwrap().state.version(),
            Some(&version("1.4.0"))
        );
        assert_eq!(workspace.status().unwrap(), WorkspaceStatus::Resolved);
    }
}
