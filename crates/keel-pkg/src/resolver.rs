//! Version resolution over declared dependency graphs.
//!
//! This module provides:
//! - Constraint accumulation from manifests as the graph is explored
//! - Candidate ordering, newest satisfying version first
//! - Backtracking over an explicit decision stack
//! - Minimal conflicting-requirement sets when resolution fails

use std::collections::HashMap;

use indexmap::IndexSet;
use keel_manifest::{Dependency, Manifest, PackageIdentity, PackageKind, VersionRequirement};
use semver::Version;
use thiserror::Error;

use crate::pins::{Pin, PinState, Pins};
use crate::provider::{PackageReference, Provider, ProviderError, Selector};

/// Errors that can occur during dependency resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No selection satisfies every requirement reaching the package.
    #[error("conflicting requirements for package '{identity}':\n  {}", format_constraints(.conflicts))]
    Unsatisfiable {
        identity: PackageIdentity,
        conflicts: Vec<Constraint>,
    },

    /// A dependency names the root package.
    #[error("circular dependency on root package '{identity}'")]
    Cycle { identity: PackageIdentity },

    /// One identity is declared at locations of incompatible kinds.
    #[error("package '{identity}' is declared at incompatible locations: {}", .locations.join(", "))]
    IdentityCollision {
        identity: PackageIdentity,
        locations: Vec<String>,
    },

    /// The provider could not supply versions, a manifest, or a revision.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

fn format_constraints(constraints: &[Constraint]) -> String {
    constraints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// One declared edge's requirement on an identity, with provenance.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// Identity the requirement applies to.
    pub identity: PackageIdentity,
    /// Package whose manifest declared the edge.
    pub declared_by: PackageIdentity,
    /// The declared requirement. `None` for filesystem edges, which
    /// accept any working-tree state.
    pub requirement: Option<VersionRequirement>,
    /// The edge's target as declared, before any mirror rewrite.
    pub reference: PackageReference,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.requirement {
            Some(requirement) => write!(
                f,
                "{} {} (declared by {})",
                self.identity, requirement, self.declared_by
            ),
            None => write!(
                f,
                "{} at `{}` (declared by {})",
                self.identity, self.reference.location, self.declared_by
            ),
        }
    }
}

/// What a decision frame selected for its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    Version(Version),
    Branch(String),
    Revision(String),
    Local,
}

impl Selection {
    fn selector(&self) -> Selector {
        match self {
            Self::Version(version) => Selector::Version(version.clone()),
            Self::Branch(name) => Selector::Branch(name.clone()),
            Self::Revision(revision) => Selector::Revision(revision.clone()),
            Self::Local => Selector::Local,
        }
    }
}

/// One decision on the stack: an assignment plus what is left to try.
///
/// `watermark` is the constraint log's length when the frame was pushed;
/// everything the frame's manifest contributed sits at or above it.
#[derive(Debug)]
struct Frame {
    reference: PackageReference,
    selection: Selection,
    alternatives: Vec<Version>,
    watermark: usize,
}

struct Solver<'a, P: ?Sized> {
    provider: &'a mut P,
    preferences: &'a Pins,
    root: PackageIdentity,
    log: Vec<Constraint>,
    frames: Vec<Frame>,
    /// Constraint targets in first-appearance order; drives which
    /// undecided identity is picked next.
    order: IndexSet<PackageIdentity>,
    /// First reference seen for each identity, used for provider calls.
    references: HashMap<PackageIdentity, PackageReference>,
}

/// Resolve `root`'s dependency graph to exact pins.
///
/// `preferences` are advisory: a preferred version that still satisfies
/// every requirement reaching its identity is chosen over the newest
/// one. Filesystem dependencies join the graph but produce no pin.
pub fn resolve<P>(
    root: &Manifest,
    provider: &mut P,
    preferences: &Pins,
) -> Result<Pins, ResolveError>
where
    P: Provider + ?Sized,
{
    let mut solver = Solver {
        provider,
        preferences,
        root: root.identity.clone(),
        log: Vec::new(),
        frames: Vec::new(),
        order: IndexSet::new(),
        references: HashMap::new(),
    };
    solver.append_manifest(root)?;
    solver.run()?;
    tracing::debug!(
        target: "resolver",
        packages = solver.frames.len(),
        "resolution complete"
    );
    solver.finalize()
}

impl<P: Provider + ?Sized> Solver<'_, P> {
    fn run(&mut self) -> Result<(), ResolveError> {
        while let Some(reference) = self.next_undecided() {
            self.decide(reference)?;
        }
        Ok(())
    }

    fn next_undecided(&self) -> Option<PackageReference> {
        self.order
            .iter()
            .find(|identity| {
                !self
                    .frames
                    .iter()
                    .any(|frame| frame.reference.identity == **identity)
            })
            .and_then(|identity| self.references.get(identity).cloned())
    }

    /// Pick a selection for one undecided identity and push its frame.
    fn decide(&mut self, reference: PackageReference) -> Result<(), ResolveError> {
        let identity = reference.identity.clone();
        let requirements: Vec<VersionRequirement> = self
            .log
            .iter()
            .filter(|constraint| constraint.identity == identity)
            .filter_map(|constraint| constraint.requirement.clone())
            .collect();

        let mut version_requirements = Vec::new();
        let mut ref_selection: Option<Selection> = None;
        for requirement in requirements {
            let candidate = match requirement {
                VersionRequirement::Exact(_) | VersionRequirement::Range { .. } => {
                    version_requirements.push(requirement);
                    continue;
                }
                VersionRequirement::Branch(name) => Selection::Branch(name),
                VersionRequirement::Revision(revision) => Selection::Revision(revision),
            };
            match &ref_selection {
                None => ref_selection = Some(candidate),
                Some(existing) if *existing == candidate => {}
                Some(_) => return self.conflict(identity),
            }
        }

        // A branch or revision requirement is only usable when nothing
        // else asks for released versions of the same package.
        if let Some(selection) = ref_selection {
            if !version_requirements.is_empty() {
                return self.conflict(identity);
            }
            return self.commit(reference, selection, Vec::new());
        }

        if reference.kind == PackageKind::Local {
            return self.commit(reference, Selection::Local, Vec::new());
        }

        let available = self.provider.available_versions(&reference)?;
        let mut candidates: Vec<Version> = available
            .into_iter()
            .rev()
            .filter(|version| {
                version_requirements
                    .iter()
                    .all(|requirement| requirement.satisfied_by(version))
            })
            .collect();
        if let Some(preferred) = self
            .preferences
            .get(&identity)
            .and_then(|pin| pin.state.version())
        {
            if let Some(position) = candidates
                .iter()
                .position(|candidate| candidate == preferred)
            {
                let version = candidates.remove(position);
                candidates.insert(0, version);
            }
        }
        if candidates.is_empty() {
            return self.conflict(identity);
        }
        let selected = candidates.remove(0);
        self.commit(reference, Selection::Version(selected), candidates)
    }

    /// Record a selection and fold its manifest into the constraint log.
    fn commit(
        &mut self,
        reference: PackageReference,
        selection: Selection,
        alternatives: Vec<Version>,
    ) -> Result<(), ResolveError> {
        let manifest = self.provider.manifest(&reference, &selection.selector())?;
        tracing::debug!(
            target: "resolver",
            package = %reference.identity,
            selection = %selection.selector(),
            "decided"
        );
        self.frames.push(Frame {
            reference,
            selection,
            alternatives,
            watermark: self.log.len(),
        });
        self.append_manifest(&manifest)
    }

    fn append_manifest(&mut self, manifest: &Manifest) -> Result<(), ResolveError> {
        for dependency in &manifest.dependencies {
            self.append_constraint(manifest.identity.clone(), dependency)?;
        }
        self.check_decisions()
    }

    fn append_constraint(
        &mut self,
        declared_by: PackageIdentity,
        dependency: &Dependency,
    ) -> Result<(), ResolveError> {
        let reference = PackageReference::from_dependency(dependency);
        let identity = reference.identity.clone();
        if identity == self.root {
            return Err(ResolveError::Cycle { identity });
        }
        if let Some(existing) = self.references.get(&identity) {
            let collides = existing.kind != reference.kind
                || (existing.kind == PackageKind::Local
                    && existing.location != reference.location);
            if collides {
                return Err(ResolveError::IdentityCollision {
                    identity,
                    locations: vec![existing.location.clone(), reference.location.clone()],
                });
            }
        } else {
            self.references.insert(identity.clone(), reference.clone());
        }
        self.order.insert(identity.clone());
        let requirement = match dependency {
            Dependency::Local { .. } => None,
            Dependency::Remote { requirement, .. } => Some(requirement.clone()),
        };
        self.log.push(Constraint {
            identity,
            declared_by,
            requirement,
            reference,
        });
        Ok(())
    }

    /// Re-check every decision against the log after new constraints land.
    fn check_decisions(&mut self) -> Result<(), ResolveError> {
        let invalidated = self.frames.iter().find_map(|frame| {
            let violated = self.log.iter().any(|constraint| {
                constraint.identity == frame.reference.identity
                    && !selection_satisfies(&frame.selection, constraint)
            });
            violated.then(|| frame.reference.identity.clone())
        });
        match invalidated {
            Some(identity) => self.conflict(identity),
            None => Ok(()),
        }
    }

    /// Backtrack out of a conflict on `identity`.
    ///
    /// The report is captured up front, while the log still holds every
    /// clashing constraint; it is what gets returned if backtracking
    /// exhausts the stack. Each round rewinds to the deepest frame that
    /// assigned or constrained the conflicted identity and retries its
    /// next alternative; a frame with none left propagates the conflict
    /// to its own identity.
    fn conflict(&mut self, identity: PackageIdentity) -> Result<(), ResolveError> {
        let report = self.unsatisfiable(&identity);
        let mut conflicted = identity;
        loop {
            let Some(index) = self.deepest_contributing_frame(&conflicted) else {
                return Err(report);
            };
            self.frames.truncate(index + 1);
            let Some(frame) = self.frames.pop() else {
                return Err(report);
            };
            self.truncate_log(frame.watermark);
            let mut alternatives = frame.alternatives;
            if alternatives.is_empty() {
                conflicted = frame.reference.identity.clone();
                continue;
            }
            let next = alternatives.remove(0);
            tracing::debug!(
                target: "resolver",
                package = %frame.reference.identity,
                version = %next,
                "backtracking"
            );
            return self.commit(frame.reference, Selection::Version(next), alternatives);
        }
    }

    fn deepest_contributing_frame(&self, identity: &PackageIdentity) -> Option<usize> {
        (0..self.frames.len()).rev().find(|&index| {
            let frame = &self.frames[index];
            if frame.reference.identity == *identity {
                return true;
            }
            let end = self
                .frames
                .get(index + 1)
                .map_or(self.log.len(), |next| next.watermark);
            self.log[frame.watermark..end]
                .iter()
                .any(|constraint| constraint.identity == *identity)
        })
    }

    /// Drop log entries above `watermark` and rebuild the derived maps.
    fn truncate_log(&mut self, watermark: usize) {
        self.log.truncate(watermark);
        self.order.clear();
        self.references.clear();
        for constraint in &self.log {
            self.order.insert(constraint.identity.clone());
            self.references
                .entry(constraint.identity.clone())
                .or_insert_with(|| constraint.reference.clone());
        }
    }

    fn unsatisfiable(&mut self, identity: &PackageIdentity) -> ResolveError {
        let involved: Vec<Constraint> = self
            .log
            .iter()
            .filter(|constraint| constraint.identity == *identity)
            .cloned()
            .collect();
        let conflicts = self.minimal_conflict(identity, involved);
        ResolveError::Unsatisfiable {
            identity: identity.clone(),
            conflicts,
        }
    }

    /// Greedily drop requirements that are not needed for the conflict,
    /// so the report names only the declarations that actually clash.
    fn minimal_conflict(
        &mut self,
        identity: &PackageIdentity,
        involved: Vec<Constraint>,
    ) -> Vec<Constraint> {
        let Some(reference) = self.references.get(identity).cloned() else {
            return involved;
        };
        let candidates = match self.provider.available_versions(&reference) {
            Ok(versions) => versions,
            Err(_) => return involved,
        };
        let mut kept = involved;
        let mut index = 0;
        while index < kept.len() {
            let removed = kept.remove(index);
            if constraints_conflict(&kept, &candidates) {
                continue;
            }
            kept.insert(index, removed);
            index += 1;
        }
        kept
    }

    /// Turn the decision stack into pins, resolving exact revisions.
    fn finalize(self) -> Result<Pins, ResolveError> {
        let mut pins = Pins::new();
        for frame in &self.frames {
            let state = match &frame.selection {
                Selection::Local => continue,
                Selection::Version(version) => {
                    let revision = self
                        .provider
                        .revision(&frame.reference, &Selector::Version(version.clone()))?;
                    PinState::Version {
                        version: version.clone(),
                        revision,
                    }
                }
                Selection::Branch(name) => {
                    let revision = self
                        .provider
                        .revision(&frame.reference, &Selector::Branch(name.clone()))?;
                    PinState::Branch {
                        name: name.clone(),
                        revision,
                    }
                }
                Selection::Revision(revision) => {
                    let revision = self
                        .provider
                        .revision(&frame.reference, &Selector::Revision(revision.clone()))?;
                    PinState::Revision { revision }
                }
            };
            pins.insert(Pin {
                identity: frame.reference.identity.clone(),
                location: frame.reference.location.clone(),
                state,
            });
        }
        Ok(pins)
    }
}

fn selection_satisfies(selection: &Selection, constraint: &Constraint) -> bool {
    let Some(requirement) = &constraint.requirement else {
        return true;
    };
    match (requirement, selection) {
        (
            VersionRequirement::Exact(_) | VersionRequirement::Range { .. },
            Selection::Version(version),
        ) => requirement.satisfied_by(version),
        (VersionRequirement::Branch(name), Selection::Branch(selected)) => name == selected,
        (VersionRequirement::Revision(revision), Selection::Revision(selected)) => {
            revision == selected
        }
        _ => false,
    }
}

/// Whether no single selection could satisfy every listed requirement.
fn constraints_conflict(constraints: &[Constraint], candidates: &[Version]) -> bool {
    let requirements: Vec<&VersionRequirement> = constraints
        .iter()
        .filter_map(|constraint| constraint.requirement.as_ref())
        .collect();
    if requirements.is_empty() {
        return false;
    }
    let reference_requirements: Vec<&VersionRequirement> = requirements
        .iter()
        .copied()
        .filter(|requirement| !requirement.is_version_based())
        .collect();
    if !reference_requirements.is_empty() {
        if reference_requirements.len() < requirements.len() {
            return true;
        }
        return reference_requirements
            .windows(2)
            .any(|pair| pair[0] != pair[1]);
    }
    !candidates.iter().any(|version| {
        requirements
            .iter()
            .all(|requirement| requirement.satisfied_by(version))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_dependency, manifest, remote_dependency, InMemoryProvider};

    fn version(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    fn from(text: &str) -> VersionRequirement {
        VersionRequirement::from_version(version(text))
    }

    #[test]
    fn picks_the_highest_satisfying_version() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(util, version("1.0.0"), manifest("util", vec![]));
        provider.add_version(util, version("1.2.0"), manifest("util", vec![]));
        provider.add_version(util, version("2.0.0"), manifest("util", vec![]));

        let root = manifest("app", vec![remote_dependency(util, from("1.0.0"))]);
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        assert_eq!(pins.len(), 1);
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.location, util);
        assert_eq!(pin.state.version(), Some(&version("1.2.0")));
        assert_eq!(pin.state.revision(), "rev-1.2.0");
    }

    #[test]
    fn narrows_to_the_intersection_of_all_requirements() {
        let a = "https://example.com/a.git";
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    util,
                    VersionRequirement::up_to_next_minor(version("1.1.0")),
                )],
            ),
        );
        for published in ["1.0.0", "1.1.0", "1.1.5", "1.2.0"] {
            provider.add_version(util, version(published), manifest("util", vec![]));
        }

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency(util, from("1.0.0")),
            ],
        );
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.1.5")));
    }

    #[test]
    fn backtracks_to_an_older_version_when_a_deeper_requirement_conflicts() {
        let a = "https://example.com/a.git";
        let c = "https://example.com/c.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    c,
                    VersionRequirement::Exact(version("1.0.0")),
                )],
            ),
        );
        provider.add_version(
            a,
            version("2.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    c,
                    VersionRequirement::Exact(version("2.0.0")),
                )],
            ),
        );
        provider.add_version(c, version("1.0.0"), manifest("c", vec![]));

        let root = manifest(
            "app",
            vec![
                remote_dependency(
                    a,
                    VersionRequirement::Range {
                        lower: version("1.0.0"),
                        upper: version("3.0.0"),
                    },
                ),
                remote_dependency(c, from("1.0.0")),
            ],
        );
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        let a_pin = pins.get(&PackageIdentity::new("a")).unwrap();
        assert_eq!(a_pin.state.version(), Some(&version("1.0.0")));
        let c_pin = pins.get(&PackageIdentity::new("c")).unwrap();
        assert_eq!(c_pin.state.version(), Some(&version("1.0.0")));
    }

    #[test]
    fn branch_and_range_conflict_names_both_requirements() {
        let a = "https://example.com/a.git";
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    util,
                    VersionRequirement::Branch("main".to_string()),
                )],
            ),
        );
        provider.add_version(util, version("1.0.0"), manifest("util", vec![]));
        provider.add_branch(util, "main", "tip", manifest("util", vec![]));

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency(util, from("1.0.0")),
            ],
        );
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();

        let ResolveError::Unsatisfiable {
            identity,
            conflicts,
        } = &error
        else {
            panic!("expected an unsatisfiable graph, got {error}");
        };
        assert_eq!(*identity, PackageIdentity::new("util"));
        assert_eq!(conflicts.len(), 2);
        let rendered = error.to_string();
        assert!(rendered.contains("branch `main`"));
        assert!(rendered.contains("1.0.0..<2.0.0"));
    }

    #[test]
    fn location_spellings_unify_to_one_package() {
        let a = "https://example.com/a.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    "https://example.com/util.git",
                    VersionRequirement::up_to_next_minor(version("1.0.0")),
                )],
            ),
        );
        for published in ["1.0.0", "1.0.5", "1.2.0"] {
            provider.add_version(
                "https://example.com/Util.git",
                version(published),
                manifest("util", vec![]),
            );
        }

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency("https://example.com/Util.git", from("1.0.0")),
            ],
        );
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        assert_eq!(pins.len(), 2);
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.0.5")));
    }

    #[test]
    fn conflicting_requirements_across_spellings_report_one_identity() {
        let a = "https://example.com/a.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    "https://example.com/util.git",
                    VersionRequirement::Exact(version("1.2.0")),
                )],
            ),
        );
        for published in ["1.0.0", "1.2.0"] {
            provider.add_version(
                "https://example.com/Util.git",
                version(published),
                manifest("util", vec![]),
            );
        }

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency(
                    "https://example.com/Util.git",
                    VersionRequirement::Exact(version("1.0.0")),
                ),
            ],
        );
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();

        let ResolveError::Unsatisfiable {
            identity,
            conflicts,
        } = &error
        else {
            panic!("expected an unsatisfiable graph, got {error}");
        };
        assert_eq!(*identity, PackageIdentity::new("util"));
        assert_eq!(conflicts.len(), 2);
        let declarers: Vec<&str> = conflicts
            .iter()
            .map(|constraint| constraint.declared_by.as_str())
            .collect();
        assert!(declarers.contains(&"app"));
        assert!(declarers.contains(&"a"));
    }

    #[test]
    fn resolution_is_deterministic_across_runs() {
        let a = "https://example.com/a.git";
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.4.0"),
            manifest("a", vec![remote_dependency(util, from("1.0.0"))]),
        );
        for published in ["1.0.0", "1.3.0", "1.9.2"] {
            provider.add_version(util, version(published), manifest("util", vec![]));
        }

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency(util, from("1.0.0")),
            ],
        );
        let first = resolve(&root, &mut provider, &Pins::new()).unwrap();
        let second = resolve(&root, &mut provider, &Pins::new()).unwrap();

        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn preferred_version_wins_while_it_still_satisfies() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        for published in ["1.0.0", "1.1.0", "1.2.0"] {
            provider.add_version(util, version(published), manifest("util", vec![]));
        }
        let root = manifest("app", vec![remote_dependency(util, from("1.0.0"))]);

        let mut preferences = Pins::new();
        preferences.insert(Pin {
            identity: PackageIdentity::new("util"),
            location: util.to_string(),
            state: PinState::Version {
                version: version("1.1.0"),
                revision: "rev-1.1.0".to_string(),
            },
        });
        let pins = resolve(&root, &mut provider, &preferences).unwrap();
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.1.0")));
    }

    #[test]
    fn preference_outside_the_requirements_is_ignored() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        for published in ["0.9.0", "1.0.0", "1.2.0"] {
            provider.add_version(util, version(published), manifest("util", vec![]));
        }
        let root = manifest("app", vec![remote_dependency(util, from("1.0.0"))]);

        let mut preferences = Pins::new();
        preferences.insert(Pin {
            identity: PackageIdentity::new("util"),
            location: util.to_string(),
            state: PinState::Version {
                version: version("0.9.0"),
                revision: "rev-0.9.0".to_string(),
            },
        });
        let pins = resolve(&root, &mut provider, &preferences).unwrap();
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.2.0")));
    }

    #[test]
    fn conflict_report_drops_requirements_that_are_not_to_blame() {
        let a = "https://example.com/a.git";
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    util,
                    VersionRequirement::Exact(version("2.0.0")),
                )],
            ),
        );
        provider.add_version(util, version("1.5.0"), manifest("util", vec![]));

        let root = manifest(
            "app",
            vec![
                remote_dependency(a, from("1.0.0")),
                remote_dependency(util, from("1.0.0")),
            ],
        );
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();

        let ResolveError::Unsatisfiable { conflicts, .. } = &error else {
            panic!("expected an unsatisfiable graph, got {error}");
        };
        // The root's own requirement is satisfiable on its own; only the
        // exact requirement on an unpublished version is to blame.
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].declared_by, PackageIdentity::new("a"));
        assert_eq!(
            conflicts[0].requirement,
            Some(VersionRequirement::Exact(version("2.0.0")))
        );
    }

    #[test]
    fn path_and_url_declarations_of_one_identity_collide() {
        let a = "https://example.com/a.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency(
                    "https://example.com/util.git",
                    from("1.0.0"),
                )],
            ),
        );
        provider.add_local("../util", manifest("util", vec![]));

        let root = manifest(
            "app",
            vec![
                local_dependency("../util"),
                remote_dependency(a, from("1.0.0")),
            ],
        );
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();

        let ResolveError::IdentityCollision {
            identity,
            locations,
        } = &error
        else {
            panic!("expected an identity collision, got {error}");
        };
        assert_eq!(*identity, PackageIdentity::new("util"));
        assert!(locations.contains(&"../util".to_string()));
        assert!(locations.contains(&"https://example.com/util.git".to_string()));
    }

    #[test]
    fn dependency_on_the_root_package_is_a_cycle() {
        let a = "https://example.com/a.git";
        let mut provider = InMemoryProvider::new();
        provider.add_version(
            a,
            version("1.0.0"),
            manifest(
                "a",
                vec![remote_dependency("https://example.com/app.git", from("1.0.0"))],
            ),
        );

        let root = manifest("app", vec![remote_dependency(a, from("1.0.0"))]);
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();
        assert!(matches!(error, ResolveError::Cycle { identity } if identity == PackageIdentity::new("app")));
    }

    #[test]
    fn local_dependency_extends_the_graph_without_a_pin() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_local(
            "../tools",
            manifest("tools", vec![remote_dependency(util, from("1.0.0"))]),
        );
        provider.add_version(util, version("1.3.0"), manifest("util", vec![]));

        let root = manifest("app", vec![local_dependency("../tools")]);
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        assert_eq!(pins.len(), 1);
        assert!(!pins.contains(&PackageIdentity::new("tools")));
        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), Some(&version("1.3.0")));
    }

    #[test]
    fn exact_requirement_on_an_unpublished_version_names_itself() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        for published in ["1.0.0", "1.1.0"] {
            provider.add_version(util, version(published), manifest("util", vec![]));
        }

        let root = manifest(
            "app",
            vec![remote_dependency(
                util,
                VersionRequirement::Exact(version("2.0.0")),
            )],
        );
        let error = resolve(&root, &mut provider, &Pins::new()).unwrap_err();

        let ResolveError::Unsatisfiable { conflicts, .. } = &error else {
            panic!("expected an unsatisfiable graph, got {error}");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].requirement,
            Some(VersionRequirement::Exact(version("2.0.0")))
        );
    }

    #[test]
    fn branch_requirement_pins_the_tip_revision() {
        let util = "https://example.com/util.git";
        let mut provider = InMemoryProvider::new();
        provider.add_branch(util, "main", "abc123", manifest("util", vec![]));

        let root = manifest(
            "app",
            vec![remote_dependency(
                util,
                VersionRequirement::Branch("main".to_string()),
            )],
        );
        let pins = resolve(&root, &mut provider, &Pins::new()).unwrap();

        let pin = pins.get(&PackageIdentity::new("util")).unwrap();
        assert_eq!(pin.state.version(), None);
        assert_eq!(pin.state.revision(), "abc123");
        assert_eq!(pin.state.to_string(), "branch `main` at abc123");
    }
}
