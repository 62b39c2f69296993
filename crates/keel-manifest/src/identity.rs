//! Canonical package identities derived from declared locations.

use serde::{Deserialize, Serialize};

use crate::mirrors::MirrorMap;

/// Canonical, case-insensitive key for a package.
///
/// Derived from the normalized form of the location a dependent declared:
/// the last path component with any `.git` suffix and trailing slashes
/// removed, lowercased. Two declarations that normalize to the same
/// identity refer to the same package and unify to one graph node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PackageIdentity(String);

impl PackageIdentity {
    /// Create an identity directly from a name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_lowercase())
    }

    /// Derive the canonical identity for a declared location.
    ///
    /// Handles URL-like locations (`https://…`, `git@host:org/repo.git`,
    /// `file://…`) and filesystem paths (relative, absolute, `~`-prefixed)
    /// uniformly. Unknown shapes pass through: the last component of
    /// whatever was declared becomes the identity.
    #[must_use]
    pub fn from_location(location: &str) -> Self {
        let mut stripped = location.trim();
        if let Some(rest) = stripped.strip_prefix("file://") {
            stripped = rest;
        }
        let stripped = stripped.trim_end_matches('/');
        let stripped = stripped.strip_suffix(".git").unwrap_or(stripped);
        let stripped = stripped.trim_end_matches('/');

        // Both `/` and `:` separate the final component so scp-style
        // `git@host:org/repo` locations normalize like URLs.
        let component = stripped.rsplit(['/', ':']).next().unwrap_or(stripped);
        let canonical = if component.is_empty() {
            stripped
        } else {
            component
        };
        if canonical.is_empty() {
            Self(String::from("unnamed"))
        } else {
            Self(canonical.to_ascii_lowercase())
        }
    }

    /// The canonical identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PackageIdentity {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<PackageIdentity> for String {
    fn from(identity: PackageIdentity) -> Self {
        identity.0
    }
}

impl AsRef<str> for PackageIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps declared locations to identities and effective fetch locations.
///
/// Mirror rewriting happens here, once, before identity derivation, so two
/// declarations whose mirrors coincide unify to the same identity. Both
/// operations are pure; an unknown location passes through unchanged and
/// gets a fresh identity.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    mirrors: MirrorMap,
}

impl IdentityResolver {
    /// Create a resolver over the given mirror table.
    #[must_use]
    pub fn new(mirrors: MirrorMap) -> Self {
        Self { mirrors }
    }

    /// The canonical identity for a declared location, after mirrors.
    #[must_use]
    pub fn identity(&self, declared_location: &str) -> PackageIdentity {
        PackageIdentity::from_location(self.mirrors.effective(declared_location))
    }

    /// The location to actually fetch from: the configured mirror when one
    /// matches the declared location exactly, the declared location itself
    /// otherwise.
    #[must_use]
    pub fn effective_location(&self, declared_location: &str) -> String {
        self.mirrors.effective(declared_location).to_string()
    }

    /// The mirror table this resolver consults.
    #[must_use]
    pub fn mirrors(&self) -> &MirrorMap {
        &self.mirrors
    }
}
