//! Workspace-local mirror configuration (`mirrors.toml`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::manifest::ManifestError;

/// File name of the mirror configuration inside the workspace state
/// directory.
pub const MIRRORS_FILE: &str = "mirrors.toml";

/// One mirror rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorEntry {
    /// The location as declared by dependents.
    pub original: String,

    /// The location to fetch from instead.
    pub mirror: String,
}

/// Ordered mapping from original locations to mirror locations.
///
/// Lookup is an exact match on the original location; the first matching
/// entry wins. Mirrors are workspace-local policy: they affect fetching
/// and identity derivation but are never written into pins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorMap {
    entries: Vec<MirrorEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MirrorsFile {
    #[serde(default, rename = "mirror")]
    mirrors: Vec<MirrorEntry>,
}

impl MirrorMap {
    /// Create an empty mirror table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the mirror for an original location.
    pub fn set(&mut self, original: &str, mirror: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.original == original) {
            entry.mirror = mirror.to_string();
        } else {
            self.entries.push(MirrorEntry {
                original: original.to_string(),
                mirror: mirror.to_string(),
            });
        }
    }

    /// Remove the mirror for an original location. Returns whether an
    /// entry existed.
    pub fn unset(&mut self, original: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.original != original);
        self.entries.len() != before
    }

    /// The location to fetch from: the configured mirror if the declared
    /// location matches an entry exactly, the declared location otherwise.
    #[must_use]
    pub fn effective<'a>(&'a self, location: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|e| e.original == location)
            .map_or(location, |e| e.mirror.as_str())
    }

    /// The configured mirror for an original location, if any.
    #[must_use]
    pub fn mirror_for(&self, original: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.original == original)
            .map(|e| e.mirror.as_str())
    }

    /// All entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[MirrorEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Load the mirror table from a configuration file. A missing file is
    /// an empty table, not an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let file: MirrorsFile = toml::from_str(&content)?;
        Ok(Self {
            entries: file.mirrors,
        })
    }

    /// Write the mirror table to a configuration file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let file = MirrorsFile {
            mirrors: self.entries.clone(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| ManifestError::Malformed(format!("failed to encode mirrors: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
