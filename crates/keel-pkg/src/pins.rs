//! The pins file: the persisted record of a completed resolution.
//!
//! `keel.pins` holds one entry per resolved package identity with the
//! original (pre-mirror) location, what was chosen (version, branch, or
//! bare revision), and the exact revision used for the checkout. The
//! file is plain TOML sorted by identity, so it diffs cleanly, and
//! resolving again with unchanged inputs rewrites it byte for byte.

use keel_manifest::PackageIdentity;
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the pins file at a workspace root.
pub const PINS_FILE: &str = "keel.pins";

/// Format version written to and expected from the pins file.
pub const PINS_VERSION: u32 = 1;

/// Errors from reading or writing the pins file.
#[derive(Error, Debug)]
pub enum PinsError {
    /// The pins file does not exist.
    #[error("pins file not found at {}", .0.display())]
    NotFound(PathBuf),

    /// Reading or replacing the file failed.
    #[error("failed to access pins file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for the pins schema.
    #[error("malformed pins file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but violates a schema rule.
    #[error("malformed pins file: {0}")]
    Malformed(String),

    /// The file was written by an incompatible tool.
    #[error("pins file version {found} is not supported")]
    UnsupportedVersion { found: u32 },
}

/// What was chosen for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinState {
    /// A tagged version, checked out at the tag's revision.
    Version { version: Version, revision: String },
    /// The tip of a branch at resolution time.
    Branch { name: String, revision: String },
    /// An exact revision with no version or branch semantics.
    Revision { revision: String },
}

impl PinState {
    /// The exact revision the checkout uses.
    #[must_use]
    pub fn revision(&self) -> &str {
        match self {
            Self::Version { revision, .. }
            | Self::Branch { revision, .. }
            | Self::Revision { revision } => revision,
        }
    }

    /// The pinned version, when the pin is version-based.
    #[must_use]
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::Version { version, .. } => Some(version),
            _ => None,
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version { version, .. } => write!(f, "{version}"),
            Self::Branch { name, revision } => write!(f, "branch `{name}` at {revision}"),
            Self::Revision { revision } => write!(f, "revision `{revision}`"),
        }
    }
}

/// One resolved package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub identity: PackageIdentity,
    /// The declared, pre-mirror location.
    pub location: String,
    pub state: PinState,
}

/// The full pin set of one resolution, keyed and ordered by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pins {
    entries: BTreeMap<PackageIdentity, Pin>,
}

impl Pins {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the pin for its identity.
    pub fn insert(&mut self, pin: Pin) {
        self.entries.insert(pin.identity.clone(), pin);
    }

    pub fn remove(&mut self, identity: &PackageIdentity) -> Option<Pin> {
        self.entries.remove(identity)
    }

    #[must_use]
    pub fn get(&self, identity: &PackageIdentity) -> Option<&Pin> {
        self.entries.get(identity)
    }

    #[must_use]
    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pins in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.entries.values()
    }

    /// Pinned identities in order.
    pub fn identities(&self) -> impl Iterator<Item = &PackageIdentity> {
        self.entries.keys()
    }

    /// Read a pins file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, `Parse`/`Malformed`
    /// if its content does not describe a valid pin set, and
    /// `UnsupportedVersion` for files written by an incompatible tool.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PinsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PinsError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        text.parse()
    }

    /// Write the pins file atomically.
    ///
    /// The content goes to a temporary sibling first and is renamed over
    /// the target, so a failed write leaves any previous file untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or the
    /// rename fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PinsError> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, self.to_string())?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl fmt::Display for Pins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version = {PINS_VERSION}")?;
        for pin in self.entries.values() {
            writeln!(f)?;
            writeln!(f, "[[pin]]")?;
            writeln!(f, "identity = {}", toml_escape(pin.identity.as_str()))?;
            writeln!(f, "location = {}", toml_escape(&pin.location))?;
            match &pin.state {
                PinState::Version { version, revision } => {
                    writeln!(f, "kind = \"version\"")?;
                    writeln!(f, "version = \"{version}\"")?;
                    writeln!(f, "revision = {}", toml_escape(revision))?;
                }
                PinState::Branch { name, revision } => {
                    writeln!(f, "kind = \"branch\"")?;
                    writeln!(f, "branch = {}", toml_escape(name))?;
                    writeln!(f, "revision = {}", toml_escape(revision))?;
                }
                PinState::Revision { revision } => {
                    writeln!(f, "kind = \"revision\"")?;
                    writeln!(f, "revision = {}", toml_escape(revision))?;
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Pins {
    type Err = PinsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wire: PinsFile = toml::from_str(s)?;
        if wire.version != PINS_VERSION {
            return Err(PinsError::UnsupportedVersion {
                found: wire.version,
            });
        }
        let mut pins = Pins::new();
        for entry in wire.pins {
            let identity = entry.identity.clone();
            let pin = entry.into_pin()?;
            if pins.contains(&identity) {
                return Err(PinsError::Malformed(format!(
                    "pin '{identity}' appears more than once"
                )));
            }
            pins.insert(pin);
        }
        Ok(pins)
    }
}

fn toml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PinsFile {
    version: u32,
    #[serde(default, rename = "pin")]
    pins: Vec<PinWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PinWire {
    identity: PackageIdentity,
    location: String,
    kind: String,
    version: Option<Version>,
    branch: Option<String>,
    revision: String,
}

impl PinWire {
    fn into_pin(self) -> Result<Pin, PinsError> {
        let state = match self.kind.as_str() {
            "version" => {
                let version = self.version.ok_or_else(|| {
                    PinsError::Malformed(format!(
                        "pin '{}' has kind \"version\" but no version",
                        self.identity
                    ))
                })?;
                PinState::Version {
                    version,
                    revision: self.revision,
                }
            }
            "branch" => {
                let name = self.branch.ok_or_else(|| {
                    PinsError::Malformed(format!(
                        "pin '{}' has kind \"branch\" but no branch",
                        self.identity
                    ))
                })?;
                PinState::Branch {
                    name,
                    revision: self.revision,
                }
            }
            "revision" => PinState::Revision {
                revision: self.revision,
            },
            other => {
                return Err(PinsError::Malformed(format!(
                    "pin '{}' has unknown kind \"{other}\"",
                    self.identity
                )))
            }
        };
        Ok(Pin {
            identity: self.identity,
            location: self.location,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn version_pin(identity: &str, location: &str, version: &str, revision: &str) -> Pin {
        Pin {
            identity: PackageIdentity::new(identity),
            location: location.to_string(),
            state: PinState::Version {
                version: Version::parse(version).unwrap(),
                revision: revision.to_string(),
            },
        }
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PINS_FILE);

        let mut pins = Pins::new();
        pins.insert(version_pin(
            "foo",
            "https://example.com/foo",
            "1.2.0",
            "rev-1.2.0",
        ));
        pins.insert(Pin {
            identity: PackageIdentity::new("bar"),
            location: String::from("https://example.com/bar"),
            state: PinState::Branch {
                name: String::from("main"),
                revision: String::from("abcdef0"),
            },
        });
        pins.insert(Pin {
            identity: PackageIdentity::new("baz"),
            location: String::from("git@example.com:org/baz.git"),
            state: PinState::Revision {
                revision: String::from("0123456789abcdef"),
            },
        });

        pins.save(&path).unwrap();
        let reloaded = Pins::load(&path).unwrap();
        assert_eq!(reloaded, pins);
    }

    #[test]
    fn output_is_sorted_by_identity_and_byte_stable() {
        let mut pins = Pins::new();
        pins.insert(version_pin("zlib", "https://example.com/zlib", "2.0.0", "z"));
        pins.insert(version_pin("alpha", "https://example.com/alpha", "1.0.0", "a"));

        let text = pins.to_string();
        let alpha = text.find("identity = \"alpha\"").unwrap();
        let zlib = text.find("identity = \"zlib\"").unwrap();
        assert!(alpha < zlib);

        let reparsed: Pins = text.parse().unwrap();
        assert_eq!(reparsed.to_string(), text);
    }

    #[test]
    fn version_header_is_written_and_checked() {
        let pins = Pins::new();
        assert!(pins.to_string().starts_with("version = 1\n"));

        let err = "version = 2\n".parse::<Pins>().unwrap_err();
        assert!(matches!(
            err,
            PinsError::UnsupportedVersion { found: 2 }
        ));
    }

    #[test]
    fn rejects_incoherent_entries() {
        let missing_version = "\
version = 1

[[pin]]
identity = \"foo\"
location = \"https://example.com/foo\"
kind = \"version\"
revision = \"abc\"
";
        assert!(matches!(
            missing_version.parse::<Pins>().unwrap_err(),
            PinsError::Malformed(_)
        ));

        let unknown_kind = "\
version = 1

[[pin]]
identity = \"foo\"
location = \"https://example.com/foo\"
kind = \"tag\"
revision = \"abc\"
";
        assert!(matches!(
            unknown_kind.parse::<Pins>().unwrap_err(),
            PinsError::Malformed(_)
        ));

        let duplicated = "\
version = 1

[[pin]]
identity = \"foo\"
location = \"https://example.com/foo\"
kind = \"revision\"
revision = \"abc\"

[[pin]]
identity = \"foo\"
location = \"https://example.com/foo\"
kind = \"revision\"
revision = \"def\"
";
        assert!(matches!(
            duplicated.parse::<Pins>().unwrap_err(),
            PinsError::Malformed(_)
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Pins::load(dir.path().join(PINS_FILE)).unwrap_err();
        assert!(matches!(err, PinsError::NotFound(_)));
    }

    #[test]
    fn failed_save_leaves_previous_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PINS_FILE);

        let mut original = Pins::new();
        original.insert(version_pin("foo", "https://example.com/foo", "1.0.0", "r1"));
        original.save(&path).unwrap();
        let original_text = fs::read_to_string(&path).unwrap();

        // A directory at the staging path makes the write fail before
        // the rename.
        fs::create_dir(dir.path().join("keel.pins.tmp")).unwrap();

        let mut updated = original.clone();
        updated.insert(version_pin("bar", "https://example.com/bar", "2.0.0", "r2"));
        assert!(updated.save(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), original_text);
    }
}
