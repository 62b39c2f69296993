//! Working directories for pinned packages.
//!
//! This module provides:
//! - One checkout per pinned identity, created lazily
//! - In-place updates when a pinned revision moves
//! - Detection of interrupted checkouts via per-checkout state records
//!
//! A checkout is complete only once its state record is written; the
//! record is the last step of every fresh checkout, so a crash in the
//! middle leaves a directory without a record, which the next run
//! detects and redoes.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::thread;

use keel_manifest::{IdentityResolver, PackageIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pins::{Pin, Pins};
use crate::vcs::{RepositoryProvider, VcsError};

/// Errors that can occur while materializing checkouts.
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// The underlying version control operation failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Filesystem manipulation around the checkout failed.
    #[error("checkout I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The per-checkout state record could not be encoded.
    #[error("checkout state could not be encoded: {0}")]
    State(String),
}

/// How [`CheckoutManager::ensure`] satisfied one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// A new working directory was cloned and checked out.
    Fresh,
    /// An existing working directory moved to the pinned revision.
    Updated,
    /// The working directory was already at the pinned revision.
    Reused,
}

/// What a completed checkout was created from.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckoutState {
    location: String,
    revision: String,
}

/// Owns the checkout directory and brings it in line with a pin set.
pub struct CheckoutManager<'a, R> {
    repositories: &'a R,
    resolver: &'a IdentityResolver,
    directory: PathBuf,
}

impl<'a, R: RepositoryProvider> CheckoutManager<'a, R> {
    pub fn new(
        repositories: &'a R,
        resolver: &'a IdentityResolver,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repositories,
            resolver,
            directory: directory.into(),
        }
    }

    /// Directory a pinned identity is checked out into.
    #[must_use]
    pub fn checkout_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.directory.join(identity.as_str())
    }

    /// The revision the identity's checkout records, if one is complete.
    #[must_use]
    pub fn checkout_revision(&self, identity: &PackageIdentity) -> Option<String> {
        self.read_state(identity).map(|state| state.revision)
    }

    /// Bring one pin's checkout to its pinned revision.
    ///
    /// A directory without a state record is treated as interrupted and
    /// redone from scratch. A complete checkout at the pinned revision
    /// is left alone; one at an older revision of the same source is
    /// fetched and moved in place, preserving unrelated files in the
    /// directory.
    pub fn ensure(&self, pin: &Pin) -> Result<CheckoutOutcome, CheckoutError> {
        let identity = &pin.identity;
        let directory = self.checkout_path(identity);
        let location = self.resolver.effective_location(&pin.location);
        let revision = pin.state.revision();

        if let Some(state) = self.read_state(identity) {
            if directory.is_dir() && state.location == location {
                if state.revision == revision {
                    return Ok(CheckoutOutcome::Reused);
                }
                let mut repository = self.repositories.open_repository(&directory)?;
                repository.fetch()?;
                repository.checkout(revision)?;
                self.write_state(
                    identity,
                    &CheckoutState {
                        location,
                        revision: revision.to_string(),
                    },
                )?;
                tracing::debug!(
                    target: "workspace",
                    package = %identity,
                    %revision,
                    "checkout updated"
                );
                return Ok(CheckoutOutcome::Updated);
            }
        }

        // Start over: the checkout is absent, interrupted, or from
        // another source.
        if directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        let state_path = self.state_path(identity);
        if state_path.exists() {
            fs::remove_file(&state_path)?;
        }
        let staging = self.staging_path(identity);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        let mut repository = self.repositories.clone_repository(&location, &staging)?;
        repository.checkout(revision)?;
        fs::rename(&staging, &directory)?;
        self.write_state(
            identity,
            &CheckoutState {
                location,
                revision: revision.to_string(),
            },
        )?;
        tracing::debug!(
            target: "workspace",
            package = %identity,
            %revision,
            "checkout created"
        );
        Ok(CheckoutOutcome::Fresh)
    }

    /// Materialize every pin, one thread per identity.
    ///
    /// Identities map to distinct directories, so the threads never
    /// touch the same path. Results come back sorted by identity; the
    /// first failing identity in that order decides the error.
    pub fn materialize(
        &self,
        pins: &Pins,
    ) -> Result<Vec<(PackageIdentity, CheckoutOutcome)>, CheckoutError>
    where
        R: Sync,
    {
        let results = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for pin in pins.iter() {
                let results = &results;
                scope.spawn(move || {
                    let outcome = self.ensure(pin);
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((pin.identity.clone(), outcome));
                });
            }
        });
        let mut gathered = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        gathered.sort_by(|left, right| left.0.cmp(&right.0));
        let mut outcomes = Vec::with_capacity(gathered.len());
        for (identity, outcome) in gathered {
            outcomes.push((identity, outcome?));
        }
        Ok(outcomes)
    }

    fn state_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.directory.join(format!("{identity}.state"))
    }

    fn staging_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.directory.join(format!("{identity}.tmp"))
    }

    fn read_state(&self, identity: &PackageIdentity) -> Option<CheckoutState> {
        let content = fs::read_to_string(self.state_path(identity)).ok()?;
        toml::from_str(&content).ok()
    }

    fn write_state(
        &self,
        identity: &PackageIdentity,
        state: &CheckoutState,
    ) -> Result<(), CheckoutError> {
        let content =
            toml::to_string(state).map_err(|e| CheckoutError::State(e.to_string()))?;
        fs::write(self.state_path(identity), content)?;
        Ok(())
    }
}
