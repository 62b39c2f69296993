//! Version control capability consumed by the workspace.
//!
//! The core never drives a VCS client directly. Everything it needs from
//! one is the narrow surface below: clone a repository to a directory,
//! list its tags, resolve a symbolic reference to an exact revision,
//! fetch updates, and check out a revision. Real clients live outside
//! this crate; tests use the in-memory pair in [`crate::testing`].

use std::path::Path;
use thiserror::Error;

/// Errors surfaced by the version control capability.
///
/// These are transient by classification. The core reports them and lets
/// the caller decide whether to retry; it never retries on its own.
#[derive(Error, Debug)]
pub enum VcsError {
    /// Cloning a repository failed.
    #[error("failed to clone '{location}': {reason}")]
    CloneFailed { location: String, reason: String },

    /// Fetching updates for an existing clone failed.
    #[error("failed to fetch '{location}': {reason}")]
    FetchFailed { location: String, reason: String },

    /// Checking out a revision failed.
    #[error("failed to check out revision '{revision}': {reason}")]
    CheckoutFailed { revision: String, reason: String },

    /// A tag, branch, or revision does not exist in the repository.
    #[error("unknown reference '{reference}'")]
    UnknownReference { reference: String },

    /// The path does not contain a repository this provider recognizes.
    #[error("no repository at {path}")]
    NotARepository { path: String },

    /// Filesystem error while manipulating a clone.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One cloned repository.
///
/// A handle is bound to the directory it was cloned into or opened from.
/// `resolve_revision` must be coherent with `tags`: every listed tag
/// resolves, and resolving the same reference twice without an
/// intervening `fetch` returns the same revision.
pub trait Repository: std::fmt::Debug {
    /// All tag names in the repository, in no particular order.
    fn tags(&self) -> Result<Vec<String>, VcsError>;

    /// Resolve a tag name, branch name, or revision to an exact revision.
    fn resolve_revision(&self, reference: &str) -> Result<String, VcsError>;

    /// Fetch updates from the repository's origin.
    fn fetch(&mut self) -> Result<(), VcsError>;

    /// Check the working directory out at a revision.
    fn checkout(&mut self, revision: &str) -> Result<(), VcsError>;
}

/// Creates and reopens [`Repository`] handles.
pub trait RepositoryProvider {
    /// Clone the repository at `location` into `destination`.
    ///
    /// `destination` does not exist yet; the provider creates it.
    fn clone_repository(
        &self,
        location: &str,
        destination: &Path,
    ) -> Result<Box<dyn Repository>, VcsError>;

    /// Open a previously cloned repository.
    fn open_repository(&self, path: &Path) -> Result<Box<dyn Repository>, VcsError>;
}
