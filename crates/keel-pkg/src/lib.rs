//! Dependency resolution and workspace state for the Keel programming
//! language.
//!
//! This crate provides:
//! - Version and branch constraint resolution over package graphs
//! - Pin files recording the exact state a resolution chose
//! - Repository providers bridging manifests to version control
//! - Checkout management bringing working copies to pinned revisions
//! - Workspace orchestration from declarations to ready checkouts

mod checkout;
mod pins;
mod provider;
mod resolver;
mod vcs;
mod workspace;

pub mod testing;

pub use checkout::{CheckoutError, CheckoutManager, CheckoutOutcome};
pub use pins::{Pin, PinState, Pins, PinsError, PINS_FILE, PINS_VERSION};
pub use provider::{version_from_tag, PackageReference, Provider, ProviderError, Selector};
pub use resolver::{resolve, Constraint, ResolveError};
pub use vcs::{Repository, RepositoryProvider, VcsError};
pub use workspace::{
    PinChange, UpdateOptions, UpdateOutcome, Workspace, WorkspaceError, WorkspaceStatus, STATE_DIR,
};
