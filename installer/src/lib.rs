//! Overlay installer library.
//!
//! This crate installs and updates a versioned file bundle, the overlay,
//! into a git work tree. It resolves a release, downloads the release's
//! overlay archive, extracts it into a scoped temporary workspace, and
//! overwrites the destination with the archive's source subtree after every
//! destination path has been checked against the destination root. It is
//! used by the `overlay-installer` binary and can be driven programmatically
//! through [`pipeline::Installer`].
//!
//! # Modules
//!
//! - [`acquire`] - Asset selection, download, and digest verification
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Layered configuration from parameters, environment, and file
//! - [`diagnostics`] - The `[install]` diagnostic line contract
//! - [`error`] - Error taxonomy, categories, and exit codes
//! - [`extraction`] - Zip and tarball extraction with traversal protection
//! - [`git`] - Command execution with timeouts and git probing
//! - [`guard`] - Ordered environment guard and its capability token
//! - [`pipeline`] - Stage-by-stage orchestration of a run
//! - [`provider`] - Hosting-provider release API client
//! - [`release`] - Release selection, tag normalisation, and resolution
//! - [`sync`] - Boundary-checked overwrite of the destination
//! - [`workspace`] - Scoped extraction workspace and subtree location

pub mod acquire;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extraction;
pub mod git;
pub mod guard;
pub mod pipeline;
pub mod provider;
pub mod release;
pub mod sync;
pub mod workspace;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
