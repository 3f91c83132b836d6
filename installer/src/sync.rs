//! Destination synchronisation.
//!
//! Synchronisation runs in two phases. [`SyncPlan::build`] maps every file
//! of the source subtree onto its destination path and resolves each one
//! against the real filesystem, following any symlinks that already exist
//! in the destination. If a single path would land outside the destination
//! root the whole plan is refused and nothing is written.
//! [`SyncPlan::apply`] then overwrites each destination file in sorted order.
//!
//! Copying is not transactional: a failure part-way through leaves the
//! files copied so far in place. Files present in the destination but not
//! in the subtree are left untouched.

use log::{debug, trace};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{GuardCategory, InstallerError, Result};
use crate::guard::GuardsPassed;
use crate::workspace::SourceSubtree;

/// Directory name that is never written into.
const GIT_DIR: &str = ".git";

/// One file copy the plan will perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    /// Path relative to both the subtree and the destination root.
    pub relative: PathBuf,
    /// File inside the workspace.
    pub source: PathBuf,
    /// File inside the destination.
    pub target: PathBuf,
}

/// A fully validated set of copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    copies: Vec<PlannedCopy>,
}

impl SyncPlan {
    /// Validate every destination path for `subtree`.
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::RestrictedWrites`] if any file would resolve
    /// outside the destination root or into its `.git` directory.
    pub fn build(subtree: &SourceSubtree, guards: &GuardsPassed) -> Result<Self> {
        let destination = guards.destination().as_std_path();
        let root = destination.canonicalize().map_err(|err| {
            InstallerError::guard(
                GuardCategory::RestrictedWrites,
                format!("cannot resolve destination {}: {err}", destination.display()),
            )
        })?;

        let mut copies = Vec::with_capacity(subtree.files.len());
        for relative in &subtree.files {
            check_relative(relative)?;
            let target = root.join(relative);
            let resolved = resolve_existing(&target)?;
            if !resolved.starts_with(&root) {
                return Err(restricted(
                    relative,
                    &format!("resolves to {}", resolved.display()),
                ));
            }
            trace!("planned {}", relative.display());
            copies.push(PlannedCopy {
                relative: relative.clone(),
                source: subtree.path.join(relative),
                target,
            });
        }
        copies.sort_by(|left, right| left.relative.cmp(&right.relative));
        debug!("validated {} destination paths", copies.len());
        Ok(Self { copies })
    }

    /// Return the validated copies in the order they will run.
    #[must_use]
    pub fn copies(&self) -> &[PlannedCopy] {
        &self.copies
    }

    /// Overwrite every destination file with its source.
    ///
    /// Returns the number of files written.
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::PermissionDenied`] when the operating system
    /// refuses a write, and an unexpected error for any other I/O failure.
    /// Files written before the failure stay written.
    pub fn apply(&self) -> Result<usize> {
        for copy in &self.copies {
            write_one(copy).map_err(|err| classify_write_error(copy, &err))?;
        }
        Ok(self.copies.len())
    }
}

fn write_one(copy: &PlannedCopy) -> std::io::Result<()> {
    if let Some(parent) = copy.target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(&copy.source, &copy.target)?;
    Ok(())
}

fn classify_write_error(copy: &PlannedCopy, err: &std::io::Error) -> InstallerError {
    if err.kind() == ErrorKind::PermissionDenied {
        InstallerError::guard(
            GuardCategory::PermissionDenied,
            format!("cannot write {}: {err}", copy.target.display()),
        )
    } else {
        InstallerError::Unexpected(format!("cannot write {}: {err}", copy.target.display()))
    }
}

fn check_relative(relative: &Path) -> Result<()> {
    for component in relative.components() {
        match component {
            Component::Normal(part) if part.eq_ignore_ascii_case(GIT_DIR) => {
                return Err(restricted(relative, "writes into the repository metadata"));
            }
            Component::Normal(_) => {}
            _ => return Err(restricted(relative, "is not a plain relative path")),
        }
    }
    Ok(())
}

/// Canonicalise the deepest existing ancestor of `path` and re-append the
/// components that do not exist yet.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut pending = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                return Ok(pending
                    .iter()
                    .rev()
                    .fold(resolved, |acc: PathBuf, part| acc.join(part)));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if existing.symlink_metadata().is_ok() {
                    return Err(restricted(path, "passes through a dangling symbolic link"));
                }
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(restricted(path, "has no existing ancestor"));
                };
                pending.push(name.to_os_string());
                existing = parent;
            }
            Err(err) => {
                return Err(restricted(path, &format!("cannot be resolved: {err}")));
            }
        }
    }
}

fn restricted(path: &Path, reason: &str) -> InstallerError {
    InstallerError::guard(
        GuardCategory::RestrictedWrites,
        format!("{} {reason}", path.display()),
    )
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
