//! Error types for the overlay installer.
//!
//! Every failure the installer can report falls into one of four families:
//! guard violations, acquisition failures (including archive integrity),
//! filesystem guard failures, and unexpected errors. Each family maps onto a
//! stable process exit code, and each category carries a remediation hint so
//! the single diagnostic line a failed run emits is actionable on its own.

use std::fmt;
use thiserror::Error;

/// Process exit code for a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for a guard violation detected before any mutation.
pub const EXIT_GUARD: i32 = 10;
/// Process exit code for acquisition and integrity failures.
pub const EXIT_ACQUISITION: i32 = 20;
/// Process exit code for filesystem guard failures.
pub const EXIT_FILESYSTEM_GUARD: i32 = 30;
/// Process exit code for anything the installer did not anticipate.
pub const EXIT_UNHANDLED: i32 = 99;

/// Named categories reported on `guard` diagnostic lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardCategory {
    /// A parameter name outside the known set was supplied.
    UnknownParameter,
    /// A known parameter carried an unusable value, or a required one is missing.
    InvalidParameter,
    /// The hosting runtime (git) is missing or too old.
    UnsupportedRuntime,
    /// The destination is not inside a git work tree.
    GitRepoRequired,
    /// The destination work tree has uncommitted or untracked changes.
    WorkingTreeNotClean,
    /// The release reference does not follow the accepted tag grammar.
    InvalidReference,
    /// The destination's `overlay-installer.toml` could not be read or parsed.
    InvalidConfiguration,
    /// A file would be written outside the destination root.
    RestrictedWrites,
    /// The operating system refused a write inside the destination.
    PermissionDenied,
}

impl GuardCategory {
    /// Return the identifier rendered on diagnostic lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownParameter => "UnknownParameter",
            Self::InvalidParameter => "InvalidParameter",
            Self::UnsupportedRuntime => "UnsupportedRuntime",
            Self::GitRepoRequired => "GitRepoRequired",
            Self::WorkingTreeNotClean => "WorkingTreeNotClean",
            Self::InvalidReference => "InvalidReference",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::RestrictedWrites => "RestrictedWrites",
            Self::PermissionDenied => "PermissionDenied",
        }
    }

    /// Return the exit code a violation of this category terminates with.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::error::{EXIT_FILESYSTEM_GUARD, EXIT_GUARD, GuardCategory};
    ///
    /// assert_eq!(GuardCategory::WorkingTreeNotClean.exit_code(), EXIT_GUARD);
    /// assert_eq!(GuardCategory::RestrictedWrites.exit_code(), EXIT_FILESYSTEM_GUARD);
    /// ```
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::RestrictedWrites | Self::PermissionDenied => EXIT_FILESYSTEM_GUARD,
            _ => EXIT_GUARD,
        }
    }
}

impl fmt::Display for GuardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories reported on `download failure` diagnostic lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionCategory {
    /// The hosting provider could not be reached at the connection level.
    NetworkUnavailable,
    /// The release or a usable asset does not exist.
    NotFound,
    /// The archive, or the subtree inside it, is malformed or empty.
    CorruptArchive,
    /// The request exceeded the configured timeout.
    Timeout,
    /// The failure did not match any other category.
    Unknown,
}

impl AcquisitionCategory {
    /// Return the identifier rendered on diagnostic lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "NetworkUnavailable",
            Self::NotFound => "NotFound",
            Self::CorruptArchive => "CorruptArchive",
            Self::Timeout => "Timeout",
            Self::Unknown => "Unknown",
        }
    }

    /// Return a short operator-facing remediation hint.
    #[must_use]
    pub const fn hint(self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "check network connectivity and proxy settings",
            Self::NotFound => "check the release reference and source repository",
            Self::CorruptArchive => "re-run the install; if it persists the release asset is damaged",
            Self::Timeout => "retry later or raise --timeout",
            Self::Unknown => "re-run with --verbose and inspect the reason",
        }
    }
}

impl fmt::Display for AcquisitionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can terminate an installation run.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// A precondition failed before any mutating effect, or a filesystem
    /// guard refused a write.
    #[error("guard {category} failed: {detail}")]
    Guard {
        /// The violated guard category.
        category: GuardCategory,
        /// Human-readable description of the violation.
        detail: String,
    },

    /// The release or its archive could not be acquired or is unusable.
    #[error("acquisition of {reference} from {url} failed ({category}): {reason}")]
    Acquisition {
        /// The failure category.
        category: AcquisitionCategory,
        /// The release reference being installed.
        reference: String,
        /// The URL (or archive location) involved in the failure.
        url: String,
        /// Description of the underlying failure.
        reason: String,
    },

    /// An I/O operation failed outside the classified stages.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else the installer did not anticipate.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl InstallerError {
    /// Build a guard violation.
    pub fn guard(category: GuardCategory, detail: impl Into<String>) -> Self {
        Self::Guard {
            category,
            detail: detail.into(),
        }
    }

    /// Return the process exit code this error terminates with.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::error::{AcquisitionCategory, InstallerError};
    ///
    /// let err = InstallerError::Acquisition {
    ///     category: AcquisitionCategory::NotFound,
    ///     reference: "v9.9.9".to_owned(),
    ///     url: "https://api.github.com/repos/acme/overlay/releases/tags/v9.9.9".to_owned(),
    ///     reason: "release not found".to_owned(),
    /// };
    /// assert_eq!(err.exit_code(), 20);
    /// ```
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Guard { category, .. } => category.exit_code(),
            Self::Acquisition { .. } => EXIT_ACQUISITION,
            Self::Io(_) | Self::Unexpected(_) => EXIT_UNHANDLED,
        }
    }
}

/// Result type alias using [`InstallerError`].
pub type Result<T> = std::result::Result<T, InstallerError>;
