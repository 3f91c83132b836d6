//! Environment guard.
//!
//! Before the installer touches the network or the filesystem it checks, in
//! order:
//!
//! 1. only known parameters were supplied;
//! 2. git is installed and at least [`MIN_GIT_VERSION`];
//! 3. the destination is inside a git work tree;
//! 4. that work tree has no uncommitted or untracked changes.
//!
//! Every check is read-only and the first failure stops the sequence. When
//! all four pass the guard mints a [`GuardsPassed`] token, which the
//! synchroniser demands before it will plan any write.

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use std::ffi::OsString;

use crate::cli::{Cli, ParsedArgs, parse_args};
use crate::config::resolve_destination;
use crate::error::{GuardCategory, InstallerError, Result};
use crate::git::{CommandExecutor, GitProbe, GitVersion};

/// Oldest git release that supports `--no-optional-locks`.
pub const MIN_GIT_VERSION: GitVersion = GitVersion {
    major: 2,
    minor: 15,
    patch: 0,
};

/// Status entries quoted in a `WorkingTreeNotClean` detail.
const QUOTED_STATUS_ENTRIES: usize = 3;

/// The result of one named guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    /// Short name of the check.
    pub name: &'static str,
    /// Whether the check passed.
    pub passed: bool,
    /// The violated category when the check failed.
    pub category: Option<GuardCategory>,
}

impl GuardOutcome {
    const fn passed(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            category: None,
        }
    }

    const fn failed(name: &'static str, category: GuardCategory) -> Self {
        Self {
            name,
            passed: false,
            category: Some(category),
        }
    }
}

/// Proof that every environment guard passed for one destination.
///
/// Only [`EnvironmentGuard::check`] can create one outside of tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardsPassed {
    destination: Utf8PathBuf,
}

impl GuardsPassed {
    /// Return the destination the guards accepted.
    #[must_use]
    pub fn destination(&self) -> &Utf8Path {
        &self.destination
    }

    /// Mint a token without running the guards.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn for_tests(destination: Utf8PathBuf) -> Self {
        Self { destination }
    }
}

/// What the caller should do after the guard has run.
#[derive(Debug)]
pub enum Admission {
    /// Print help or version text and exit successfully.
    Display(String),
    /// Every check passed; proceed with installation.
    Admitted {
        /// The parsed parameters.
        cli: Cli,
        /// The capability token for the accepted destination.
        token: GuardsPassed,
    },
}

/// The checks that ran and the final verdict.
#[derive(Debug)]
pub struct GuardReport {
    /// One outcome per check that ran, in order.
    pub outcomes: Vec<GuardOutcome>,
    /// The admission decision, or the first violation.
    pub verdict: Result<Admission>,
}

/// Runs the ordered precondition checks.
pub struct EnvironmentGuard<'a> {
    probe: GitProbe<'a>,
}

impl<'a> EnvironmentGuard<'a> {
    /// Create a guard that queries git through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self {
            probe: GitProbe::new(executor),
        }
    }

    /// Run every check against the raw process arguments.
    pub fn check<I, T>(&self, args: I) -> GuardReport
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut outcomes = Vec::new();
        let verdict = self.run_checks(args, &mut outcomes);
        GuardReport { outcomes, verdict }
    }

    fn run_checks<I, T>(&self, args: I, outcomes: &mut Vec<GuardOutcome>) -> Result<Admission>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = match record(outcomes, "parameters", parse_args(args))? {
            ParsedArgs::Display(text) => return Ok(Admission::Display(text)),
            ParsedArgs::Run(cli) => cli,
        };
        let destination = resolve_destination(&cli)?;

        let checks: [(&'static str, &dyn Fn() -> Result<()>); 3] = [
            ("runtime", &|| self.check_runtime()),
            ("repository", &|| self.check_repository(&destination)),
            ("working-tree", &|| self.check_clean(&destination)),
        ];
        for (name, check) in checks {
            record(outcomes, name, check())?;
        }

        Ok(Admission::Admitted {
            cli,
            token: GuardsPassed { destination },
        })
    }

    fn check_runtime(&self) -> Result<()> {
        match self.probe.version() {
            Some(version) if version >= MIN_GIT_VERSION => {
                debug!("git {version} satisfies minimum {MIN_GIT_VERSION}");
                Ok(())
            }
            Some(version) => Err(InstallerError::guard(
                GuardCategory::UnsupportedRuntime,
                format!("git {version} is older than the required {MIN_GIT_VERSION}"),
            )),
            None => Err(InstallerError::guard(
                GuardCategory::UnsupportedRuntime,
                format!("git {MIN_GIT_VERSION} or newer is required but was not found"),
            )),
        }
    }

    fn check_repository(&self, destination: &Utf8Path) -> Result<()> {
        if self.probe.is_work_tree(destination) {
            Ok(())
        } else {
            Err(InstallerError::guard(
                GuardCategory::GitRepoRequired,
                format!("{destination} is not inside a git work tree"),
            ))
        }
    }

    fn check_clean(&self, destination: &Utf8Path) -> Result<()> {
        let entries = self.probe.status_entries(destination).map_err(|err| {
            InstallerError::guard(
                GuardCategory::WorkingTreeNotClean,
                format!("cannot determine work tree status: {err}"),
            )
        })?;
        if entries.is_empty() {
            return Ok(());
        }
        let quoted: Vec<&str> = entries
            .iter()
            .take(QUOTED_STATUS_ENTRIES)
            .map(|entry| entry.trim())
            .collect();
        Err(InstallerError::guard(
            GuardCategory::WorkingTreeNotClean,
            format!(
                "{} uncommitted or untracked path(s): {}; commit or stash them first",
                entries.len(),
                quoted.join(", ")
            ),
        ))
    }
}

fn record<T>(outcomes: &mut Vec<GuardOutcome>, name: &'static str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => outcomes.push(GuardOutcome::passed(name)),
        Err(InstallerError::Guard { category, .. }) => {
            outcomes.push(GuardOutcome::failed(name, *category));
        }
        Err(_) => {}
    }
    result
}
