//! Installation pipeline orchestration.
//!
//! Drives one run through its stages:
//!
//! ```text
//! Start → GuardsPassed → ReleaseResolved → ArchiveAcquired
//!       → WorkspaceReady → PathsValidated → FilesSynchronized
//! ```
//!
//! Each transition emits one `step` line and any stage may end the run with
//! a classified failure. Failures are reported with exactly one line and
//! are final; nothing is retried. The extraction workspace is owned by the
//! run and is gone before the terminal line is written.

use log::{debug, warn};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::acquire::ArchiveAcquirer;
use crate::config::{DEFAULT_SOURCE_NAME, FileConfig, InstallSettings, process_env};
use crate::diagnostics::{DiagnosticLine, Diagnostics};
use crate::error::{AcquisitionCategory, EXIT_SUCCESS, InstallerError, Result};
use crate::extraction::{ArchiveExtractor, StandardExtractor};
use crate::git::CommandExecutor;
use crate::guard::{Admission, EnvironmentGuard};
use crate::provider::ReleaseSourceFactory;
use crate::release::ReleaseResolver;
use crate::sync::SyncPlan;
use crate::workspace::{ExtractionWorkspace, locate_subtree};

/// Pipeline stages in the order a successful run passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing has been checked yet.
    Start,
    /// Every environment guard passed.
    GuardsPassed,
    /// A release was chosen.
    ReleaseResolved,
    /// The archive was downloaded and verified.
    ArchiveAcquired,
    /// The archive was extracted and the source subtree found.
    WorkspaceReady,
    /// Every destination path was validated.
    PathsValidated,
    /// The destination matches the source subtree.
    FilesSynchronized,
}

impl Stage {
    /// Return the stage name rendered on `step` lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::GuardsPassed => "GuardsPassed",
            Self::ReleaseResolved => "ReleaseResolved",
            Self::ArchiveAcquired => "ArchiveAcquired",
            Self::WorkspaceReady => "WorkspaceReady",
            Self::PathsValidated => "PathsValidated",
            Self::FilesSynchronized => "FilesSynchronized",
        }
    }
}

/// The terminal record of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationResult {
    exit_code: i32,
    resolved_ref: Option<String>,
    source_name: String,
    duration_seconds: f64,
    diagnostics: Vec<String>,
    final_stage: Stage,
}

impl InstallationResult {
    /// Return the process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Return the release tag, if resolution was reached.
    #[must_use]
    pub fn resolved_ref(&self) -> Option<&str> {
        self.resolved_ref.as_deref()
    }

    /// Return the source subtree name in effect.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Return the wall-clock duration since process start.
    #[must_use]
    pub const fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Return every diagnostic line written, in order.
    #[must_use]
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Return the last stage the run reached.
    #[must_use]
    pub const fn final_stage(&self) -> Stage {
        self.final_stage
    }
}

enum Completion {
    Displayed,
    Installed,
}

struct Progress {
    stage: Stage,
    resolved_ref: Option<String>,
    source_name: String,
}

impl Progress {
    fn enter(
        &mut self,
        stage: Stage,
        diagnostics: &mut Diagnostics<'_>,
        fields: &[(&'static str, &str)],
    ) {
        self.stage = stage;
        let line = fields
            .iter()
            .fold(DiagnosticLine::step(stage.as_str()), |line, &(key, value)| {
                line.field(key, value)
            });
        diagnostics.emit(&line);
    }
}

/// Runs installations against injected collaborators.
pub struct Installer<'a> {
    git: &'a dyn CommandExecutor,
    sources: &'a dyn ReleaseSourceFactory,
    extractor: &'a dyn ArchiveExtractor,
    env: &'a dyn Fn(&str) -> Option<String>,
    temp_root: Option<PathBuf>,
}

impl<'a> Installer<'a> {
    /// Create an installer probing git through `git` and reaching releases
    /// through `sources`, reading the process environment and extracting
    /// with [`StandardExtractor`].
    #[must_use]
    pub fn new(git: &'a dyn CommandExecutor, sources: &'a dyn ReleaseSourceFactory) -> Self {
        Self {
            git,
            sources,
            extractor: &StandardExtractor,
            env: &process_env,
            temp_root: None,
        }
    }

    /// Replace the environment lookup.
    #[must_use]
    pub fn with_env(mut self, env: &'a dyn Fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Replace the archive extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: &'a dyn ArchiveExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Create workspaces under `root` instead of the system temp directory.
    #[must_use]
    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = Some(root);
        self
    }

    /// Run one installation.
    ///
    /// `args` are the raw process arguments including the program name.
    /// Help and version text go to `stdout`; diagnostic lines go to
    /// `stderr`. `started` is the process start used for the reported
    /// duration.
    pub fn run<I, T>(
        &self,
        args: I,
        started: Instant,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> InstallationResult
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut diagnostics = Diagnostics::new(stderr, false);
        let mut progress = Progress {
            stage: Stage::Start,
            resolved_ref: None,
            source_name: DEFAULT_SOURCE_NAME.to_owned(),
        };

        let outcome = self.execute(args, stdout, &mut diagnostics, &mut progress);
        let elapsed = started.elapsed();
        let exit_code = match outcome {
            Ok(Completion::Displayed) => EXIT_SUCCESS,
            Ok(Completion::Installed) => {
                report_success(&mut diagnostics, &progress, elapsed);
                EXIT_SUCCESS
            }
            Err(err) => report_failure(&mut diagnostics, &err),
        };

        InstallationResult {
            exit_code,
            resolved_ref: progress.resolved_ref,
            source_name: progress.source_name,
            duration_seconds: elapsed.as_secs_f64(),
            diagnostics: diagnostics.into_lines(),
            final_stage: progress.stage,
        }
    }

    fn execute<I, T>(
        &self,
        args: I,
        stdout: &mut dyn Write,
        diagnostics: &mut Diagnostics<'_>,
        progress: &mut Progress,
    ) -> Result<Completion>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let report = EnvironmentGuard::new(self.git).check(args);
        let (cli, token) = match report.verdict? {
            Admission::Display(text) => {
                if write!(stdout, "{text}").is_err() {
                    // Nothing useful can be reported if stdout is gone.
                }
                return Ok(Completion::Displayed);
            }
            Admission::Admitted { cli, token } => (cli, token),
        };
        diagnostics.set_verbose(cli.verbose);
        for outcome in &report.outcomes {
            diagnostics.verbose(&DiagnosticLine::step("GuardChecked").field("check", outcome.name));
        }
        progress.enter(
            Stage::GuardsPassed,
            diagnostics,
            &[("destination", token.destination().as_str())],
        );

        let file = FileConfig::load(token.destination())?;
        let settings = InstallSettings::resolve(&cli, self.env, file)?;
        progress.source_name.clone_from(&settings.source_name);

        let source = self.sources.connect(&settings.endpoint, settings.timeout);
        let release = ReleaseResolver::new(source.as_ref(), &settings.endpoint)
            .resolve(&settings.selector, diagnostics)?;
        progress.resolved_ref = Some(release.tag.clone());
        progress.enter(
            Stage::ReleaseResolved,
            diagnostics,
            &[
                ("ref", release.tag.as_str()),
                ("origin", release.origin.as_str()),
            ],
        );

        let workspace = self.create_workspace()?;
        diagnostics.emit(&DiagnosticLine::temp(workspace.path().display()));

        let archive = ArchiveAcquirer::new(source.as_ref(), &settings.endpoint)
            .acquire(&release, &workspace)?;
        progress.enter(
            Stage::ArchiveAcquired,
            diagnostics,
            &[("asset", archive.asset_name.as_str())],
        );

        let root = workspace.extraction_root();
        let extracted = self
            .extractor
            .extract(&archive.path, archive.format, &root)
            .map_err(|err| InstallerError::Acquisition {
                category: AcquisitionCategory::CorruptArchive,
                reference: release.tag.clone(),
                url: archive.url.clone(),
                reason: err.to_string(),
            })?;
        debug!("extracted {} files", extracted.len());
        let subtree = locate_subtree(&root, &settings.source_name).map_err(|err| {
            InstallerError::Acquisition {
                category: err.category(),
                reference: release.tag.clone(),
                url: archive.url.clone(),
                reason: err.to_string(),
            }
        })?;
        let file_count = subtree.files.len().to_string();
        progress.enter(
            Stage::WorkspaceReady,
            diagnostics,
            &[("files", file_count.as_str())],
        );

        let plan = SyncPlan::build(&subtree, &token)?;
        let planned = plan.copies().len().to_string();
        progress.enter(
            Stage::PathsValidated,
            diagnostics,
            &[("files", planned.as_str())],
        );

        plan.apply()?;
        progress.stage = Stage::FilesSynchronized;

        if let Err(err) = workspace.close() {
            warn!("could not remove workspace: {err}");
        }
        Ok(Completion::Installed)
    }

    fn create_workspace(&self) -> Result<ExtractionWorkspace> {
        let workspace = match &self.temp_root {
            Some(root) => ExtractionWorkspace::create_in(root),
            None => ExtractionWorkspace::create(),
        };
        workspace.map_err(|err| {
            InstallerError::Unexpected(format!("cannot create extraction workspace: {err}"))
        })
    }
}

fn report_success(diagnostics: &mut Diagnostics<'_>, progress: &Progress, elapsed: Duration) {
    let reference = progress.resolved_ref.as_deref().unwrap_or_default();
    diagnostics.emit(&DiagnosticLine::success(
        reference,
        &progress.source_name,
        elapsed,
    ));
}

/// Emit the single line describing `err` and return its exit code.
fn report_failure(diagnostics: &mut Diagnostics<'_>, err: &InstallerError) -> i32 {
    let line = match err {
        InstallerError::Guard { category, detail } => DiagnosticLine::guard(*category, detail),
        InstallerError::Acquisition {
            category,
            reference,
            url,
            reason,
        } => {
            warn!("acquisition of {reference} failed: {reason}");
            DiagnosticLine::download_failure(reference, url, *category)
        }
        InstallerError::Io(_) | InstallerError::Unexpected(_) => {
            DiagnosticLine::error(&err.to_string())
        }
    };
    diagnostics.emit(&line);
    err.exit_code()
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
