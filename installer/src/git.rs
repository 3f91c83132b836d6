//! Git command execution for the environment guard.
//!
//! The guard only ever asks git read-only questions: which version is
//! installed, whether a directory sits inside a work tree, and whether that
//! work tree is clean. Every invocation passes `--no-optional-locks` so that
//! `git status` never refreshes the index, and every invocation is bounded by
//! a timeout so a wedged git process cannot hang the installer.

use camino::Utf8Path;
use log::trace;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Timeout applied to each git probe.
const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Runs `program` with `args` and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns any I/O error encountered while spawning or waiting for the
    /// command, including a timeout.
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output>;
}

/// Executes commands on the host system with a timeout.
#[derive(Debug, Clone, Copy)]
pub struct SystemCommandExecutor {
    timeout: Duration,
}

impl SystemCommandExecutor {
    /// Create an executor that kills commands running longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::with_timeout(GIT_TIMEOUT)
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
        trace!("running {program} {}", args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained while waiting so a chatty child never blocks on
        // a full pipe buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let Some(status) = child.wait_timeout(self.timeout)? else {
            if child.kill().is_err() {
                // The process may have exited between the timeout and the kill.
            }
            if child.wait().is_err() {
                // Reaping is best-effort once the command has been abandoned.
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!(
                    "{program} did not finish within {} seconds",
                    self.timeout.as_secs()
                ),
            ));
        };

        Ok(Output {
            status,
            stdout: collect(stdout)?,
            stderr: collect(stderr)?,
        })
    }
}

type PipeReader = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> PipeReader {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            pipe.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    })
}

fn collect(reader: PipeReader) -> std::io::Result<Vec<u8>> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| std::io::Error::other("pipe reader thread panicked"))?,
        None => Ok(Vec::new()),
    }
}

/// A `git` version triple as reported by `git --version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl GitVersion {
    /// Parse the output of `git --version`.
    ///
    /// Vendor suffixes such as `.windows.1` or `(Apple Git-145)` are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::git::GitVersion;
    ///
    /// let version = GitVersion::parse("git version 2.39.3 (Apple Git-145)");
    /// assert_eq!(version, Some(GitVersion { major: 2, minor: 39, patch: 3 }));
    /// assert_eq!(GitVersion::parse("not git"), None);
    /// ```
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let number = output.trim().strip_prefix("git version ")?;
        let mut parts = number
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let patch = parts.next().and_then(Result::ok).unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl std::fmt::Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Read-only git queries against one directory.
pub struct GitProbe<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> GitProbe<'a> {
    /// Create a probe that runs git through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    /// Return the installed git version, or `None` if git is unavailable or
    /// its output is unrecognised.
    #[must_use]
    pub fn version(&self) -> Option<GitVersion> {
        let output = self.git(&["--version"]).ok()?;
        if !output.status.success() {
            return None;
        }
        GitVersion::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Return true when `dir` is inside a git work tree.
    #[must_use]
    pub fn is_work_tree(&self, dir: &Utf8Path) -> bool {
        if !dir.is_dir() {
            return false;
        }
        self.git_in(dir, &["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|output| {
                output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
            })
    }

    /// Return the porcelain status entries of the work tree containing `dir`.
    ///
    /// An empty list means the work tree is clean.
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be run or exits unsuccessfully.
    pub fn status_entries(&self, dir: &Utf8Path) -> std::io::Result<Vec<String>> {
        let output = self.git_in(
            dir,
            &["status", "--porcelain", "--untracked-files=all"],
        )?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(std::io::Error::other(format!(
                "git status failed: {}",
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn git(&self, args: &[&str]) -> std::io::Result<Output> {
        let mut full = vec!["--no-optional-locks".to_owned()];
        full.extend(args.iter().map(|arg| (*arg).to_owned()));
        self.executor.run("git", &full)
    }

    fn git_in(&self, dir: &Utf8Path, args: &[&str]) -> std::io::Result<Output> {
        let mut full = vec![
            "--no-optional-locks".to_owned(),
            "-C".to_owned(),
            dir.as_str().to_owned(),
        ];
        full.extend(args.iter().map(|arg| (*arg).to_owned()));
        self.executor.run("git", &full)
    }
}
