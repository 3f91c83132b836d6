//! Shared test utilities for the installer crate.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! behaviour suites under `tests/`.

use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::time::Duration;

use crate::error::AcquisitionCategory;
use crate::git::CommandExecutor;
use crate::provider::{DownloadError, ReleaseEndpoint, ReleaseSource, ReleaseSourceFactory};
use crate::release::{ReleaseAsset, ReleaseMetadata};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with the given stdout.
#[must_use]
pub fn success_output_with(stdout: &str) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(128),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// A `CommandExecutor` that answers the environment guard's git probes
/// from canned state instead of spawning processes.
#[derive(Debug)]
pub struct StubGit {
    version: Option<String>,
    work_tree: bool,
    status: Vec<String>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl StubGit {
    /// A recent git reporting a clean work tree.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            version: Some("git version 2.43.0".to_owned()),
            work_tree: true,
            status: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A recent git for which the destination is not a work tree.
    #[must_use]
    pub fn not_a_repository() -> Self {
        Self {
            work_tree: false,
            ..Self::clean()
        }
    }

    /// A work tree whose porcelain status lists `entries`.
    #[must_use]
    pub fn dirty(entries: &[&str]) -> Self {
        Self {
            status: entries.iter().map(|entry| (*entry).to_owned()).collect(),
            ..Self::clean()
        }
    }

    /// A host without a git executable.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            version: None,
            ..Self::clean()
        }
    }

    /// Replace the reported `git --version` output.
    #[must_use]
    pub fn with_version(mut self, version_output: &str) -> Self {
        self.version = Some(version_output.to_owned());
        self
    }

    /// Return the argument lists of every git invocation so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl CommandExecutor for StubGit {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
        assert_eq!(program, "git", "only git is ever executed");
        self.calls.borrow_mut().push(args.to_vec());

        let Some(version) = &self.version else {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound));
        };
        let has = |flag: &str| args.iter().any(|arg| arg == flag);

        if has("--version") {
            return Ok(success_output_with(&format!("{version}\n")));
        }
        if !self.work_tree {
            return Ok(failure_output(
                "fatal: not a git repository (or any of the parent directories): .git",
            ));
        }
        if has("rev-parse") {
            return Ok(success_output_with("true\n"));
        }
        if has("status") {
            let mut stdout = self.status.join("\n");
            if !stdout.is_empty() {
                stdout.push('\n');
            }
            return Ok(success_output_with(&stdout));
        }
        Ok(failure_output("unexpected git invocation"))
    }
}

/// An in-memory `ReleaseSource` that serves canned releases and archives
/// and counts every request made of it.
#[derive(Debug, Default)]
pub struct StubReleaseSource {
    releases: Vec<ReleaseMetadata>,
    archives: HashMap<String, Vec<u8>>,
    failure: Option<AcquisitionCategory>,
    requests: Cell<usize>,
}

impl StubReleaseSource {
    /// An empty source with no releases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `release` with no downloadable bytes.
    #[must_use]
    pub fn with_release(mut self, release: ReleaseMetadata) -> Self {
        self.releases.push(release);
        self
    }

    /// Add a published release tagged `tag` carrying one asset named
    /// `asset_name` whose bytes are `archive`.
    #[must_use]
    pub fn with_archive(
        mut self,
        tag: &str,
        published_at: &str,
        asset_name: &str,
        archive: Vec<u8>,
    ) -> Self {
        let url = format!("stub://download/{tag}/{asset_name}");
        let mut metadata = release(tag, published_at);
        metadata.assets.push(asset(asset_name, &url));
        self.archives.insert(url, archive);
        self.releases.push(metadata);
        self
    }

    /// Make every request fail with an error of `category`.
    #[must_use]
    pub fn failing_with(mut self, category: AcquisitionCategory) -> Self {
        self.failure = Some(category);
        self
    }

    /// Return how many requests have been made.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.get()
    }

    fn record(&self, url: &str) -> Result<(), DownloadError> {
        self.requests.set(self.requests.get() + 1);
        let url = url.to_owned();
        match self.failure {
            None => Ok(()),
            Some(AcquisitionCategory::NetworkUnavailable) => Err(DownloadError::Unreachable {
                url,
                reason: "connection refused".to_owned(),
            }),
            Some(AcquisitionCategory::Timeout) => Err(DownloadError::Timeout { url }),
            Some(AcquisitionCategory::NotFound) => Err(DownloadError::NotFound { url }),
            Some(AcquisitionCategory::CorruptArchive) => Err(DownloadError::Malformed {
                url,
                reason: "truncated body".to_owned(),
            }),
            Some(AcquisitionCategory::Unknown) => Err(DownloadError::Status { url, status: 502 }),
        }
    }
}

impl ReleaseSourceFactory for StubReleaseSource {
    fn connect<'s>(
        &'s self,
        _endpoint: &ReleaseEndpoint,
        _timeout: Option<Duration>,
    ) -> Box<dyn ReleaseSource + 's> {
        Box::new(self)
    }
}

impl ReleaseSource for StubReleaseSource {
    fn release_by_tag(&self, tag: &str) -> Result<ReleaseMetadata, DownloadError> {
        let url = format!("stub://releases/tags/{tag}");
        self.record(&url)?;
        self.releases
            .iter()
            .find(|release| release.tag == tag)
            .cloned()
            .ok_or(DownloadError::NotFound { url })
    }

    fn list_releases(&self) -> Result<Vec<ReleaseMetadata>, DownloadError> {
        self.record("stub://releases")?;
        Ok(self.releases.clone())
    }

    fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), DownloadError> {
        self.record(&asset.download_url)?;
        let bytes = self
            .archives
            .get(&asset.download_url)
            .ok_or_else(|| DownloadError::NotFound {
                url: asset.download_url.clone(),
            })?;
        std::fs::write(dest, bytes)?;
        Ok(())
    }
}

/// Build a published, stable release with no assets.
///
/// # Panics
///
/// Panics if `published_at` is not an RFC 3339 timestamp.
#[must_use]
pub fn release(tag: &str, published_at: &str) -> ReleaseMetadata {
    let published_at = DateTime::parse_from_rfc3339(published_at)
        .expect("fixture timestamps are RFC 3339")
        .with_timezone(&Utc);
    ReleaseMetadata {
        tag: tag.to_owned(),
        is_draft: false,
        is_prerelease: false,
        published_at: Some(published_at),
        assets: Vec::new(),
    }
}

/// Build an asset without a published digest.
#[must_use]
pub fn asset(name: &str, download_url: &str) -> ReleaseAsset {
    ReleaseAsset {
        name: name.to_owned(),
        download_url: download_url.to_owned(),
        digest: None,
    }
}

/// Build a zip archive in memory from `(path, contents)` pairs.
///
/// Directory entries are implied by the file paths.
///
/// # Panics
///
/// Panics if the archive cannot be written.
#[must_use]
pub fn overlay_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, contents) in files {
        writer.start_file(*path, options).expect("start zip entry");
        writer
            .write_all(contents.as_bytes())
            .expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Build a `.tar.gz` archive in memory from `(path, contents)` pairs.
///
/// # Panics
///
/// Panics if the archive cannot be written.
#[must_use]
pub fn overlay_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .expect("append tar entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

/// Return the lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
