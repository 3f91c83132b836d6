//! Hosting-provider access for release metadata and asset downloads.
//!
//! Provides a trait-based abstraction over the GitHub releases REST API so
//! the resolver and acquirer can be exercised without network access. The
//! HTTP implementation uses `ureq` with an optional global timeout and
//! classifies every failure into a [`DownloadError`] variant that maps onto
//! an [`AcquisitionCategory`].

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::error::{AcquisitionCategory, GuardCategory, InstallerError};
use crate::release::{ReleaseAsset, ReleaseMetadata};

/// API base used for `owner/repo` shorthand and `github.com` URLs.
const GITHUB_API: &str = "https://api.github.com/repos";

/// Value of the `User-Agent` header; GitHub rejects requests without one.
const USER_AGENT: &str = concat!("overlay-installer/", env!("CARGO_PKG_VERSION"));

/// Page size for the release listing; the newest releases come first.
const LISTING_PAGE_SIZE: u32 = 100;

/// A repository's release API base URL.
///
/// # Examples
///
/// ```
/// use overlay_installer::provider::ReleaseEndpoint;
///
/// let short = ReleaseEndpoint::parse("acme/overlay").expect("shorthand");
/// let web = ReleaseEndpoint::parse("https://github.com/acme/overlay.git").expect("web URL");
/// assert_eq!(short, web);
/// assert_eq!(
///     short.tag_url("v1.2.3"),
///     "https://api.github.com/repos/acme/overlay/releases/tags/v1.2.3"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEndpoint {
    api_base: String,
}

impl ReleaseEndpoint {
    /// Parse `owner/repo`, `https://github.com/owner/repo`, or an API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::InvalidParameter`] for anything else.
    pub fn parse(source: &str) -> Result<Self, InstallerError> {
        let trimmed = source.trim().trim_end_matches('/');
        let invalid = || {
            InstallerError::guard(
                GuardCategory::InvalidParameter,
                format!("unrecognised release source {source:?}; expected owner/repo or a URL"),
            )
        };

        if let Some(path) = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
        {
            let path = path.trim_end_matches(".git");
            return repository_slug(path)
                .map(|slug| Self::from_api_base(format!("{GITHUB_API}/{slug}")))
                .ok_or_else(invalid);
        }
        if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
            return Ok(Self::from_api_base(trimmed.to_owned()));
        }
        repository_slug(trimmed)
            .map(|slug| Self::from_api_base(format!("{GITHUB_API}/{slug}")))
            .ok_or_else(invalid)
    }

    /// Wrap an API base URL verbatim.
    #[must_use]
    pub fn from_api_base(api_base: String) -> Self {
        Self { api_base }
    }

    /// Return the API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// URL of the release listing.
    #[must_use]
    pub fn listing_url(&self) -> String {
        format!("{}/releases?per_page={LISTING_PAGE_SIZE}", self.api_base)
    }

    /// URL of the release with `tag`.
    #[must_use]
    pub fn tag_url(&self, tag: &str) -> String {
        format!("{}/releases/tags/{tag}", self.api_base)
    }
}

/// Accept exactly `owner/repo` with conservative characters.
fn repository_slug(path: &str) -> Option<String> {
    let mut parts = path.split('/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    (valid(owner) && valid(repo)).then(|| format!("{owner}/{repo}"))
}

/// Read-only access to a repository's releases.
#[cfg_attr(test, mockall::automock)]
pub trait ReleaseSource {
    /// Fetch the release tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] when no release carries the tag.
    fn release_by_tag(&self, tag: &str) -> Result<ReleaseMetadata, DownloadError>;

    /// Fetch the most recent page of releases, drafts and prereleases included.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or parsed.
    fn list_releases(&self) -> Result<Vec<ReleaseMetadata>, DownloadError>;

    /// Download `asset` into the file at `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download or file write fails.
    fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), DownloadError>;
}

impl<T: ReleaseSource + ?Sized> ReleaseSource for &T {
    fn release_by_tag(&self, tag: &str) -> Result<ReleaseMetadata, DownloadError> {
        (**self).release_by_tag(tag)
    }

    fn list_releases(&self) -> Result<Vec<ReleaseMetadata>, DownloadError> {
        (**self).list_releases()
    }

    fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), DownloadError> {
        (**self).download_asset(asset, dest)
    }
}

/// Builds the release source for a run once its endpoint and timeout are
/// known.
pub trait ReleaseSourceFactory {
    /// Return a source for `endpoint` honouring `timeout`.
    fn connect<'s>(
        &'s self,
        endpoint: &ReleaseEndpoint,
        timeout: Option<Duration>,
    ) -> Box<dyn ReleaseSource + 's>;
}

/// Connects to the provider over HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSourceFactory;

impl ReleaseSourceFactory for HttpSourceFactory {
    fn connect<'s>(
        &'s self,
        endpoint: &ReleaseEndpoint,
        timeout: Option<Duration>,
    ) -> Box<dyn ReleaseSource + 's> {
        Box::new(HttpReleaseSource::new(endpoint.clone(), timeout))
    }
}

/// Errors arising from provider requests.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The provider could not be reached at the connection level.
    #[error("cannot reach {url}: {reason}")]
    Unreachable {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// The URL that was requested.
        url: String,
    },

    /// The requested resource does not exist (HTTP 404).
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The provider answered with an unexpected HTTP status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response could not be interpreted.
    #[error("malformed response from {url}: {reason}")]
    Malformed {
        /// The URL that was requested.
        url: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Writing the downloaded bytes to disk failed.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Classify this error for the `download failure` line.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::error::AcquisitionCategory;
    /// use overlay_installer::provider::DownloadError;
    ///
    /// let err = DownloadError::NotFound { url: "https://example.test/x".to_owned() };
    /// assert_eq!(err.category(), AcquisitionCategory::NotFound);
    /// ```
    #[must_use]
    pub const fn category(&self) -> AcquisitionCategory {
        match self {
            Self::Unreachable { .. } => AcquisitionCategory::NetworkUnavailable,
            Self::Timeout { .. } => AcquisitionCategory::Timeout,
            Self::NotFound { .. } => AcquisitionCategory::NotFound,
            Self::Status { .. } | Self::Malformed { .. } | Self::Io(_) => {
                AcquisitionCategory::Unknown
            }
        }
    }
}

/// HTTP-based release source using `ureq`.
pub struct HttpReleaseSource {
    endpoint: ReleaseEndpoint,
    agent: ureq::Agent,
}

impl HttpReleaseSource {
    /// Create a source for `endpoint` with an optional global request timeout.
    #[must_use]
    pub fn new(endpoint: ReleaseEndpoint, timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build();
        Self {
            endpoint,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        debug!("GET {url}");
        let response = self
            .agent
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| map_ureq_error(url, &err))?;
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|err| map_ureq_error(url, &err))?;
        serde_json::from_str(&body).map_err(|err| DownloadError::Malformed {
            url: url.to_owned(),
            reason: err.to_string(),
        })
    }
}

impl ReleaseSource for HttpReleaseSource {
    fn release_by_tag(&self, tag: &str) -> Result<ReleaseMetadata, DownloadError> {
        self.get_json(&self.endpoint.tag_url(tag))
    }

    fn list_releases(&self) -> Result<Vec<ReleaseMetadata>, DownloadError> {
        self.get_json(&self.endpoint.listing_url())
    }

    fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<(), DownloadError> {
        let url = asset.download_url.as_str();
        debug!("downloading {url} to {}", dest.display());
        let response = self
            .agent
            .get(url)
            .header("Accept", "application/octet-stream")
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| map_ureq_error(url, &err))?;
        let mut body = response.into_body();
        let mut reader = body.as_reader();
        let mut file = File::create(dest)?;
        copy_body(url, &mut reader, &mut file)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Stream `reader` into `writer`, separating network read failures from
/// local write failures.
fn copy_body(url: &str, reader: &mut dyn Read, writer: &mut dyn Write) -> Result<u64, DownloadError> {
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => return Ok(total),
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(map_read_error(url, &err)),
        };
        let chunk = buffer.get(..read).unwrap_or_default();
        writer.write_all(chunk)?;
        total = total.saturating_add(read as u64);
    }
}

fn map_read_error(url: &str, err: &std::io::Error) -> DownloadError {
    if err.kind() == ErrorKind::TimedOut {
        DownloadError::Timeout {
            url: url.to_owned(),
        }
    } else {
        DownloadError::Unreachable {
            url: url.to_owned(),
            reason: err.to_string(),
        }
    }
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404) => DownloadError::NotFound {
            url: url.to_owned(),
        },
        ureq::Error::StatusCode(status) => DownloadError::Status {
            url: url.to_owned(),
            status: *status,
        },
        ureq::Error::Timeout(_) => DownloadError::Timeout {
            url: url.to_owned(),
        },
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => DownloadError::Unreachable {
            url: url.to_owned(),
            reason: err.to_string(),
        },
        ureq::Error::Io(io) if is_connection_error(io.kind()) => DownloadError::Unreachable {
            url: url.to_owned(),
            reason: io.to_string(),
        },
        ureq::Error::Io(io) if io.kind() == ErrorKind::TimedOut => DownloadError::Timeout {
            url: url.to_owned(),
        },
        other => DownloadError::Malformed {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

const fn is_connection_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
