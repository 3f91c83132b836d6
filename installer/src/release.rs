//! Release selection and resolution.
//!
//! A run installs exactly one release. The reference comes from `--ref`,
//! then `OVERLAY_REF`, and otherwise from the provider's most recently
//! published stable release. Explicit and overridden references must follow
//! the `v?MAJOR.MINOR.PATCH` grammar; anything else is refused before the
//! provider is contacted.

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::fmt;

use crate::config::REF_ENV;
use crate::diagnostics::{DiagnosticLine, Diagnostics};
use crate::error::{AcquisitionCategory, GuardCategory, InstallerError, Result};
use crate::provider::{DownloadError, ReleaseEndpoint, ReleaseSource};

/// Reference label used in diagnostics when resolving the latest release.
pub const LATEST: &str = "latest";

/// The reference inputs for one run, in precedence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSelector {
    /// Reference given with `--ref`; always authoritative when present.
    pub explicit_ref: Option<String>,
    /// Reference taken from `OVERLAY_REF`; used only without `--ref`.
    pub env_override: Option<String>,
}

impl ReleaseSelector {
    /// Return the authoritative reference and where it came from, or `None`
    /// when the latest release should be used.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::release::{ReferenceOrigin, ReleaseSelector};
    ///
    /// let selector = ReleaseSelector {
    ///     explicit_ref: Some("v1.2.3".to_owned()),
    ///     env_override: Some("v2.0.0".to_owned()),
    /// };
    /// assert_eq!(selector.candidate(), Some(("v1.2.3", ReferenceOrigin::Explicit)));
    /// assert_eq!(ReleaseSelector::default().candidate(), None);
    /// ```
    #[must_use]
    pub fn candidate(&self) -> Option<(&str, ReferenceOrigin)> {
        self.explicit_ref
            .as_deref()
            .map(|reference| (reference, ReferenceOrigin::Explicit))
            .or_else(|| {
                self.env_override
                    .as_deref()
                    .map(|reference| (reference, ReferenceOrigin::Environment))
            })
    }
}

/// Where the resolved reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceOrigin {
    /// `--ref` on the command line.
    Explicit,
    /// The `OVERLAY_REF` environment variable.
    Environment,
    /// The provider's most recent stable release.
    Latest,
}

impl ReferenceOrigin {
    /// Return a lowercase label for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Environment => "environment",
            Self::Latest => "latest",
        }
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// URL the asset bytes are served from.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    /// Provider-published content digest, such as `sha256:<hex>`.
    #[serde(default)]
    pub digest: Option<String>,
}

/// A release as described by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseMetadata {
    /// The release's tag.
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Whether the release is an unpublished draft.
    #[serde(rename = "draft", default)]
    pub is_draft: bool,
    /// Whether the release is marked as a prerelease.
    #[serde(rename = "prerelease", default)]
    pub is_prerelease: bool,
    /// Publication time; drafts have none.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Files attached to the release.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseMetadata {
    /// Return true when the release may be chosen as "latest".
    #[must_use]
    pub const fn is_stable(&self) -> bool {
        !self.is_draft && !self.is_prerelease && self.published_at.is_some()
    }
}

/// A validated release reference.
///
/// Accepts `MAJOR.MINOR.PATCH` with an optional leading `v` and optional
/// semver pre-release or build suffix. `1.2.3` and `v1.2.3` are twins.
///
/// # Examples
///
/// ```
/// use overlay_installer::release::ReleaseTag;
///
/// let tag = ReleaseTag::parse("1.2.3").expect("valid tag");
/// assert_eq!(tag.lookup_order(), ["1.2.3".to_owned(), "v1.2.3".to_owned()]);
/// assert!(ReleaseTag::parse("nightly").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag {
    version: semver::Version,
    prefixed: bool,
}

impl ReleaseTag {
    /// Validate `reference` against the tag grammar.
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::InvalidReference`] for anything that is not
    /// an optionally `v`-prefixed semantic version.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        let (prefixed, number) = match trimmed.strip_prefix('v') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let version = semver::Version::parse(number).map_err(|err| {
            InstallerError::guard(
                GuardCategory::InvalidReference,
                format!("reference {reference:?} is not a version tag like v1.2.3: {err}"),
            )
        })?;
        Ok(Self { version, prefixed })
    }

    /// Return the parsed version.
    #[must_use]
    pub const fn version(&self) -> &semver::Version {
        &self.version
    }

    /// Return the tag spelled as it was given.
    #[must_use]
    pub fn as_given(&self) -> String {
        self.spelled(self.prefixed)
    }

    /// Return the tag spelled with the opposite prefix choice.
    #[must_use]
    pub fn twin(&self) -> String {
        self.spelled(!self.prefixed)
    }

    /// Return the spellings to look up, the given one first.
    #[must_use]
    pub fn lookup_order(&self) -> [String; 2] {
        [self.as_given(), self.twin()]
    }

    fn spelled(&self, prefixed: bool) -> String {
        if prefixed {
            format!("v{}", self.version)
        } else {
            self.version.to_string()
        }
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_given())
    }
}

/// The outcome of release resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    /// The provider's tag for the chosen release.
    pub tag: String,
    /// Where the reference came from.
    pub origin: ReferenceOrigin,
    /// The full release description.
    pub metadata: ReleaseMetadata,
}

/// Chooses the release to install.
pub struct ReleaseResolver<'a> {
    source: &'a dyn ReleaseSource,
    endpoint: &'a ReleaseEndpoint,
}

impl<'a> ReleaseResolver<'a> {
    /// Create a resolver querying `source`; `endpoint` supplies URLs for
    /// diagnostics.
    #[must_use]
    pub fn new(source: &'a dyn ReleaseSource, endpoint: &'a ReleaseEndpoint) -> Self {
        Self { source, endpoint }
    }

    /// Resolve `selector` to one release.
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::InvalidReference`] for a malformed explicit
    /// or overridden reference, without contacting the provider. Returns an
    /// acquisition error when the release does not exist, the listing has
    /// no stable release, or the provider cannot be queried.
    pub fn resolve(
        &self,
        selector: &ReleaseSelector,
        diagnostics: &mut Diagnostics<'_>,
    ) -> Result<ResolvedRelease> {
        match selector.candidate() {
            Some((reference, origin)) => {
                let tag = ReleaseTag::parse(reference)?;
                if origin == ReferenceOrigin::Environment {
                    diagnostics.verbose(
                        &DiagnosticLine::step("ReferenceOverride")
                            .field("ref", &tag)
                            .field("variable", REF_ENV),
                    );
                }
                self.by_tag(&tag, origin)
            }
            None => self.latest(),
        }
    }

    fn by_tag(&self, tag: &ReleaseTag, origin: ReferenceOrigin) -> Result<ResolvedRelease> {
        let given = tag.as_given();
        for candidate in tag.lookup_order() {
            debug!("looking up release {candidate}");
            match self.source.release_by_tag(&candidate) {
                Ok(metadata) => {
                    return Ok(ResolvedRelease {
                        tag: metadata.tag.clone(),
                        origin,
                        metadata,
                    });
                }
                Err(DownloadError::NotFound { .. }) => {}
                Err(err) => {
                    return Err(acquisition_error(
                        &given,
                        self.endpoint.tag_url(&candidate),
                        &err,
                    ));
                }
            }
        }
        Err(InstallerError::Acquisition {
            category: AcquisitionCategory::NotFound,
            reference: given.clone(),
            url: self.endpoint.tag_url(&given),
            reason: format!("no release is tagged {given} or {}", tag.twin()),
        })
    }

    fn latest(&self) -> Result<ResolvedRelease> {
        let url = self.endpoint.listing_url();
        let releases = self
            .source
            .list_releases()
            .map_err(|err| acquisition_error(LATEST, url.clone(), &err))?;
        debug!("provider listed {} releases", releases.len());
        let metadata = select_latest(releases).ok_or_else(|| InstallerError::Acquisition {
            category: AcquisitionCategory::NotFound,
            reference: LATEST.to_owned(),
            url,
            reason: "no published stable release".to_owned(),
        })?;
        Ok(ResolvedRelease {
            tag: metadata.tag.clone(),
            origin: ReferenceOrigin::Latest,
            metadata,
        })
    }
}

/// Pick the most recently published stable release.
#[must_use]
pub fn select_latest(releases: Vec<ReleaseMetadata>) -> Option<ReleaseMetadata> {
    releases
        .into_iter()
        .filter(ReleaseMetadata::is_stable)
        .max_by_key(|release| release.published_at)
}

/// Convert a provider error into an acquisition failure.
pub(crate) fn acquisition_error(reference: &str, url: String, err: &DownloadError) -> InstallerError {
    InstallerError::Acquisition {
        category: err.category(),
        reference: reference.to_owned(),
        url,
        reason: err.to_string(),
    }
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod tests;
