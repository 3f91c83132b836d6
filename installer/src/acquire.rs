//! Archive acquisition.
//!
//! A release may publish its overlay under the preferred name
//! [`PREFERRED_ASSET`] or under one of the legacy tag-qualified names. The
//! candidates are tried in a fixed order and the first one the release
//! actually carries is downloaded into the workspace. When the provider
//! publishes a SHA-256 digest for the asset, the download is verified
//! against it.

use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{AcquisitionCategory, InstallerError, Result};
use crate::extraction::ArchiveFormat;
use crate::provider::{ReleaseEndpoint, ReleaseSource};
use crate::release::{ReleaseAsset, ResolvedRelease, acquisition_error};
use crate::workspace::ExtractionWorkspace;

/// Asset name tried before any legacy name.
pub const PREFERRED_ASSET: &str = "overlay.zip";

/// A rule that names one acceptable asset for a release tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetCandidate {
    /// The fixed name [`PREFERRED_ASSET`].
    Preferred,
    /// `overlay-<tag>` with the given archive extension.
    Legacy(ArchiveFormat),
}

/// Candidates in the order they are tried.
pub const ASSET_CANDIDATES: [AssetCandidate; 4] = [
    AssetCandidate::Preferred,
    AssetCandidate::Legacy(ArchiveFormat::Zip),
    AssetCandidate::Legacy(ArchiveFormat::TarGz),
    AssetCandidate::Legacy(ArchiveFormat::TarZst),
];

impl AssetCandidate {
    /// Return the asset name this candidate expects for `tag`.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::acquire::AssetCandidate;
    /// use overlay_installer::extraction::ArchiveFormat;
    ///
    /// assert_eq!(AssetCandidate::Preferred.asset_name("v1.2.3"), "overlay.zip");
    /// assert_eq!(
    ///     AssetCandidate::Legacy(ArchiveFormat::TarGz).asset_name("v1.2.3"),
    ///     "overlay-v1.2.3.tar.gz"
    /// );
    /// ```
    #[must_use]
    pub fn asset_name(self, tag: &str) -> String {
        match self {
            Self::Preferred => PREFERRED_ASSET.to_owned(),
            Self::Legacy(format) => format!("overlay-{tag}{}", format.extension()),
        }
    }

    /// Return the archive format of assets matching this candidate.
    #[must_use]
    pub const fn format(self) -> ArchiveFormat {
        match self {
            Self::Preferred => ArchiveFormat::Zip,
            Self::Legacy(format) => format,
        }
    }
}

/// Pick the first candidate asset the release carries.
#[must_use]
pub fn select_asset(release: &ResolvedRelease) -> Option<(&ReleaseAsset, ArchiveFormat)> {
    ASSET_CANDIDATES.iter().find_map(|candidate| {
        let name = candidate.asset_name(&release.tag);
        release
            .metadata
            .assets
            .iter()
            .find(|asset| asset.name == name)
            .map(|asset| (asset, candidate.format()))
    })
}

/// A downloaded, verified archive inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredArchive {
    /// Location of the archive file.
    pub path: PathBuf,
    /// Container format derived from the asset name.
    pub format: ArchiveFormat,
    /// Name of the downloaded asset.
    pub asset_name: String,
    /// URL the archive was downloaded from.
    pub url: String,
}

/// Downloads the overlay archive of a resolved release.
pub struct ArchiveAcquirer<'a> {
    source: &'a dyn ReleaseSource,
    endpoint: &'a ReleaseEndpoint,
}

impl<'a> ArchiveAcquirer<'a> {
    /// Create an acquirer downloading through `source`.
    #[must_use]
    pub fn new(source: &'a dyn ReleaseSource, endpoint: &'a ReleaseEndpoint) -> Self {
        Self { source, endpoint }
    }

    /// Download the release's overlay archive into `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionCategory::NotFound`] when the release carries no
    /// candidate asset, [`AcquisitionCategory::CorruptArchive`] when the
    /// digest does not match, and the download's own category otherwise.
    pub fn acquire(
        &self,
        release: &ResolvedRelease,
        workspace: &ExtractionWorkspace,
    ) -> Result<AcquiredArchive> {
        let Some((asset, format)) = select_asset(release) else {
            let expected: Vec<String> = ASSET_CANDIDATES
                .iter()
                .map(|candidate| candidate.asset_name(&release.tag))
                .collect();
            return Err(InstallerError::Acquisition {
                category: AcquisitionCategory::NotFound,
                reference: release.tag.clone(),
                url: self.endpoint.tag_url(&release.tag),
                reason: format!("release has none of the assets {}", expected.join(", ")),
            });
        };

        let path = workspace.archive_path(&asset.name);
        debug!("downloading asset {} for {}", asset.name, release.tag);
        self.source
            .download_asset(asset, &path)
            .map_err(|err| acquisition_error(&release.tag, asset.download_url.clone(), &err))?;

        verify_digest(asset, &path).map_err(|reason| InstallerError::Acquisition {
            category: AcquisitionCategory::CorruptArchive,
            reference: release.tag.clone(),
            url: asset.download_url.clone(),
            reason,
        })?;

        Ok(AcquiredArchive {
            path,
            format,
            asset_name: asset.name.clone(),
            url: asset.download_url.clone(),
        })
    }
}

/// Compare the file at `path` against the asset's published digest.
fn verify_digest(asset: &ReleaseAsset, path: &Path) -> std::result::Result<(), String> {
    let Some(digest) = asset.digest.as_deref() else {
        return Ok(());
    };
    let Some(expected) = digest.strip_prefix("sha256:") else {
        warn!("ignoring unsupported digest {digest} for {}", asset.name);
        return Ok(());
    };
    let actual = sha256_file(path).map_err(|err| format!("cannot hash download: {err}"))?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!(
            "SHA-256 mismatch for {}: expected {expected}, got {actual}",
            asset.name
        ))
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(buffer.get(..read).unwrap_or_default());
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}
