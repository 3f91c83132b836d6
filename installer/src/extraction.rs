//! Archive extraction for overlay release assets.
//!
//! Extracts `.zip`, `.tar.gz`, and `.tar.zst` archives into a directory with
//! path traversal protection. Absolute paths, `..` components, and link
//! entries are refused outright so nothing in an archive can reach outside
//! the extraction root.

use log::debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Archive container formats the installer can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A zip file.
    Zip,
    /// A gzip-compressed tarball.
    TarGz,
    /// A zstd-compressed tarball.
    TarZst,
}

impl ArchiveFormat {
    /// Derive the format from an asset file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use overlay_installer::extraction::ArchiveFormat;
    ///
    /// assert_eq!(ArchiveFormat::from_name("overlay-v1.2.3.tar.zst"), Some(ArchiveFormat::TarZst));
    /// assert_eq!(ArchiveFormat::from_name("overlay.rar"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Zip, Self::TarGz, Self::TarZst]
            .into_iter()
            .find(|format| name.ends_with(format.extension()))
    }

    /// Return the file extension, including the leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
            Self::TarZst => ".tar.zst",
        }
    }
}

/// Trait for extracting archives, enabling test mocking.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor {
    /// Extract the `format` archive at `archive_path` into `dest_dir`.
    ///
    /// Returns the relative paths of the regular files written.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape `dest_dir`, [`ExtractionError::UnsupportedEntry`] for link
    /// entries, and [`ExtractionError::EmptyArchive`] if no files are found.
    fn extract(
        &self,
        archive_path: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error while reading the archive or writing its entries.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip container is malformed.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An entry path is absolute or contains `..`.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// An entry is a symbolic or hard link.
    #[error("archive entry {path} is a link")]
    UnsupportedEntry {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,
}

/// Default extractor using the `zip`, `tar`, `flate2`, and `zstd` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExtractor;

impl ArchiveExtractor for StandardExtractor {
    fn extract(
        &self,
        archive_path: &Path,
        format: ArchiveFormat,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        debug!(
            "extracting {} as {format:?} into {}",
            archive_path.display(),
            dest_dir.display()
        );
        let file = BufReader::new(File::open(archive_path)?);
        let mut extracted = match format {
            ArchiveFormat::Zip => extract_zip(file, dest_dir)?,
            ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(file), dest_dir)?,
            ArchiveFormat::TarZst => extract_tar(zstd::Decoder::new(file)?, dest_dir)?,
        };

        if extracted.is_empty() {
            return Err(ExtractionError::EmptyArchive);
        }
        extracted.sort();
        Ok(extracted)
    }
}

fn extract_zip(file: BufReader<File>, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(file)?;
    let mut extracted = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // Some Windows archivers store `\` as the separator.
        let name = entry.name().replace('\\', "/");
        let entry_path = validate_entry_path(Path::new(&name))?;
        if entry.unix_mode().is_some_and(is_symlink_mode) {
            return Err(ExtractionError::UnsupportedEntry {
                path: entry.name().to_owned(),
            });
        }

        let dest_path = dest_dir.join(&entry_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest_path)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted.push(entry_path);
    }

    Ok(extracted)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let raw_path = entry.path()?.into_owned();
        let entry_path = validate_entry_path(&raw_path)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(ExtractionError::UnsupportedEntry {
                path: raw_path.display().to_string(),
            });
        }

        let dest_path = dest_dir.join(&entry_path);
        if entry_type.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest_path)?;
            extracted.push(entry_path);
        } else {
            debug!("skipping {entry_type:?} entry {}", raw_path.display());
        }
    }

    Ok(extracted)
}

const fn is_symlink_mode(mode: u32) -> bool {
    mode & 0o170_000 == 0o120_000
}

/// Validate that an entry path does not escape the destination directory,
/// returning it with any `.` components removed.
fn validate_entry_path(path: &Path) -> Result<PathBuf, ExtractionError> {
    let traversal = || ExtractionError::PathTraversal {
        path: path.display().to_string(),
    };
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal());
            }
        }
    }
    Ok(cleaned)
}
