//! Ephemeral extraction workspace and source subtree location.
//!
//! Each run downloads and unpacks its archive inside a uniquely named
//! directory under the system temporary area. The directory is owned by an
//! [`ExtractionWorkspace`] value and removed when that value is dropped, so
//! every exit path (success, classified failure, or panic unwinding) cleans
//! up without relying on the caller.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::AcquisitionCategory;

/// Name prefix of every workspace directory.
pub const WORKSPACE_PREFIX: &str = "overlay-install-";

/// Directory levels below the extraction root the bounded scan visits.
pub const MAX_SCAN_DEPTH: usize = 4;

const EXTRACTION_DIR: &str = "contents";

/// A scoped temporary directory holding one run's archive and its contents.
#[derive(Debug)]
pub struct ExtractionWorkspace {
    dir: TempDir,
    created_at: DateTime<Utc>,
}

impl ExtractionWorkspace {
    /// Create a workspace under the system temporary directory.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while creating the directory.
    pub fn create() -> std::io::Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    /// Create a workspace under `parent`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while creating the directory.
    pub fn create_in(parent: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        debug!("created workspace {}", dir.path().display());
        Ok(Self {
            dir,
            created_at: Utc::now(),
        })
    }

    /// Return the workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Return when the workspace was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return where a downloaded asset named `asset_name` is stored.
    #[must_use]
    pub fn archive_path(&self, asset_name: &str) -> PathBuf {
        self.path().join(asset_name)
    }

    /// Return the directory archives are extracted into.
    #[must_use]
    pub fn extraction_root(&self) -> PathBuf {
        self.path().join(EXTRACTION_DIR)
    }

    /// Delete the workspace now, reporting any failure.
    ///
    /// Dropping the workspace also deletes it, ignoring failures.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while removing the directory.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// The validated folder inside the workspace whose files are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSubtree {
    /// The requested source name.
    pub name: String,
    /// Absolute path of the subtree inside the workspace.
    pub path: PathBuf,
    /// Every regular file below `path`, relative to it, sorted.
    pub files: Vec<PathBuf>,
}

/// Reasons the source subtree could not be used.
#[derive(Debug, thiserror::Error)]
pub enum SubtreeError {
    /// No directory with the requested name exists in the archive.
    #[error("archive has no `{name}` folder")]
    NotFound {
        /// The requested source name.
        name: String,
    },

    /// The directory exists but holds no files.
    #[error("`{name}` folder in the archive contains no files")]
    Empty {
        /// The requested source name.
        name: String,
    },

    /// Walking the extracted tree failed.
    #[error("cannot read extracted files: {0}")]
    Io(#[from] std::io::Error),
}

impl SubtreeError {
    /// Classify this error for the `download failure` line.
    #[must_use]
    pub const fn category(&self) -> AcquisitionCategory {
        match self {
            Self::NotFound { .. } => AcquisitionCategory::NotFound,
            Self::Empty { .. } | Self::Io(_) => AcquisitionCategory::CorruptArchive,
        }
    }
}

/// One strategy for finding the source subtree below an extraction root.
pub trait SubtreeLocator {
    /// Return the subtree directory, or `None` if this strategy finds none.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while inspecting the tree.
    fn locate(&self, root: &Path, name: &str) -> std::io::Result<Option<PathBuf>>;
}

/// Looks for `root/<name>` exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactPath;

impl SubtreeLocator for ExactPath {
    fn locate(&self, root: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
        let candidate = root.join(name);
        Ok(candidate.is_dir().then_some(candidate))
    }
}

/// Breadth-first search for a directory whose path ends with `name`.
///
/// Visits at most `max_depth` levels below the root, in lexicographic order
/// within each level; the first match wins.
#[derive(Debug, Clone, Copy)]
pub struct BoundedScan {
    /// Deepest level visited; the root's children are level 1.
    pub max_depth: usize,
}

impl Default for BoundedScan {
    fn default() -> Self {
        Self {
            max_depth: MAX_SCAN_DEPTH,
        }
    }
}

impl SubtreeLocator for BoundedScan {
    fn locate(&self, root: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
        let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);
        while let Some((dir, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                continue;
            }
            for child in sorted_subdirectories(&dir)? {
                if child.ends_with(name) {
                    return Ok(Some(child));
                }
                queue.push_back((child, depth + 1));
            }
        }
        Ok(None)
    }
}

/// Find and validate the source subtree, trying the exact path before the
/// bounded scan.
///
/// # Errors
///
/// Returns [`SubtreeError::NotFound`] when no strategy finds the folder and
/// [`SubtreeError::Empty`] when it holds no files.
///
/// # Examples
///
/// ```
/// use overlay_installer::workspace::locate_subtree;
///
/// let root = tempfile::tempdir().expect("temp dir");
/// let nested = root.path().join("bundle-1.2.3").join("overlay");
/// std::fs::create_dir_all(&nested).expect("create");
/// std::fs::write(nested.join("a.txt"), "a").expect("write");
///
/// let subtree = locate_subtree(root.path(), "overlay").expect("found by scan");
/// assert_eq!(subtree.path, nested);
/// assert_eq!(subtree.files.len(), 1);
/// ```
pub fn locate_subtree(root: &Path, name: &str) -> Result<SourceSubtree, SubtreeError> {
    let chain: [&dyn SubtreeLocator; 2] = [&ExactPath, &BoundedScan::default()];
    for locator in chain {
        if let Some(path) = locator.locate(root, name)? {
            debug!("source subtree `{name}` found at {}", path.display());
            let files = list_files(&path)?;
            if files.is_empty() {
                return Err(SubtreeError::Empty {
                    name: name.to_owned(),
                });
            }
            return Ok(SourceSubtree {
                name: name.to_owned(),
                path,
                files,
            });
        }
    }
    Err(SubtreeError::NotFound {
        name: name.to_owned(),
    })
}

fn sorted_subdirectories(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            children.push(entry.path());
        }
    }
    children.sort();
    Ok(children)
}

/// List every regular file below `dir`, relative to it, sorted.
fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(dir) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}
