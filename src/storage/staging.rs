//! Private staging directories inside the cache root
//!
//! Every add works in its own `.tmp-<pid>-<uuid>` directory next to the
//! committed entries, so the final rename never crosses filesystems. A stage
//! that is dropped (error, cancellation, lost race) is deleted; a crashed
//! process leaves it behind for [`purge_stale_stages`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::utils::fs::remove_tree;

/// Name prefix shared by staging and removal directories.
pub const STAGING_PREFIX: &str = ".tmp-";

/// An uncommitted tree under construction.
#[derive(Debug)]
pub struct Stage {
    path: PathBuf,
}

impl Stage {
    /// Create a fresh staging directory inside `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let prefix = format!("{}{}-{}", STAGING_PREFIX, std::process::id(), Uuid::new_v4());
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(0)
            .tempdir_in(root)
            .map_err(|e| StoreError::io(e, "Failed to create staging directory", Some(root)))?;
        // Cleanup is handled by our own Drop, which copes with read-only trees
        let path = dir.into_path();
        debug!(stage = %path.display(), "Created staging directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a copied directory tree is placed.
    pub fn content_dir(&self) -> PathBuf {
        self.path.join("content")
    }

    /// Where an archive is extracted.
    pub fn archive_dir(&self) -> PathBuf {
        self.path.join("archive")
    }

    /// Mark the stage as still in use.
    ///
    /// Copies and extractions restore the original mtimes, so a stage whose
    /// writes are done would otherwise look as old as its content.
    pub fn touch(&self) {
        if let Err(e) = filetime::set_file_mtime(&self.path, filetime::FileTime::now()) {
            warn!(stage = %self.path.display(), error = %e, "Failed to refresh staging directory");
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!(stage = %self.path.display(), error = %e, "Failed to delete staging directory");
        }
    }
}

/// A unique name for moving an entry out of the way before deleting it.
pub fn removal_name() -> String {
    format!("{}remove-{}-{}", STAGING_PREFIX, std::process::id(), Uuid::new_v4())
}

/// Delete staging directories in `root` whose newest file or directory was
/// modified more than `max_age` ago.
///
/// Returns the number of directories removed. Failures are logged and
/// skipped; another process may be deleting the same directory.
pub fn purge_stale_stages(root: &Path, max_age: Duration) -> Result<usize> {
    let read_dir = match fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(e, "Failed to list cache directory", Some(root))),
    };

    let now = SystemTime::now();
    let mut purged = 0;
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let age = newest_mtime(&entry.path())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match remove_tree(&entry.path()) {
            Ok(()) => {
                info!(stage = %entry.path().display(), age_secs = age.as_secs(), "Purged stale staging directory");
                purged += 1;
            }
            Err(e) => warn!(stage = %entry.path().display(), error = %e, "Failed to purge staging directory"),
        }
    }
    Ok(purged)
}

/// Latest mtime of anything below `dir`, `dir` included.
///
/// A copy in progress may only be writing deep inside the tree.
fn newest_mtime(dir: &Path) -> Option<SystemTime> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter_map(|metadata| metadata.modified().ok())
        .max()
}
