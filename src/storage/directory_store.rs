//! Directory-backed implementation store
//!
//! Add flow: reuse a verified existing entry, otherwise stage, verify,
//! write `.manifest`, rename into place and write-protect. The rename is the
//! only step other processes can observe.

use async_trait::async_trait;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveInfo, ArchiveManager};
use crate::error::{Result, StoreError};
use crate::infrastructure::config::StoreConfig;
use crate::manifest::{ManifestDigest, MANIFEST_FILE_NAME};
use crate::storage::integrity::{audit_stream, verify_tree};
use crate::storage::optimise::optimise_store;
use crate::storage::staging::{self, removal_name, Stage};
use crate::storage::{AuditStream, Store, StoreCapabilities};
use crate::utils::cancellation::TaskHandle;
use crate::utils::fs::{copy_tree, make_read_only_recursive, remove_tree, set_writable};
use crate::utils::path_security::safe_sub_dir;

/// A store rooted in one cache directory.
#[derive(Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    read_only_entries: bool,
    archives: Arc<ArchiveManager>,
}

impl fmt::Debug for DirectoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryStore")
            .field("root", &self.root)
            .field("read_only_entries", &self.read_only_entries)
            .finish()
    }
}

impl fmt::Display for DirectoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

impl DirectoryStore {
    /// Use `root` as the cache directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::io(e, "Failed to create cache directory", Some(&root)))?;
        Ok(Self {
            root,
            read_only_entries: true,
            archives: Arc::new(ArchiveManager::new()),
        })
    }

    /// Open the configured user cache and purge stale stages.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = Self::new(&config.cache_dir)?.with_read_only_entries(config.read_only_entries);
        store.purge_stale_stages(config.stale_stage_age())?;
        Ok(store)
    }

    /// Whether committed entries lose their write permission.
    pub fn with_read_only_entries(mut self, read_only: bool) -> Self {
        self.read_only_entries = read_only;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove orphaned staging directories older than `max_age`.
    pub fn purge_stale_stages(&self, max_age: Duration) -> Result<usize> {
        staging::purge_stale_stages(&self.root, max_age)
    }

    fn find_entry(&self, digest: &ManifestDigest) -> Option<PathBuf> {
        digest
            .candidate_names()
            .into_iter()
            .map(|name| self.root.join(name))
            .find(|path| path.is_dir())
    }

    /// If `digest` is already stored, check it and return its path.
    async fn existing_entry(
        &self,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<Option<PathBuf>> {
        let Some(path) = self.find_entry(digest) else {
            return Ok(None);
        };
        let entry = path.clone();
        let digest = digest.clone();
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || reuse_existing(&entry, &digest, &handle))
            .await?
            .map(Some)
    }

    /// Verify the staged tree and commit it under the digest's best name.
    async fn commit_stage(
        &self,
        stage: Stage,
        tree: PathBuf,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf> {
        let root = self.root.clone();
        let read_only = self.read_only_entries;
        let digest = digest.clone();
        let handle = handle.clone();

        tokio::task::spawn_blocking(move || {
            stage.touch();
            let manifest = verify_tree(&tree, &digest, &handle)?;
            manifest.save(&tree.join(MANIFEST_FILE_NAME))?;

            // Last point at which the add can still be abandoned
            handle.check_cancelled()?;

            let target = root.join(digest.to_string());
            if let Err(e) = fs::rename(&tree, &target) {
                if target.exists() {
                    debug!(digest = %digest, "Lost commit race, checking the winner's entry");
                    drop(stage);
                    return reuse_existing(&target, &digest, &handle);
                }
                return Err(StoreError::io(e, "Failed to commit entry", Some(&target)));
            }
            drop(stage);

            if read_only {
                if let Err(e) = make_read_only_recursive(&target) {
                    warn!(path = %target.display(), error = %e, "Failed to write-protect entry");
                }
            }
            info!(digest = %digest, path = %target.display(), "Added implementation");
            Ok(target)
        })
        .await?
    }
}

/// Make an entry movable, treating one that vanished meanwhile as missing.
fn unlock_entry(path: &Path, digest: &ManifestDigest) -> Result<()> {
    match set_writable(path, true) {
        Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::not_found(digest))
        }
        Err(e) => Err(e),
        Ok(()) if !path.is_dir() => Err(StoreError::not_found(digest)),
        Ok(()) => Ok(()),
    }
}

/// Accept an entry that already exists if it matches `digest`.
fn reuse_existing(entry: &Path, digest: &ManifestDigest, handle: &TaskHandle) -> Result<PathBuf> {
    match verify_tree(entry, digest, handle) {
        Ok(_) => {
            debug!(digest = %digest, path = %entry.display(), "Implementation already in store");
            Ok(entry.to_path_buf())
        }
        Err(StoreError::DigestMismatch { .. }) => Err(StoreError::ImplementationAlreadyInStore {
            digest: digest.to_string(),
            path: entry.to_path_buf(),
        }),
        Err(e) => Err(e),
    }
}

/// Parse the entry names in `root`, skipping anything that is not a digest.
pub(crate) fn list_entries(root: &Path) -> Result<Vec<ManifestDigest>> {
    let read_dir = match fs::read_dir(root) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(e, "Failed to list cache directory", Some(root))),
    };

    let mut digests = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| StoreError::io(e, "Failed to list cache directory", Some(root)))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        match name.parse::<ManifestDigest>() {
            Ok(digest) if is_dir => digests.push(digest),
            _ => debug!(name = %name, "Skipping foreign directory entry"),
        }
    }
    digests.sort_by_key(|digest| digest.to_string());
    Ok(digests)
}

#[async_trait]
impl Store for DirectoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::FULL
    }

    async fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_entries(&root)).await?
    }

    async fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.find_entry(digest)
            .ok_or_else(|| StoreError::not_found(digest))
    }

    async fn add_directory(
        &self,
        source: &Path,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf> {
        if digest.is_empty() {
            return Err(StoreError::invalid_data("cannot add an implementation without a digest"));
        }
        let metadata = fs::metadata(source)
            .map_err(|e| StoreError::io(e, "Failed to read source directory", Some(source)))?;
        if !metadata.is_dir() {
            return Err(StoreError::invalid_data(format!(
                "{} is not a directory",
                source.display()
            )));
        }
        if let Some(path) = self.existing_entry(digest, handle).await? {
            return Ok(path);
        }

        let stage = Stage::create(&self.root)?;
        let tree = stage.content_dir();
        {
            let source = source.to_path_buf();
            let tree = tree.clone();
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || copy_tree(&source, &tree, &handle)).await??;
        }

        self.commit_stage(stage, tree, digest, handle).await
    }

    async fn add_archive(
        &self,
        archive: &ArchiveInfo,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf> {
        if digest.is_empty() {
            return Err(StoreError::invalid_data("cannot add an implementation without a digest"));
        }
        // Fail on unknown types before touching the cache
        archive.kind()?;
        let sub_dir = archive.sub_dir.as_deref().map(safe_sub_dir).transpose()?.flatten();

        if let Some(path) = self.existing_entry(digest, handle).await? {
            return Ok(path);
        }

        let stage = Stage::create(&self.root)?;
        let extracted = stage.archive_dir();
        self.archives.extract(archive, &extracted, handle).await?;

        let tree = match sub_dir {
            Some(sub_dir) => extracted.join(sub_dir),
            None => extracted,
        };
        if !tree.is_dir() {
            return Err(StoreError::invalid_data(format!(
                "archive {} has no directory '{}'",
                archive.path.display(),
                archive.sub_dir.as_deref().unwrap_or_default()
            )));
        }

        self.commit_stage(stage, tree, digest, handle).await
    }

    async fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let path = self.get_path(digest).await?;
        let root = self.root.clone();
        let digest = digest.clone();

        tokio::task::spawn_blocking(move || {
            // Moving a directory needs write access to it on some systems
            unlock_entry(&path, &digest)?;

            let doomed = root.join(removal_name());
            if let Err(e) = fs::rename(&path, &doomed) {
                if e.kind() == std::io::ErrorKind::NotFound {
                    return Err(StoreError::not_found(&digest));
                }
                return Err(StoreError::io(e, "Failed to remove entry", Some(&path)));
            }
            remove_tree(&doomed)?;
            info!(digest = %digest, path = %path.display(), "Removed implementation");
            Ok(())
        })
        .await?
    }

    async fn verify(&self, digest: &ManifestDigest, handle: &TaskHandle) -> Result<()> {
        let path = self.get_path(digest).await?;
        let digest = digest.clone();
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || {
            if !path.is_dir() {
                return Err(StoreError::not_found(&digest));
            }
            verify_tree(&path, &digest, &handle)?;
            info!(digest = %digest, "Implementation verified");
            Ok(())
        })
        .await?
    }

    fn audit(
        &self,
        targets: Option<Vec<ManifestDigest>>,
        handle: &TaskHandle,
    ) -> Option<AuditStream> {
        Some(audit_stream(self.root.clone(), targets, handle.clone()))
    }

    async fn optimise(&self, handle: &TaskHandle) -> Result<u64> {
        let root = self.root.clone();
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || optimise_store(&root, &handle)).await?
    }
}
