//! Read-only view of another store
//!
//! Used for shared system caches: entries can be found and verified, but
//! every mutation fails with `AccessDenied`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveInfo;
use crate::error::{Result, StoreError};
use crate::manifest::ManifestDigest;
use crate::storage::{AuditStream, Store, StoreCapabilities};
use crate::utils::cancellation::TaskHandle;

#[derive(Debug, Clone)]
pub struct ReadOnlyStore<S> {
    inner: S,
}

impl<S: Store> ReadOnlyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn denied(&self, operation: &str) -> StoreError {
        StoreError::access_denied(format!("{} is not allowed on a read-only store", operation), None)
    }
}

#[async_trait]
impl<S: Store> Store for ReadOnlyStore<S> {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::READ_ONLY
    }

    async fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        self.inner.list_all().await
    }

    async fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        self.inner.get_path(digest).await
    }

    async fn add_directory(
        &self,
        _source: &Path,
        _digest: &ManifestDigest,
        _handle: &TaskHandle,
    ) -> Result<PathBuf> {
        Err(self.denied("add"))
    }

    async fn add_archive(
        &self,
        _archive: &ArchiveInfo,
        _digest: &ManifestDigest,
        _handle: &TaskHandle,
    ) -> Result<PathBuf> {
        Err(self.denied("add"))
    }

    async fn remove(&self, _digest: &ManifestDigest) -> Result<()> {
        Err(self.denied("remove"))
    }

    async fn verify(&self, digest: &ManifestDigest, handle: &TaskHandle) -> Result<()> {
        self.inner.verify(digest, handle).await
    }

    fn audit(
        &self,
        _targets: Option<Vec<ManifestDigest>>,
        _handle: &TaskHandle,
    ) -> Option<AuditStream> {
        None
    }

    async fn optimise(&self, _handle: &TaskHandle) -> Result<u64> {
        Err(self.denied("optimise"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirectoryStore;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA1NEW: &str = "sha1new=4e642fa458e752e0454f5634a1b892a4136c995d";

    #[test]
    fn test_remove_missing_entry_is_still_denied() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReadOnlyStore::new(DirectoryStore::new(temp_dir.path()).unwrap());
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

        let result = tokio_test::block_on(store.remove(&digest));
        assert!(matches!(result, Err(StoreError::AccessDenied { .. })));
        assert!(!tokio_test::block_on(store.contains(&digest)));
    }

    #[tokio::test]
    async fn test_lookups_pass_through_and_mutations_fail() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("hello.txt"), b"hi").unwrap();
        filetime::set_file_mtime(source.join("hello.txt"), FileTime::from_unix_time(1234567890, 0))
            .unwrap();

        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
        let writable = DirectoryStore::new(temp_dir.path().join("cache")).unwrap();
        writable
            .add_directory(&source, &digest, &TaskHandle::new())
            .await
            .unwrap();

        let store = ReadOnlyStore::new(writable);
        assert_eq!(store.capabilities(), StoreCapabilities::READ_ONLY);
        assert!(store.contains(&digest).await);
        assert_eq!(store.list_all().await.unwrap(), vec![digest.clone()]);
        store.verify(&digest, &TaskHandle::new()).await.unwrap();

        assert!(matches!(
            store.remove(&digest).await,
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.add_directory(&source, &digest, &TaskHandle::new()).await,
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.optimise(&TaskHandle::new()).await,
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(store.audit(None, &TaskHandle::new()).is_none());
        assert!(store.inner().contains(&digest).await);
    }
}
