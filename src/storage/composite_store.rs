//! Ordered stack of stores
//!
//! The user's cache comes first, followed by shared system caches. Lookups
//! return the first hit; writes go to the first member that accepts them.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::ArchiveInfo;
use crate::error::{Result, StoreError};
use crate::infrastructure::config::StoreConfig;
use crate::manifest::ManifestDigest;
use crate::storage::{AuditStream, DirectoryStore, ReadOnlyStore, Store, StoreCapabilities};
use crate::utils::cancellation::TaskHandle;

#[derive(Debug, Clone)]
pub struct CompositeStore {
    stores: Vec<Arc<dyn Store>>,
}

impl CompositeStore {
    pub fn new(stores: Vec<Arc<dyn Store>>) -> Self {
        Self { stores }
    }

    /// The configured user cache plus every shared cache that exists.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let mut stores: Vec<Arc<dyn Store>> = vec![Arc::new(DirectoryStore::open(config)?)];

        for dir in &config.shared_cache_dirs {
            if dir == &config.cache_dir {
                continue;
            }
            if !dir.is_dir() {
                debug!(path = %dir.display(), "Shared cache does not exist, skipping");
                continue;
            }
            // Opening must not create or purge anything in a shared cache
            let shared = DirectoryStore::new(dir)?;
            stores.push(Arc::new(ReadOnlyStore::new(shared)));
        }
        Ok(Self { stores })
    }

    pub fn stores(&self) -> &[Arc<dyn Store>] {
        &self.stores
    }

    /// Members holding `digest`, in search order.
    async fn holders(&self, digest: &ManifestDigest) -> Vec<&Arc<dyn Store>> {
        let mut holders = Vec::new();
        for store in &self.stores {
            if store.contains(digest).await {
                holders.push(store);
            }
        }
        holders
    }

    async fn first_holder(&self, digest: &ManifestDigest) -> Option<&Arc<dyn Store>> {
        for store in &self.stores {
            if store.contains(digest).await {
                return Some(store);
            }
        }
        None
    }

    /// Verify an entry some member already holds instead of adding it again.
    async fn reuse_existing(
        &self,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<Option<PathBuf>> {
        let Some(store) = self.first_holder(digest).await else {
            return Ok(None);
        };
        let path = store.get_path(digest).await?;
        match store.verify(digest, handle).await {
            Ok(()) => Ok(Some(path)),
            Err(StoreError::DigestMismatch { .. }) => Err(StoreError::ImplementationAlreadyInStore {
                digest: digest.to_string(),
                path,
            }),
            Err(e) => Err(e),
        }
    }

    fn no_writable_store() -> StoreError {
        StoreError::access_denied("no writable store is configured", None)
    }
}

#[async_trait]
impl Store for CompositeStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.stores
            .iter()
            .map(|store| store.capabilities())
            .fold(StoreCapabilities::READ_ONLY, |acc, caps| StoreCapabilities {
                writable: acc.writable || caps.writable,
                audit: acc.audit || caps.audit,
                optimise: acc.optimise || caps.optimise,
            })
    }

    async fn list_all(&self) -> Result<Vec<ManifestDigest>> {
        let mut union = BTreeMap::new();
        for store in &self.stores {
            for digest in store.list_all().await? {
                union.entry(digest.to_string()).or_insert(digest);
            }
        }
        Ok(union.into_values().collect())
    }

    async fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf> {
        for store in &self.stores {
            match store.get_path(digest).await {
                Ok(path) => return Ok(path),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::not_found(digest))
    }

    async fn add_directory(
        &self,
        source: &Path,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf> {
        if let Some(path) = self.reuse_existing(digest, handle).await? {
            return Ok(path);
        }

        for store in self.stores.iter().filter(|store| store.capabilities().writable) {
            match store.add_directory(source, digest, handle).await {
                Err(StoreError::AccessDenied { message, .. }) => {
                    warn!(store = ?store, error = %message, "Store refused the add, trying the next one");
                }
                result => return result,
            }
        }
        Err(Self::no_writable_store())
    }

    async fn add_archive(
        &self,
        archive: &ArchiveInfo,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf> {
        if let Some(path) = self.reuse_existing(digest, handle).await? {
            return Ok(path);
        }

        for store in self.stores.iter().filter(|store| store.capabilities().writable) {
            match store.add_archive(archive, digest, handle).await {
                Err(StoreError::AccessDenied { message, .. }) => {
                    warn!(store = ?store, error = %message, "Store refused the add, trying the next one");
                }
                result => return result,
            }
        }
        Err(Self::no_writable_store())
    }

    async fn remove(&self, digest: &ManifestDigest) -> Result<()> {
        let holders = self.holders(digest).await;
        if holders.is_empty() {
            return Err(StoreError::not_found(digest));
        }
        // Check every holder before touching any of them
        if let Some(read_only) = holders.iter().find(|store| !store.capabilities().writable) {
            return Err(StoreError::access_denied(
                format!("{} is also held by read-only store {:?}", digest, read_only),
                None,
            ));
        }
        for store in holders {
            store.remove(digest).await?;
        }
        Ok(())
    }

    async fn verify(&self, digest: &ManifestDigest, handle: &TaskHandle) -> Result<()> {
        match self.first_holder(digest).await {
            Some(store) => store.verify(digest, handle).await,
            None => Err(StoreError::not_found(digest)),
        }
    }

    fn audit(
        &self,
        targets: Option<Vec<ManifestDigest>>,
        handle: &TaskHandle,
    ) -> Option<AuditStream> {
        let streams: Vec<AuditStream> = self
            .stores
            .iter()
            .filter_map(|store| store.audit(targets.clone(), handle))
            .collect();
        if streams.is_empty() {
            return None;
        }
        Some(stream::iter(streams).flatten().boxed())
    }

    async fn optimise(&self, handle: &TaskHandle) -> Result<u64> {
        let mut saved = 0;
        for store in self.stores.iter().filter(|store| store.capabilities().optimise) {
            saved += store.optimise(handle).await?;
        }
        info!(bytes = saved, "Optimised all stores");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA1NEW: &str = "sha1new=4e642fa458e752e0454f5634a1b892a4136c995d";

    fn hello_source(root: &Path) -> PathBuf {
        let source = root.join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("hello.txt"), b"hi").unwrap();
        filetime::set_file_mtime(source.join("hello.txt"), FileTime::from_unix_time(1234567890, 0))
            .unwrap();
        source
    }

    /// A writable user cache and a read-only shared cache holding hello.txt.
    async fn layered(root: &Path) -> (CompositeStore, DirectoryStore) {
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
        let shared = DirectoryStore::new(root.join("shared")).unwrap();
        shared
            .add_directory(&hello_source(root), &digest, &TaskHandle::new())
            .await
            .unwrap();

        let user = DirectoryStore::new(root.join("user")).unwrap();
        let composite = CompositeStore::new(vec![
            Arc::new(user.clone()),
            Arc::new(ReadOnlyStore::new(shared)),
        ]);
        (composite, user)
    }

    #[tokio::test]
    async fn test_lookup_falls_through_to_shared_cache() {
        let temp_dir = TempDir::new().unwrap();
        let (store, user) = layered(temp_dir.path()).await;
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

        let path = store.get_path(&digest).await.unwrap();
        assert!(path.starts_with(temp_dir.path().join("shared")));
        assert_eq!(store.list_all().await.unwrap(), vec![digest.clone()]);
        store.verify(&digest, &TaskHandle::new()).await.unwrap();

        // Already available, so nothing is copied into the user cache
        let added = store
            .add_directory(&hello_source(temp_dir.path()), &digest, &TaskHandle::new())
            .await
            .unwrap();
        assert_eq!(added, path);
        assert!(!user.contains(&digest).await);
    }

    #[tokio::test]
    async fn test_add_goes_to_first_writable_store() {
        let temp_dir = TempDir::new().unwrap();
        let (store, user) = layered(temp_dir.path()).await;

        let source = temp_dir.path().join("other");
        fs::create_dir(&source).unwrap();
        let mut digest = ManifestDigest::new();
        digest
            .insert(
                crate::manifest::ManifestFormat::Sha256New,
                crate::manifest::Manifest::generate(
                    &source,
                    crate::manifest::ManifestFormat::Sha256New,
                    &TaskHandle::new(),
                )
                .unwrap()
                .calculate_digest(),
            )
            .unwrap();

        let path = store
            .add_directory(&source, &digest, &TaskHandle::new())
            .await
            .unwrap();
        assert!(path.starts_with(user.root()));
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_from_read_only_member_is_denied() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = layered(temp_dir.path()).await;
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

        assert!(matches!(
            store.remove(&digest).await,
            Err(StoreError::AccessDenied { .. })
        ));
        let missing: ManifestDigest = format!("sha1new={}", "0".repeat(40)).parse().unwrap();
        assert!(store.remove(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_denied_remove_keeps_writable_copy() {
        let temp_dir = TempDir::new().unwrap();
        let (store, user) = layered(temp_dir.path()).await;
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
        user.add_directory(&hello_source(temp_dir.path()), &digest, &TaskHandle::new())
            .await
            .unwrap();

        assert!(matches!(
            store.remove(&digest).await,
            Err(StoreError::AccessDenied { .. })
        ));
        assert!(user.contains(&digest).await);
        user.verify(&digest, &TaskHandle::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_from_every_writable_holder() {
        let temp_dir = TempDir::new().unwrap();
        let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
        let first = DirectoryStore::new(temp_dir.path().join("first")).unwrap();
        let second = DirectoryStore::new(temp_dir.path().join("second")).unwrap();
        for member in [&first, &second] {
            member
                .add_directory(&hello_source(temp_dir.path()), &digest, &TaskHandle::new())
                .await
                .unwrap();
        }
        let store = CompositeStore::new(vec![Arc::new(first.clone()), Arc::new(second.clone())]);

        store.remove(&digest).await.unwrap();
        assert!(!first.contains(&digest).await);
        assert!(!second.contains(&digest).await);
    }

    #[tokio::test]
    async fn test_audit_and_optimise_skip_incapable_members() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = layered(temp_dir.path()).await;

        let problems: Vec<_> = store
            .audit(None, &TaskHandle::new())
            .unwrap()
            .collect()
            .await;
        assert!(problems.is_empty());
        assert_eq!(store.optimise(&TaskHandle::new()).await.unwrap(), 0);

        let empty = CompositeStore::new(Vec::new());
        assert!(empty.audit(None, &TaskHandle::new()).is_none());
    }

    #[tokio::test]
    async fn test_from_config_skips_missing_shared_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let shared = temp_dir.path().join("shared");
        fs::create_dir(&shared).unwrap();
        let config = StoreConfig {
            cache_dir: temp_dir.path().join("user"),
            shared_cache_dirs: vec![shared, temp_dir.path().join("missing")],
            ..StoreConfig::default()
        };

        let store = CompositeStore::from_config(&config).unwrap();
        assert_eq!(store.stores().len(), 2);
        assert_eq!(store.stores()[0].capabilities(), StoreCapabilities::FULL);
        assert_eq!(store.stores()[1].capabilities(), StoreCapabilities::READ_ONLY);
    }
}
