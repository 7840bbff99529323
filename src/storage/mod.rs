//! Implementation store
//!
//! A content-addressed cache of immutable directory trees. Each entry lives
//! in a directory named after its digest and carries its own manifest:
//!
//! ```text
//! implementations/
//! ├── sha256new=ec21b783...      # committed, read-only
//! │   ├── .manifest
//! │   └── ...
//! ├── sha1new=4e642fa4...
//! └── .tmp-4242-6f1c...          # stage of an add in progress
//! ```
//!
//! Entries are staged privately and committed with one rename; nothing
//! else in the cache root is shared state, so several processes may use
//! the same root at once.

pub mod composite_store;
pub mod directory_store;
pub mod integrity;
pub mod optimise;
pub mod read_only_store;
pub mod staging;

pub use composite_store::CompositeStore;
pub use directory_store::DirectoryStore;
pub use integrity::{verify_tree, AuditProblem};
pub use read_only_store::ReadOnlyStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveInfo;
use crate::error::Result;
use crate::manifest::ManifestDigest;
use crate::utils::cancellation::TaskHandle;

/// Lazily produced audit findings. Only cancellation yields an `Err`.
pub type AuditStream = BoxStream<'static, Result<AuditProblem>>;

/// What a store backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCapabilities {
    /// Accepts `add_*` and `remove`.
    pub writable: bool,
    /// Supports `audit`.
    pub audit: bool,
    /// Supports `optimise`.
    pub optimise: bool,
}

impl StoreCapabilities {
    pub const FULL: StoreCapabilities = StoreCapabilities {
        writable: true,
        audit: true,
        optimise: true,
    };

    pub const READ_ONLY: StoreCapabilities = StoreCapabilities {
        writable: false,
        audit: false,
        optimise: false,
    };
}

/**
 * Store backend trait
 *
 * Lookups and verification are available everywhere; mutation, audit and
 * optimise depend on [`Store::capabilities`]. Backends without a capability
 * fail the operation with `AccessDenied` (or return `None` from `audit`).
 */
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> StoreCapabilities;

    /// Digests of all committed entries, sorted by their string form.
    async fn list_all(&self) -> Result<Vec<ManifestDigest>>;

    async fn contains(&self, digest: &ManifestDigest) -> bool {
        self.get_path(digest).await.is_ok()
    }

    /// Path of the entry, trying the digest's formats best first.
    async fn get_path(&self, digest: &ManifestDigest) -> Result<PathBuf>;

    /// Copy `source` into the store after verifying it against `digest`.
    async fn add_directory(
        &self,
        source: &Path,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf>;

    /// Extract `archive` into the store after verifying it against `digest`.
    async fn add_archive(
        &self,
        archive: &ArchiveInfo,
        digest: &ManifestDigest,
        handle: &TaskHandle,
    ) -> Result<PathBuf>;

    async fn remove(&self, digest: &ManifestDigest) -> Result<()>;

    /// Recheck a committed entry against every format in `digest`.
    async fn verify(&self, digest: &ManifestDigest, handle: &TaskHandle) -> Result<()>;

    /// Verify all entries (or `targets`), reporting problems instead of failing.
    fn audit(
        &self,
        targets: Option<Vec<ManifestDigest>>,
        handle: &TaskHandle,
    ) -> Option<AuditStream>;

    /// Hard-link identical files; returns the bytes saved.
    async fn optimise(&self, handle: &TaskHandle) -> Result<u64>;
}
