//! implstore - a content-addressed implementation store
//!
//! Directory trees are identified by the digest of their manifest and kept
//! in a cache directory under that digest. The store verifies content
//! before committing it, commits with a single rename and can audit and
//! deduplicate what it holds.
//!
//! Module layout:
//! - `manifest`: manifest codec, formats and [`manifest::ManifestDigest`]
//! - `storage`: the store backends, audit and optimise
//! - `archive`: zip and tar extraction into staging directories
//! - `infrastructure`: configuration and logging
//! - `commands`: the `implstore` command-line front-end

pub mod archive;
pub mod commands;
pub mod error;
pub mod infrastructure;
pub mod manifest;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod proptest_strategies;

pub use error::{Result, StoreError};
pub use manifest::{Manifest, ManifestDigest, ManifestFormat};
pub use storage::{CompositeStore, DirectoryStore, ReadOnlyStore, Store};
pub use utils::cancellation::TaskHandle;
