//! Cross-entry deduplication
//!
//! Files with the same content, size, mtime and executable bit in different
//! (or the same) entries are replaced by hard links to one representative.
//! Each replacement is a link under a temporary name followed by a rename
//! over the original, so a concurrent reader sees either the old or the new
//! inode, never a missing file. The temporary links live in a staging
//! directory in the cache root, never inside an entry, so a crash between the
//! two steps leaves nothing behind that a purge would not remove.

use filetime::FileTime;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::manifest::{HashAlgorithm, Manifest, ManifestDigest, ManifestFormat};
use crate::storage::directory_store::list_entries;
use crate::storage::integrity::load_trusted_manifest;
use crate::storage::staging::Stage;
use crate::utils::cancellation::TaskHandle;
use crate::utils::fs::{files_identical, set_writable};

/// Files that may share one inode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DedupKey {
    algorithm: HashAlgorithm,
    hash: String,
    size: u64,
    mtime: i64,
    executable: bool,
}

/// Hard-link identical files across all entries below `root`.
///
/// Returns the number of bytes no longer stored twice.
pub fn optimise_store(root: &Path, handle: &TaskHandle) -> Result<u64> {
    let mut groups: BTreeMap<DedupKey, Vec<PathBuf>> = BTreeMap::new();

    for digest in list_entries(root)? {
        handle.check_cancelled()?;
        let entry = root.join(digest.to_string());
        match entry_files(&entry, &digest, handle) {
            Ok(files) => {
                for (key, path) in files {
                    groups.entry(key).or_default().push(path);
                }
            }
            Err(StoreError::UserCanceled) => return Err(StoreError::UserCanceled),
            Err(e) => warn!(entry = %entry.display(), error = %e, "Skipping entry during optimise"),
        }
    }

    if groups.values().all(|paths| paths.len() < 2) {
        info!(root = %root.display(), bytes = 0, "Optimised store, no duplicates");
        return Ok(0);
    }

    let scratch = Stage::create(root)?;
    let mut saved = 0u64;
    for paths in groups.into_values() {
        handle.check_cancelled()?;
        let Some((representative, members)) = paths.split_first() else {
            continue;
        };
        for member in members {
            match link_duplicate(representative, member, scratch.path()) {
                Ok(Some(freed)) => {
                    debug!(
                        file = %member.display(),
                        representative = %representative.display(),
                        bytes = freed,
                        "Replaced duplicate with hard link"
                    );
                    saved += freed;
                }
                Ok(None) => {}
                Err(e) => warn!(file = %member.display(), error = %e, "Failed to deduplicate file"),
            }
        }
    }

    info!(root = %root.display(), bytes = saved, "Optimised store");
    Ok(saved)
}

/// Files of one entry with their dedup keys.
///
/// Uses the stored `.manifest` when it still matches the entry name and
/// regenerates it otherwise. Entries whose content no longer matches their
/// name are skipped by the caller.
fn entry_files(
    entry: &Path,
    digest: &ManifestDigest,
    handle: &TaskHandle,
) -> Result<Vec<(DedupKey, PathBuf)>> {
    let (format, hex) = digest
        .best()
        .ok_or_else(|| StoreError::invalid_data("entry name carries no digest"))?;

    let manifest = match load_trusted_manifest(entry, digest) {
        Some(manifest) => manifest,
        None => {
            let manifest = Manifest::generate(entry, format, handle)?;
            if manifest.calculate_digest() != hex {
                return Err(StoreError::invalid_data(format!(
                    "{} does not match its digest, run an audit",
                    entry.display()
                )));
            }
            manifest
        }
    };

    // The old layout cannot place files in directories; list the same
    // tree in the new layout with the same hash algorithm instead.
    let manifest = if format.is_new_layout() {
        manifest
    } else {
        Manifest::generate(entry, ManifestFormat::Sha1New, handle)?
    };

    let algorithm = manifest.format().algorithm();
    let keys = manifest
        .files()?
        .map(|(relative, file)| {
            (
                DedupKey {
                    algorithm,
                    hash: file.hash.to_string(),
                    size: file.size,
                    mtime: file.mtime,
                    executable: file.executable,
                },
                entry.join(relative),
            )
        })
        .collect();
    Ok(keys)
}

/// Replace `member` with a hard link to `representative`, building the link
/// in `scratch` first.
///
/// Returns the bytes freed, which is zero when `member` had other links, or
/// `None` when nothing needed to change.
fn link_duplicate(representative: &Path, member: &Path, scratch: &Path) -> Result<Option<u64>> {
    let rep_meta = fs::symlink_metadata(representative)
        .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(representative)))?;
    let member_meta = fs::symlink_metadata(member)
        .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(member)))?;
    if !rep_meta.is_file() || !member_meta.is_file() || same_inode(&rep_meta, &member_meta) {
        return Ok(None);
    }
    if !files_identical(representative, member)? {
        warn!(
            file = %member.display(),
            representative = %representative.display(),
            "Manifest hashes agree but contents differ, not linking"
        );
        return Ok(None);
    }
    let freed = if sole_link(&member_meta) { member_meta.len() } else { 0 };

    let parent = member
        .parent()
        .ok_or_else(|| StoreError::invalid_data(format!("{} has no parent", member.display())))?;
    let parent_meta = fs::metadata(parent)
        .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(parent)))?;
    let parent_mtime = FileTime::from_last_modification_time(&parent_meta);

    set_writable(parent, true)?;
    let _restore = scopeguard::guard(
        (parent.to_path_buf(), parent_meta.permissions(), parent_mtime),
        |(dir, permissions, mtime)| {
            if let Err(e) = filetime::set_file_mtime(&dir, mtime) {
                warn!(dir = %dir.display(), error = %e, "Failed to restore directory mtime");
            }
            if let Err(e) = fs::set_permissions(&dir, permissions) {
                warn!(dir = %dir.display(), error = %e, "Failed to restore directory permissions");
            }
        },
    );

    let temp = scratch.join(format!("link-{}", Uuid::new_v4()));
    fs::hard_link(representative, &temp)
        .map_err(|e| StoreError::io(e, "Failed to create hard link", Some(&temp)))?;
    if let Err(e) = fs::rename(&temp, member) {
        let _ = fs::remove_file(&temp);
        return Err(StoreError::io(e, "Failed to replace file with hard link", Some(member)));
    }
    Ok(Some(freed))
}

#[cfg(unix)]
fn same_inode(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_inode(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Whether replacing this file actually releases its blocks.
#[cfg(unix)]
fn sole_link(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink() == 1
}

#[cfg(not(unix))]
fn sole_link(_metadata: &fs::Metadata) -> bool {
    true
}
