//! Filesystem helpers shared by the store and the extractors
//!
//! Copying a tree into a stage must preserve everything the manifest
//! records: file bytes, the executable bit, modification times and symlink
//! targets. Directory mtimes are applied after their children were written,
//! since writing a child bumps the parent's mtime.

use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::utils::cancellation::TaskHandle;

/// Copy `source` recursively into `target` (which must not exist yet).
///
/// Symlinks are copied as links, never followed. The root-level `.manifest`
/// of a source that is itself a store entry is skipped.
pub fn copy_tree(source: &Path, target: &Path, handle: &TaskHandle) -> Result<u64> {
    let mut directories: Vec<(PathBuf, FileTime)> = Vec::new();
    let mut copied_bytes = 0u64;

    for entry in WalkDir::new(source).follow_links(false) {
        handle.check_cancelled()?;
        let entry = entry.map_err(|e| walk_error(e, source))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| StoreError::invalid_data("walked outside of the source tree"))?;
        if entry.depth() == 1 && relative.as_os_str() == crate::manifest::MANIFEST_FILE_NAME {
            continue;
        }
        let destination = target.join(relative);
        let metadata = entry
            .path()
            .symlink_metadata()
            .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(entry.path())))?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&destination).map_err(|e| {
                StoreError::io(e, "Failed to create directory", Some(&destination))
            })?;
            directories.push((destination, FileTime::from_last_modification_time(&metadata)));
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())
                .map_err(|e| StoreError::io(e, "Failed to read symlink", Some(entry.path())))?;
            create_symlink(&link_target, &destination)?;
        } else if file_type.is_file() {
            copied_bytes += fs::copy(entry.path(), &destination).map_err(|e| {
                StoreError::io(e, "Failed to copy file", Some(entry.path()))
            })?;
            // fs::copy carries the permission bits over; the mtime must follow
            filetime::set_file_mtime(&destination, FileTime::from_last_modification_time(&metadata))
                .map_err(|e| StoreError::io(e, "Failed to set file mtime", Some(&destination)))?;
        } else {
            return Err(StoreError::not_supported(format!(
                "unsupported file type at {}",
                entry.path().display()
            )));
        }
    }

    apply_directory_mtimes(&directories)?;
    debug!(
        source = %source.display(),
        target = %target.display(),
        bytes = copied_bytes,
        "Copied tree"
    );
    Ok(copied_bytes)
}

/// Apply recorded directory mtimes deepest-first.
pub fn apply_directory_mtimes(directories: &[(PathBuf, FileTime)]) -> Result<()> {
    let mut ordered: Vec<&(PathBuf, FileTime)> = directories.iter().collect();
    ordered.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (path, mtime) in ordered {
        filetime::set_file_mtime(path, *mtime)
            .map_err(|e| StoreError::io(e, "Failed to set directory mtime", Some(path)))?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn create_symlink(link_target: &Path, destination: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link_target, destination)
        .map_err(|e| StoreError::io(e, "Failed to create symlink", Some(destination)))
}

#[cfg(not(unix))]
pub fn create_symlink(link_target: &Path, destination: &Path) -> Result<()> {
    let _ = link_target;
    Err(StoreError::not_supported(format!(
        "symbolic links are not supported on this platform: {}",
        destination.display()
    )))
}

/// Whether the file's permission bits mark it executable.
#[cfg(unix)]
pub fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Remove write permission from every file and directory below `root`.
///
/// Symlinks are skipped (their permissions are not meaningful).
pub fn make_read_only_recursive(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        if entry.file_type().is_symlink() {
            continue;
        }
        set_writable(entry.path(), false)?;
    }
    Ok(())
}

/// Grant the owner write permission on every file and directory below `root`.
pub fn make_writable_recursive(root: &Path) -> Result<()> {
    set_writable(root, true)?;
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        if entry.file_type().is_symlink() {
            continue;
        }
        set_writable(entry.path(), true)?;
    }
    Ok(())
}

/// Toggle the owner write bit (or the read-only attribute off unix).
pub fn set_writable(path: &Path, writable: bool) -> Result<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(path)))?;
    let mut permissions = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = permissions.mode();
        let new_mode = if writable { mode | 0o200 } else { mode & !0o222 };
        if new_mode == mode {
            return Ok(());
        }
        permissions.set_mode(new_mode);
    }
    #[cfg(not(unix))]
    {
        if permissions.readonly() == !writable {
            return Ok(());
        }
        permissions.set_readonly(!writable);
    }

    fs::set_permissions(path, permissions)
        .map_err(|e| StoreError::io(e, "Failed to change permissions", Some(path)))
}

/// Delete a tree even if the store write-protected it.
pub fn remove_tree(root: &Path) -> Result<()> {
    if let Err(e) = make_writable_recursive(root) {
        warn!(path = %root.display(), error = %e, "Failed to clear write protection before delete");
    }
    fs::remove_dir_all(root).map_err(|e| StoreError::io(e, "Failed to delete directory", Some(root)))
}

/// Compare two files byte by byte.
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    use std::io::Read;

    const BUFFER_SIZE: usize = 64 * 1024;

    let mut file_a =
        fs::File::open(a).map_err(|e| StoreError::io(e, "Failed to open file", Some(a)))?;
    let mut file_b =
        fs::File::open(b).map_err(|e| StoreError::io(e, "Failed to open file", Some(b)))?;
    if file_a.metadata()?.len() != file_b.metadata()?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; BUFFER_SIZE];
    let mut buf_b = vec![0u8; BUFFER_SIZE];
    loop {
        let read_a = read_full(&mut file_a, &mut buf_a).map_err(|e| StoreError::io(e, "Failed to read file", Some(a)))?;
        let read_b = read_full(&mut file_b, &mut buf_b).map_err(|e| StoreError::io(e, "Failed to read file", Some(b)))?;
        if read_a != read_b || buf_a[..read_a] != buf_b[..read_b] {
            return Ok(false);
        }
        if read_a == 0 {
            return Ok(true);
        }
    }

    fn read_full(file: &mut fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

fn walk_error(err: walkdir::Error, root: &Path) -> StoreError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    match err.into_io_error() {
        Some(io) => StoreError::io(io, "Failed to walk directory", Some(&path)),
        None => StoreError::invalid_data(format!("filesystem loop at {}", path.display())),
    }
}
