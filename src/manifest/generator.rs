//! Tree walk producing manifest entries
//!
//! Both layouts are a pre-order depth-first walk; they differ only in how
//! the children of one directory are sorted. The new layout puts all
//! non-directories before subdirectories, the old layout mixes them.
//! Names compare as raw bytes, which is locale independent.

use filetime::FileTime;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, StoreError};
use crate::manifest::entry::ManifestEntry;
use crate::manifest::format::ManifestFormat;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::utils::cancellation::TaskHandle;
use crate::utils::fs::is_executable;
use crate::utils::progress::ProgressUnit;

pub(crate) fn generate_entries(
    root: &Path,
    format: ManifestFormat,
    handle: &TaskHandle,
) -> Result<Vec<ManifestEntry>> {
    let root_metadata = fs::metadata(root)
        .map_err(|e| StoreError::io(e, "Failed to read directory", Some(root)))?;
    if !root_metadata.is_dir() {
        return Err(StoreError::invalid_data(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let new_layout = format.is_new_layout();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by(move |a, b| compare_entries(a, b, new_layout));

    let mut tracker = handle.tracker(
        format!("Hashing {}", root.display()),
        None,
        ProgressUnit::Bytes,
    );
    let mut entries = Vec::new();

    for dir_entry in walker {
        handle.check_cancelled()?;
        let dir_entry = dir_entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf);
            match e.into_io_error() {
                Some(io) => StoreError::io(io, "Failed to walk directory", path.as_deref()),
                None => StoreError::invalid_data("filesystem loop while walking tree"),
            }
        })?;

        let name = utf8_name(&dir_entry)?;
        let file_type = dir_entry.file_type();
        if dir_entry.depth() == 1 && name == MANIFEST_FILE_NAME && !file_type.is_dir() {
            continue;
        }
        let metadata = dir_entry
            .path()
            .symlink_metadata()
            .map_err(|e| StoreError::io(e, "Failed to read metadata", Some(dir_entry.path())))?;

        let entry = if file_type.is_dir() {
            ManifestEntry::Directory {
                path: relative_dir_path(root, dir_entry.path())?,
                mtime: (!new_layout).then(|| mtime_seconds(&metadata)),
            }
        } else if file_type.is_symlink() {
            let target = fs::read_link(dir_entry.path())
                .map_err(|e| StoreError::io(e, "Failed to read symlink", Some(dir_entry.path())))?;
            let target = target.to_str().ok_or_else(|| {
                StoreError::invalid_data(format!(
                    "symlink target of {} is not valid UTF-8",
                    dir_entry.path().display()
                ))
            })?;
            ManifestEntry::Symlink {
                name: name.to_string(),
                hash: format.hash_bytes(target.as_bytes()),
                size: target.len() as u64,
            }
        } else if file_type.is_file() {
            let file = fs::File::open(dir_entry.path())
                .map_err(|e| StoreError::io(e, "Failed to open file for hashing", Some(dir_entry.path())))?;
            let hash = format
                .algorithm()
                .hash_reader(file, |n| tracker.advance(n))
                .map_err(|e| StoreError::io(e, "Failed to read file for hashing", Some(dir_entry.path())))?;
            let name = name.to_string();
            let mtime = mtime_seconds(&metadata);
            let size = metadata.len();
            if is_executable(&metadata) {
                ManifestEntry::ExecutableFile {
                    name,
                    hash,
                    mtime,
                    size,
                }
            } else {
                ManifestEntry::File {
                    name,
                    hash,
                    mtime,
                    size,
                }
            }
        } else {
            return Err(StoreError::not_supported(format!(
                "{} is neither a file, a directory nor a symlink",
                dir_entry.path().display()
            )));
        };
        entries.push(entry);
    }

    tracker.finish();
    debug!(
        root = %root.display(),
        format = %format,
        entries = entries.len(),
        "Generated manifest"
    );
    Ok(entries)
}

fn compare_entries(a: &DirEntry, b: &DirEntry, new_layout: bool) -> Ordering {
    let by_name = a
        .file_name()
        .as_encoded_bytes()
        .cmp(b.file_name().as_encoded_bytes());
    if new_layout {
        a.file_type()
            .is_dir()
            .cmp(&b.file_type().is_dir())
            .then(by_name)
    } else {
        by_name
    }
}

fn utf8_name(entry: &DirEntry) -> Result<&str> {
    let name = entry.file_name().to_str().ok_or_else(|| {
        StoreError::invalid_data(format!(
            "file name is not valid UTF-8: {}",
            entry.path().display()
        ))
    })?;
    if name.contains('\n') {
        return Err(StoreError::invalid_data(format!(
            "file name contains a newline: {:?}",
            name
        )));
    }
    Ok(name)
}

fn relative_dir_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| StoreError::invalid_data("walked outside of the manifest root"))?;
    let mut out = String::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            StoreError::invalid_data(format!("path is not valid UTF-8: {}", path.display()))
        })?;
        out.push('/');
        out.push_str(part);
    }
    Ok(out)
}

fn mtime_seconds(metadata: &fs::Metadata) -> i64 {
    FileTime::from_last_modification_time(metadata).unix_seconds()
}
