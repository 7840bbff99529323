//! Archive entry path validation
//!
//! Archive entries name their destination themselves. An entry that is
//! absolute or climbs out with `..` could overwrite files outside the stage,
//! so such archives are rejected as a whole instead of being sanitized.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};

/// Validate an archive entry path and return it as a clean relative path.
///
/// `.` components are dropped. Returns `Ok(None)` for paths that name the
/// archive root itself (e.g. `./`), which carry no content.
pub fn safe_relative_path(raw: &str) -> Result<Option<PathBuf>> {
    if raw.contains('\0') {
        return Err(StoreError::invalid_data(format!(
            "archive entry path contains a NUL byte: {:?}",
            raw
        )));
    }
    // Archives written on Windows may use backslashes as separators
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(StoreError::invalid_data(format!(
            "archive entry has an absolute path: {}",
            raw
        )));
    }

    let mut clean = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(StoreError::invalid_data(format!(
                    "archive entry escapes the extraction directory: {}",
                    raw
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::invalid_data(format!(
                    "archive entry has an absolute path: {}",
                    raw
                )))
            }
        }
    }

    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

/// Validate a user-supplied sub-directory of an archive.
pub fn safe_sub_dir(sub_dir: &str) -> Result<Option<PathBuf>> {
    let trimmed = sub_dir.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    safe_relative_path(trimmed)
}
