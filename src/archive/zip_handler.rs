use async_trait::async_trait;
use chrono::NaiveDate;
use filetime::FileTime;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::archive::archive_handler::{ArchiveHandler, ExtractionSummary};
use crate::archive::ArchiveKind;
use crate::error::{Result, StoreError};
use crate::utils::cancellation::TaskHandle;
use crate::utils::fs::{apply_directory_mtimes, create_symlink};
use crate::utils::path_security::safe_relative_path;
use crate::utils::progress::ProgressUnit;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/**
 * ZIP handler
 *
 * Reads entries in archive order, restoring the executable bit and symlinks
 * from the unix mode stored by Info-ZIP style archivers. DOS timestamps are
 * interpreted as UTC.
 */
pub struct ZipHandler;

#[async_trait]
impl ArchiveHandler for ZipHandler {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    async fn extract(
        &self,
        source: &Path,
        target_dir: &Path,
        handle: &TaskHandle,
    ) -> Result<ExtractionSummary> {
        let source_path = source.to_path_buf();
        let target_path = target_dir.to_path_buf();
        let handle = handle.clone();

        tokio::task::spawn_blocking(move || extract_sync(&source_path, &target_path, &handle))
            .await?
    }
}

fn extract_sync(source: &Path, target_dir: &Path, handle: &TaskHandle) -> Result<ExtractionSummary> {
    fs::create_dir_all(target_dir).map_err(|e| {
        StoreError::io(e, "Failed to create extraction directory", Some(target_dir))
    })?;
    let file = fs::File::open(source)
        .map_err(|e| StoreError::io(e, "Failed to open archive", Some(source)))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_error(e, source))?;

    let mut summary = ExtractionSummary::new();
    let mut directories: Vec<(PathBuf, FileTime)> = Vec::new();
    let mut tracker = handle.tracker(
        format!("Extracting {}", source.display()),
        Some(archive.len() as u64),
        ProgressUnit::Entries,
    );

    for index in 0..archive.len() {
        handle.check_cancelled()?;
        let mut entry = archive.by_index(index).map_err(|e| zip_error(e, source))?;

        let Some(relative) = safe_relative_path(entry.name())? else {
            tracker.advance(1);
            continue;
        };
        let out_path = target_dir.join(&relative);
        let mtime = entry.last_modified().and_then(dos_time_to_unix);
        let mode = entry.unix_mode();

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| StoreError::io(e, "Failed to create directory", Some(&out_path)))?;
            if let Some(mtime) = mtime {
                directories.push((out_path, mtime));
            }
            summary.add_directory();
            tracker.advance(1);
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(e, "Failed to create directory", Some(parent)))?;
        }

        if mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            let mut link_target = String::new();
            entry
                .read_to_string(&mut link_target)
                .map_err(|e| StoreError::io(e, "Failed to read symlink target", Some(source)))?;
            create_symlink(Path::new(&link_target), &out_path)?;
            summary.add_symlink();
        } else {
            let mut output = fs::File::create(&out_path)
                .map_err(|e| StoreError::io(e, "Failed to create file", Some(&out_path)))?;
            let written = std::io::copy(&mut entry, &mut output)
                .map_err(|e| StoreError::io(e, "Failed to read zip entry", Some(source)))?;
            drop(output);

            if let Some(mode) = mode {
                apply_unix_mode(&out_path, mode)?;
            }
            if let Some(mtime) = mtime {
                filetime::set_file_mtime(&out_path, mtime)
                    .map_err(|e| StoreError::io(e, "Failed to set file mtime", Some(&out_path)))?;
            }
            summary.add_file(written);
        }
        tracker.advance(1);
    }

    apply_directory_mtimes(&directories)?;
    tracker.finish();

    debug!(
        archive = %source.display(),
        files = summary.files_extracted,
        bytes = summary.total_size,
        "Extracted zip archive"
    );
    Ok(summary)
}

#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
        .map_err(|e| StoreError::io(e, "Failed to set permissions", Some(path)))
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn dos_time_to_unix(time: zip::DateTime) -> Option<FileTime> {
    let timestamp = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?
        .and_utc()
        .timestamp();
    Some(FileTime::from_unix_time(timestamp, 0))
}

fn zip_error(err: ZipError, source: &Path) -> StoreError {
    match err {
        ZipError::Io(io) => StoreError::io(io, "Failed to read zip archive", Some(source)),
        ZipError::UnsupportedArchive(what) => {
            StoreError::not_supported(format!("{}: {}", source.display(), what))
        }
        other => StoreError::io(
            std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
            "Corrupt zip archive",
            Some(source),
        ),
    }
}
