use async_trait::async_trait;
use filetime::FileTime;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, warn};

use crate::archive::archive_handler::{ArchiveHandler, ExtractionSummary};
use crate::archive::ArchiveKind;
use crate::error::{Result, StoreError};
use crate::utils::cancellation::TaskHandle;
use crate::utils::fs::apply_directory_mtimes;
use crate::utils::path_security::safe_relative_path;
use crate::utils::progress::ProgressUnit;

/**
 * TAR handler, plain or gzip-compressed
 */
pub struct TarHandler {
    gzipped: bool,
}

impl TarHandler {
    pub fn plain() -> Self {
        Self { gzipped: false }
    }

    pub fn gzipped() -> Self {
        Self { gzipped: true }
    }
}

#[async_trait]
impl ArchiveHandler for TarHandler {
    fn kind(&self) -> ArchiveKind {
        if self.gzipped {
            ArchiveKind::TarGz
        } else {
            ArchiveKind::Tar
        }
    }

    async fn extract(
        &self,
        source: &Path,
        target_dir: &Path,
        handle: &TaskHandle,
    ) -> Result<ExtractionSummary> {
        let source_path = source.to_path_buf();
        let target_path = target_dir.to_path_buf();
        let gzipped = self.gzipped;
        let handle = handle.clone();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&target_path).map_err(|e| {
                StoreError::io(e, "Failed to create extraction directory", Some(&target_path))
            })?;
            let file = std::fs::File::open(&source_path)
                .map_err(|e| StoreError::io(e, "Failed to open archive", Some(&source_path)))?;

            if gzipped {
                Self::extract_sync(Archive::new(GzDecoder::new(file)), &source_path, &target_path, &handle)
            } else {
                Self::extract_sync(Archive::new(file), &source_path, &target_path, &handle)
            }
        })
        .await?
    }
}

impl TarHandler {
    fn extract_sync<R: Read>(
        mut archive: Archive<R>,
        source: &Path,
        target_dir: &Path,
        handle: &TaskHandle,
    ) -> Result<ExtractionSummary> {
        archive.set_preserve_mtime(true);
        archive.set_overwrite(true);

        let read_error = |e: std::io::Error| StoreError::io(e, "Failed to read tar archive", Some(source));
        let mut summary = ExtractionSummary::new();
        let mut directories: Vec<(PathBuf, FileTime)> = Vec::new();
        let mut tracker = handle.tracker(
            format!("Extracting {}", source.display()),
            None,
            ProgressUnit::Entries,
        );

        for entry in archive.entries().map_err(read_error)? {
            handle.check_cancelled()?;
            let mut entry = entry.map_err(read_error)?;

            let raw_path = entry.path().map_err(read_error)?.to_string_lossy().into_owned();
            let Some(relative) = safe_relative_path(&raw_path)? else {
                continue;
            };
            let entry_type = entry.header().entry_type();
            let size = entry.header().size().map_err(read_error)?;

            match entry_type {
                EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                    unpack(&mut entry, target_dir, &relative)?;
                    summary.add_file(size);
                }
                EntryType::Link => {
                    unpack(&mut entry, target_dir, &relative)?;
                    summary.add_file(0);
                }
                EntryType::Symlink => {
                    unpack(&mut entry, target_dir, &relative)?;
                    summary.add_symlink();
                }
                EntryType::Directory => {
                    unpack(&mut entry, target_dir, &relative)?;
                    let mtime = entry.header().mtime().map_err(read_error)?;
                    directories.push((
                        target_dir.join(&relative),
                        FileTime::from_unix_time(mtime as i64, 0),
                    ));
                    summary.add_directory();
                }
                EntryType::XGlobalHeader | EntryType::XHeader => continue,
                other => {
                    warn!(
                        archive = %source.display(),
                        entry = %raw_path,
                        entry_type = ?other,
                        "Skipping unsupported tar entry type"
                    );
                    summary.add_skipped();
                    continue;
                }
            }
            tracker.advance(1);
        }

        // Writing children bumped the directory mtimes set during unpack
        apply_directory_mtimes(&directories)?;
        tracker.finish();

        debug!(
            archive = %source.display(),
            files = summary.files_extracted,
            bytes = summary.total_size,
            "Extracted tar archive"
        );
        Ok(summary)
    }
}

fn unpack<R: Read>(entry: &mut tar::Entry<'_, R>, target_dir: &Path, relative: &Path) -> Result<()> {
    let unpacked = entry.unpack_in(target_dir).map_err(|e| {
        StoreError::io(e, "Failed to unpack tar entry", Some(&target_dir.join(relative)))
    })?;
    if unpacked {
        Ok(())
    } else {
        Err(StoreError::invalid_data(format!(
            "tar entry escapes the extraction directory: {}",
            relative.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_tar(entries: &[(&str, &[u8], u64)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data, mtime) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(*mtime);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[tokio::test]
    async fn test_extract_plain_tar() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.tar");
        std::fs::write(&archive, build_tar(&[("dir/file.txt", b"hello", 1_000_000)])).unwrap();

        let target = temp_dir.path().join("out");
        let summary = TarHandler::plain()
            .extract(&archive, &target, &TaskHandle::new())
            .await
            .unwrap();

        assert_eq!(summary.files_extracted, 1);
        assert_eq!(summary.total_size, 5);
        let extracted = target.join("dir/file.txt");
        assert_eq!(std::fs::read(&extracted).unwrap(), b"hello");
        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&extracted).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_000_000);
    }

    #[tokio::test]
    async fn test_extract_gzipped_tar() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a.tar.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&build_tar(&[("file", b"zipped", 5)]))
            .unwrap();
        std::fs::write(&archive, encoder.finish().unwrap()).unwrap();

        let target = temp_dir.path().join("out");
        TarHandler::gzipped()
            .extract(&archive, &target, &TaskHandle::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(target.join("file")).unwrap(), b"zipped");
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("bad.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let result = TarHandler::gzipped()
            .extract(&archive, &temp_dir.path().join("out"), &TaskHandle::new())
            .await;
        assert!(matches!(result, Err(StoreError::Io { .. })), "{:?}", result);
    }

    #[tokio::test]
    async fn test_parent_dir_entry_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.tar");

        // Builder refuses `..` paths, so write the name into the header directly
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../escape");
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"evil"[..]).unwrap();
        std::fs::write(&archive, builder.into_inner().unwrap()).unwrap();

        let result = TarHandler::plain()
            .extract(&archive, &temp_dir.path().join("out"), &TaskHandle::new())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidDataFormat { .. })));
        assert!(!temp_dir.path().join("escape").exists());
    }
}
