/**
 * Archive extraction
 *
 * Supplies directory trees to the store from zip, tar and gzip-compressed
 * tar archives. Handlers are resolved by media type, either given
 * explicitly or guessed from the archive's file name.
 */
pub mod archive_handler;
pub mod tar_handler;
pub mod zip_handler;

pub use archive_handler::{ArchiveHandler, ExtractionSummary};
pub use tar_handler::TarHandler;
pub use zip_handler::ZipHandler;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::utils::cancellation::TaskHandle;

/// Archive formats the store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 3] = [ArchiveKind::Zip, ArchiveKind::Tar, ArchiveKind::TarGz];

    /// Canonical media type.
    pub fn mime_type(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "application/zip",
            ArchiveKind::Tar => "application/x-tar",
            ArchiveKind::TarGz => "application/x-compressed-tar",
        }
    }

    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        match mime_type.trim().to_ascii_lowercase().as_str() {
            "application/zip" => Some(ArchiveKind::Zip),
            "application/x-tar" => Some(ArchiveKind::Tar),
            "application/x-compressed-tar" | "application/gzip" | "application/x-gzip" => {
                Some(ArchiveKind::TarGz)
            }
            _ => None,
        }
    }

    /// Guess the kind from a file name such as `pkg-1.0.tar.gz`.
    pub fn guess_from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// An archive to add to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    /// Explicit media type; guessed from `path` when absent.
    pub mime_type: Option<String>,
    /// Directory inside the archive whose contents become the tree root.
    pub sub_dir: Option<String>,
}

impl ArchiveInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
            sub_dir: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = Some(sub_dir.into());
        self
    }

    /// Resolve the archive kind; `NotSupported` if it cannot be determined.
    pub fn kind(&self) -> Result<ArchiveKind> {
        match &self.mime_type {
            Some(mime_type) => ArchiveKind::from_mime_type(mime_type).ok_or_else(|| {
                StoreError::not_supported(format!("archive type '{}'", mime_type))
            }),
            None => ArchiveKind::guess_from_path(&self.path).ok_or_else(|| {
                StoreError::not_supported(format!(
                    "cannot determine archive type of {}",
                    self.path.display()
                ))
            }),
        }
    }
}

/**
 * Archive manager
 *
 * Holds one handler per supported kind.
 */
pub struct ArchiveManager {
    handlers: Vec<Box<dyn ArchiveHandler>>,
}

impl ArchiveManager {
    pub fn new() -> Self {
        let handlers: Vec<Box<dyn ArchiveHandler>> = vec![
            Box::new(ZipHandler),
            Box::new(TarHandler::plain()),
            Box::new(TarHandler::gzipped()),
        ];

        Self { handlers }
    }

    /**
     * Extract `archive` into `target_dir`
     */
    pub async fn extract(
        &self,
        archive: &ArchiveInfo,
        target_dir: &Path,
        handle: &TaskHandle,
    ) -> Result<ExtractionSummary> {
        let kind = archive.kind()?;
        let handler = self
            .find_handler(kind)
            .ok_or_else(|| StoreError::not_supported(format!("archive type '{}'", kind)))?;

        info!(
            archive = %archive.path.display(),
            kind = %kind,
            "Extracting archive"
        );
        handler.extract(&archive.path, target_dir, handle).await
    }

    fn find_handler(&self, kind: ArchiveKind) -> Option<&dyn ArchiveHandler> {
        self.handlers
            .iter()
            .find(|handler| handler.kind() == kind)
            .map(|handler| handler.as_ref())
    }

    pub fn supported_mime_types(&self) -> Vec<&'static str> {
        self.handlers
            .iter()
            .map(|handler| handler.kind().mime_type())
            .collect()
    }
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}
