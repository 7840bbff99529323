use async_trait::async_trait;
use std::path::Path;

use crate::archive::ArchiveKind;
use crate::error::Result;
use crate::utils::cancellation::TaskHandle;

/**
 * Archive extractor trait
 *
 * An extractor turns archive bytes into a directory tree below `target_dir`.
 * It is not trusted: the store regenerates the manifest of whatever was
 * extracted and compares digests before committing anything.
 */
#[async_trait]
pub trait ArchiveHandler: Send + Sync {
    /**
     * The archive kind this handler reads
     */
    fn kind(&self) -> ArchiveKind;

    /**
     * Extract `source` into `target_dir`
     *
     * Entries with absolute paths or `..` components fail the whole
     * extraction with `InvalidDataFormat`. Truncated or corrupt input fails
     * with `Io`. Cancellation is checked between entries.
     */
    async fn extract(
        &self,
        source: &Path,
        target_dir: &Path,
        handle: &TaskHandle,
    ) -> Result<ExtractionSummary>;
}

/**
 * Extraction summary
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Regular files written
    pub files_extracted: usize,
    /// Directories created
    pub directories_created: usize,
    /// Symbolic links created
    pub symlinks_created: usize,
    /// Entries skipped (unsupported entry types)
    pub entries_skipped: usize,
    /// Uncompressed bytes written
    pub total_size: u64,
}

impl ExtractionSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, size: u64) {
        self.files_extracted += 1;
        self.total_size += size;
    }

    pub fn add_directory(&mut self) {
        self.directories_created += 1;
    }

    pub fn add_symlink(&mut self) {
        self.symlinks_created += 1;
    }

    pub fn add_skipped(&mut self) {
        self.entries_skipped += 1;
    }

    /**
     * Total number of entries that produced something on disk
     */
    pub fn entries(&self) -> usize {
        self.files_extracted + self.directories_created + self.symlinks_created
    }
}
