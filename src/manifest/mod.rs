//! Manifest codec
//!
//! A manifest is the canonical text listing of a directory tree: one line per
//! file, executable, symlink or directory, in a deterministic order. Hashing
//! the text yields the tree's digest, which names the tree in the store.
//!
//! ```text
//! F <hash> <mtime> <size> <name>
//! X <hash> <mtime> <size> <name>
//! S <hash> <size> <name>
//! D /<path>              (sha1new, sha256new)
//! D <mtime> /<path>      (sha1)
//! ```

pub mod digest;
pub mod entry;
pub mod format;
mod generator;

pub use digest::ManifestDigest;
pub use entry::{FileEntry, ManifestEntry};
pub use format::{HashAlgorithm, ManifestFormat};

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::utils::cancellation::TaskHandle;

/// Name of the manifest file stored at the root of every store entry.
pub const MANIFEST_FILE_NAME: &str = ".manifest";

/// Ordered list of entries serialized under one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    format: ManifestFormat,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(format: ManifestFormat, entries: Vec<ManifestEntry>) -> Self {
        Self { format, entries }
    }

    /// Walk `root` and build its manifest.
    ///
    /// Symlinks are recorded, never followed. This is blocking work; async
    /// callers run it on `spawn_blocking`.
    pub fn generate(root: &Path, format: ManifestFormat, handle: &TaskHandle) -> Result<Self> {
        let entries = generator::generate_entries(root, format, handle)?;
        Ok(Self { format, entries })
    }

    /// Parse manifest text. Every line, including the last, must end in `\n`.
    pub fn parse(text: &str, format: ManifestFormat) -> Result<Self> {
        if text.is_empty() {
            return Ok(Self::new(format, Vec::new()));
        }
        let body = text.strip_suffix('\n').ok_or_else(|| {
            StoreError::invalid_data("manifest text must end with a newline")
        })?;

        let entries = body
            .split('\n')
            .enumerate()
            .map(|(index, line)| ManifestEntry::parse(line, index + 1, format))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(format, entries))
    }

    pub fn load(path: &Path, format: ManifestFormat) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::io(e, "Failed to read manifest", Some(path)))?;
        Self::parse(&text, format)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())
            .map_err(|e| StoreError::io(e, "Failed to write manifest", Some(path)))
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lowercase hex hash of the serialized text.
    pub fn calculate_digest(&self) -> String {
        self.format.hash_bytes(self.to_string().as_bytes())
    }

    /// The digest as a single-format [`ManifestDigest`].
    pub fn digest(&self) -> ManifestDigest {
        ManifestDigest::with(self.format, self.calculate_digest())
    }

    /// Regular and executable files with their paths relative to the root
    /// (`/`-separated, no leading slash).
    ///
    /// Only new-layout manifests say which directory a file belongs to: in
    /// the old layout the files following a subdirectory's listing may
    /// belong to any ancestor. Old-layout manifests yield `NotSupported`.
    pub fn files(&self) -> Result<impl Iterator<Item = (String, FileEntry<'_>)> + '_> {
        if !self.format.is_new_layout() {
            return Err(StoreError::not_supported(format!(
                "file paths cannot be resolved from a {} manifest",
                self.format
            )));
        }

        let mut current_dir = "";
        Ok(self.entries.iter().filter_map(move |entry| match entry {
            ManifestEntry::Directory { path, .. } => {
                current_dir = path.trim_start_matches('/');
                None
            }
            _ => entry.as_file().map(|file| {
                let path = if current_dir.is_empty() {
                    file.name.to_string()
                } else {
                    format!("{}/{}", current_dir, file.name)
                };
                (path, file)
            }),
        }))
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(ManifestEntry::as_file)
            .map(|file| file.size)
            .sum()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
