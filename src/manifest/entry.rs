//! Manifest entries and their single-line text form

use std::fmt;

use crate::error::{Result, StoreError};
use crate::manifest::format::ManifestFormat;

/// One line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// `F <hash> <mtime> <size> <name>`
    File {
        name: String,
        hash: String,
        mtime: i64,
        size: u64,
    },
    /// `X <hash> <mtime> <size> <name>`
    ExecutableFile {
        name: String,
        hash: String,
        mtime: i64,
        size: u64,
    },
    /// `S <hash> <size> <name>`; hash and size describe the link target string.
    Symlink { name: String, hash: String, size: u64 },
    /// `D /path` (new layout) or `D <mtime> /path` (old layout).
    Directory { path: String, mtime: Option<i64> },
}

/// Borrowed view of a regular or executable file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry<'a> {
    pub name: &'a str,
    pub hash: &'a str,
    pub mtime: i64,
    pub size: u64,
    pub executable: bool,
}

impl ManifestEntry {
    pub fn name(&self) -> &str {
        match self {
            ManifestEntry::File { name, .. }
            | ManifestEntry::ExecutableFile { name, .. }
            | ManifestEntry::Symlink { name, .. } => name,
            ManifestEntry::Directory { path, .. } => path,
        }
    }

    pub fn as_file(&self) -> Option<FileEntry<'_>> {
        match self {
            ManifestEntry::File {
                name,
                hash,
                mtime,
                size,
            } => Some(FileEntry {
                name,
                hash,
                mtime: *mtime,
                size: *size,
                executable: false,
            }),
            ManifestEntry::ExecutableFile {
                name,
                hash,
                mtime,
                size,
            } => Some(FileEntry {
                name,
                hash,
                mtime: *mtime,
                size: *size,
                executable: true,
            }),
            _ => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ManifestEntry::Directory { .. })
    }

    /// Parse one line (without its trailing newline).
    ///
    /// `line_no` is 1-based and only used for error messages.
    pub fn parse(line: &str, line_no: usize, format: ManifestFormat) -> Result<Self> {
        let (tag, rest) = line
            .split_once(' ')
            .ok_or_else(|| StoreError::invalid_line(line_no, "missing fields"))?;
        let algorithm = format.algorithm();

        let check_hash = |hash: &str| -> Result<String> {
            if algorithm.is_valid_hex(hash) {
                Ok(hash.to_string())
            } else {
                Err(StoreError::invalid_line(
                    line_no,
                    format!("'{}' is not a valid {} hash", hash, format),
                ))
            }
        };

        match tag {
            "F" | "X" => {
                let mut parts = rest.splitn(4, ' ');
                let (Some(hash), Some(mtime), Some(size), Some(name)) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(StoreError::invalid_line(line_no, "file entry needs 4 fields"));
                };
                let hash = check_hash(hash)?;
                let mtime = parse_number::<i64>(mtime, "mtime", line_no)?;
                let size = parse_number::<u64>(size, "size", line_no)?;
                let name = check_name(name, line_no)?;
                Ok(if tag == "F" {
                    ManifestEntry::File {
                        name,
                        hash,
                        mtime,
                        size,
                    }
                } else {
                    ManifestEntry::ExecutableFile {
                        name,
                        hash,
                        mtime,
                        size,
                    }
                })
            }
            "S" => {
                let mut parts = rest.splitn(3, ' ');
                let (Some(hash), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(StoreError::invalid_line(line_no, "symlink entry needs 3 fields"));
                };
                Ok(ManifestEntry::Symlink {
                    hash: check_hash(hash)?,
                    size: parse_number::<u64>(size, "size", line_no)?,
                    name: check_name(name, line_no)?,
                })
            }
            "D" => {
                let (mtime, path) = if format.is_new_layout() {
                    if !rest.starts_with('/') {
                        return Err(StoreError::invalid_line(
                            line_no,
                            format!("directory line in {} layout must be 'D /path'", format),
                        ));
                    }
                    (None, rest)
                } else {
                    let (mtime, path) = rest.split_once(' ').ok_or_else(|| {
                        StoreError::invalid_line(line_no, "directory line must be 'D <mtime> /path'")
                    })?;
                    (Some(parse_number::<i64>(mtime, "mtime", line_no)?), path)
                };
                if !path.starts_with('/') || path.len() < 2 {
                    return Err(StoreError::invalid_line(
                        line_no,
                        format!("invalid directory path '{}'", path),
                    ));
                }
                Ok(ManifestEntry::Directory {
                    path: path.to_string(),
                    mtime,
                })
            }
            other => Err(StoreError::invalid_line(
                line_no,
                format!("unknown entry tag '{}'", other),
            )),
        }
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestEntry::File {
                name,
                hash,
                mtime,
                size,
            } => write!(f, "F {} {} {} {}", hash, mtime, size, name),
            ManifestEntry::ExecutableFile {
                name,
                hash,
                mtime,
                size,
            } => write!(f, "X {} {} {} {}", hash, mtime, size, name),
            ManifestEntry::Symlink { name, hash, size } => write!(f, "S {} {} {}", hash, size, name),
            ManifestEntry::Directory {
                path,
                mtime: Some(mtime),
            } => write!(f, "D {} {}", mtime, path),
            ManifestEntry::Directory { path, mtime: None } => write!(f, "D {}", path),
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str, line_no: usize) -> Result<T> {
    // FromStr for integers accepts a leading '+', the canonical form never has one
    if value.starts_with('+') {
        return Err(StoreError::invalid_line(
            line_no,
            format!("{} '{}' is not a number", field, value),
        ));
    }
    value.parse().map_err(|_| {
        StoreError::invalid_line(line_no, format!("{} '{}' is not a number", field, value))
    })
}

fn check_name(name: &str, line_no: usize) -> Result<String> {
    if name.is_empty() || name.contains('/') {
        return Err(StoreError::invalid_line(
            line_no,
            format!("invalid entry name '{}'", name),
        ));
    }
    Ok(name.to_string())
}
