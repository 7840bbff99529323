//! Manifest format generations and their hash algorithms

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// Hash function backing a manifest format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Length of a lowercase hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
        }
    }

    pub fn hash_bytes(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha1 => format!("{:x}", Sha1::digest(data)),
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        }
    }

    /// Hash a stream with an 8KB buffer, reporting each chunk's length.
    pub fn hash_reader<R: Read>(
        self,
        reader: R,
        on_chunk: impl FnMut(u64),
    ) -> std::io::Result<String> {
        match self {
            HashAlgorithm::Sha1 => digest_reader::<Sha1, R>(reader, on_chunk),
            HashAlgorithm::Sha256 => digest_reader::<Sha256, R>(reader, on_chunk),
        }
    }

    /// Whether `value` is a well-formed lowercase hex digest for this algorithm.
    pub fn is_valid_hex(self, value: &str) -> bool {
        value.len() == self.hex_len()
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

fn digest_reader<D: Digest, R: Read>(
    mut reader: R,
    mut on_chunk: impl FnMut(u64),
) -> std::io::Result<String>
where
    sha2::digest::Output<D>: fmt::LowerHex,
{
    const BUFFER_SIZE: usize = 8 * 1024;

    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        on_chunk(bytes_read as u64);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Serialization generation of a manifest.
///
/// Variants are declared lowest priority first, so the derived `Ord` is the
/// "best format" order: `Sha1 < Sha1New < Sha256New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManifestFormat {
    /// Old layout: one sorted listing per level, directory lines carry mtimes.
    Sha1,
    /// New layout hashed with SHA-1.
    Sha1New,
    /// New layout hashed with SHA-256.
    Sha256New,
}

impl ManifestFormat {
    /// All formats, best first.
    pub const ALL: [ManifestFormat; 3] = [
        ManifestFormat::Sha256New,
        ManifestFormat::Sha1New,
        ManifestFormat::Sha1,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            ManifestFormat::Sha1 => "sha1",
            ManifestFormat::Sha1New => "sha1new",
            ManifestFormat::Sha256New => "sha256new",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.prefix() == prefix)
    }

    pub fn algorithm(self) -> HashAlgorithm {
        match self {
            ManifestFormat::Sha1 | ManifestFormat::Sha1New => HashAlgorithm::Sha1,
            ManifestFormat::Sha256New => HashAlgorithm::Sha256,
        }
    }

    /// New layout: files before subdirectories, `D` lines without mtime.
    pub fn is_new_layout(self) -> bool {
        !matches!(self, ManifestFormat::Sha1)
    }

    pub fn hex_len(self) -> usize {
        self.algorithm().hex_len()
    }

    pub fn hash_bytes(self, data: &[u8]) -> String {
        self.algorithm().hash_bytes(data)
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for ManifestFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_prefix(s)
            .ok_or_else(|| StoreError::invalid_data(format!("unknown manifest format '{}'", s)))
    }
}

impl Serialize for ManifestFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.prefix())
    }
}

impl<'de> Deserialize<'de> for ManifestFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let prefix = String::deserialize(deserializer)?;
        prefix.parse().map_err(serde::de::Error::custom)
    }
}
