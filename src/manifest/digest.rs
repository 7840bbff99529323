//! Multi-algorithm identity of one implementation tree

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::manifest::format::ManifestFormat;

/// Digests of one tree under one or more manifest formats.
///
/// Two digests are equal when they share at least one format with an equal
/// hash. That relation is not transitive, so `ManifestDigest` implements
/// neither `Eq` nor `Hash`; key maps by its `Display` string instead.
#[derive(Debug, Clone, Default)]
pub struct ManifestDigest {
    hashes: BTreeMap<ManifestFormat, String>,
}

impl ManifestDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A digest holding a single format.
    pub fn with(format: ManifestFormat, hex: impl Into<String>) -> Self {
        let mut digest = Self::new();
        digest.hashes.insert(format, hex.into());
        digest
    }

    /// Attach or replace the hash for `format`, validating its hex form.
    pub fn insert(&mut self, format: ManifestFormat, hex: impl Into<String>) -> Result<()> {
        let hex = hex.into();
        if !format.algorithm().is_valid_hex(&hex) {
            return Err(StoreError::invalid_data(format!(
                "'{}' is not a valid {} digest",
                hex, format
            )));
        }
        self.hashes.insert(format, hex);
        Ok(())
    }

    /// Parse `prefix=hex` and add it to this digest.
    pub fn insert_str(&mut self, value: &str) -> Result<()> {
        let (format, hex) = split_digest(value)?;
        self.insert(format, hex)
    }

    pub fn get(&self, format: ManifestFormat) -> Option<&str> {
        self.hashes.get(&format).map(String::as_str)
    }

    /// The highest-priority format present.
    pub fn best(&self) -> Option<(ManifestFormat, &str)> {
        self.hashes
            .iter()
            .next_back()
            .map(|(format, hex)| (*format, hex.as_str()))
    }

    /// All pairs, best first.
    pub fn iter(&self) -> impl Iterator<Item = (ManifestFormat, &str)> {
        self.hashes
            .iter()
            .rev()
            .map(|(format, hex)| (*format, hex.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Directory names this digest may be stored under, best first.
    pub fn candidate_names(&self) -> Vec<String> {
        self.iter()
            .map(|(format, hex)| format!("{}={}", format.prefix(), hex))
            .collect()
    }

    /// Merge the pairs of `other` into this digest.
    pub fn extend(&mut self, other: &ManifestDigest) {
        for (format, hex) in other.iter() {
            self.hashes.insert(format, hex.to_string());
        }
    }
}

fn split_digest(value: &str) -> Result<(ManifestFormat, &str)> {
    let (prefix, hex) = value
        .split_once('=')
        .ok_or_else(|| StoreError::invalid_data(format!("'{}' is not a digest: missing '='", value)))?;
    let format = ManifestFormat::from_prefix(prefix).ok_or_else(|| {
        StoreError::invalid_data(format!("unknown digest algorithm '{}' in '{}'", prefix, value))
    })?;
    Ok((format, hex))
}

impl PartialEq for ManifestDigest {
    fn eq(&self, other: &Self) -> bool {
        self.hashes
            .iter()
            .any(|(format, hex)| other.hashes.get(format) == Some(hex))
    }
}

impl fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.best() {
            Some((format, hex)) => write!(f, "{}={}", format.prefix(), hex),
            None => f.write_str("(empty digest)"),
        }
    }
}

impl FromStr for ManifestDigest {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let mut digest = Self::new();
        digest.insert_str(s)?;
        Ok(digest)
    }
}

impl Serialize for ManifestDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ManifestDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
