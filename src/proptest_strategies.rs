//! Property-based testing strategies and helpers
//!
//! Shared proptest strategies for the manifest codec and the archive path
//! checks.

use proptest::prelude::*;
use proptest::test_runner::Config;

/// Standard proptest configuration for the pure codec properties
pub fn proptest_config() -> Config {
    Config {
        cases: 1000,
        max_shrink_iters: 10000,
        ..Config::default()
    }
}

/// Custom strategies for domain-specific types
pub mod strategies {
    use super::*;
    use crate::manifest::{ManifestEntry, ManifestFormat};

    pub fn manifest_format() -> impl Strategy<Value = ManifestFormat> {
        prop_oneof![
            Just(ManifestFormat::Sha1),
            Just(ManifestFormat::Sha1New),
            Just(ManifestFormat::Sha256New),
        ]
    }

    /// Entry names: anything but `/` and newline, spaces included
    pub fn entry_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9_.-]{1,30}",
            "[a-z]{1,5} [a-z ]{0,10}",
            "[\u{4e00}-\u{9fff}]{1,10}",
        ]
    }

    /// Directory paths such as `/a/b c`
    pub fn directory_path() -> impl Strategy<Value = String> {
        prop::collection::vec(entry_name(), 1..4)
            .prop_map(|parts| format!("/{}", parts.join("/")))
    }

    fn hex(len: usize) -> impl Strategy<Value = String> {
        prop::string::string_regex(&format!("[0-9a-f]{{{}}}", len))
            .expect("hex pattern is a valid regex")
    }

    pub fn manifest_entry(format: ManifestFormat) -> impl Strategy<Value = ManifestEntry> {
        let len = format.hex_len();
        let old_layout = !format.is_new_layout();
        prop_oneof![
            (entry_name(), hex(len), any::<i64>(), any::<u64>()).prop_map(
                |(name, hash, mtime, size)| ManifestEntry::File {
                    name,
                    hash,
                    mtime,
                    size,
                }
            ),
            (entry_name(), hex(len), 0i64..4_000_000_000, 0u64..1 << 40).prop_map(
                |(name, hash, mtime, size)| ManifestEntry::ExecutableFile {
                    name,
                    hash,
                    mtime,
                    size,
                }
            ),
            (entry_name(), hex(len), 0u64..4096)
                .prop_map(|(name, hash, size)| ManifestEntry::Symlink { name, hash, size }),
            (directory_path(), any::<i64>()).prop_map(move |(path, mtime)| {
                ManifestEntry::Directory {
                    path,
                    mtime: old_layout.then_some(mtime),
                }
            }),
        ]
    }

    /// A format together with entries valid under it
    pub fn manifest_entries() -> impl Strategy<Value = (ManifestFormat, Vec<ManifestEntry>)> {
        manifest_format().prop_flat_map(|format| {
            (
                Just(format),
                prop::collection::vec(manifest_entry(format), 0..20),
            )
        })
    }

    /// Archive entry paths that try to escape the extraction root
    pub fn malicious_path() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("../../../etc/passwd".to_string()),
            Just("/etc/passwd".to_string()),
            Just("a/../../b".to_string()),
            "[a-z]{1,5}/\\.\\./\\.\\./[a-z]{1,5}",
            "/[a-zA-Z0-9/]{1,30}",
        ]
    }

    /// Relative archive entry paths that stay inside the root
    pub fn safe_relative_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-zA-Z0-9_-]{1,20}", 1..5).prop_map(|parts| parts.join("/"))
    }
}
