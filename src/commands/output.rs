//! Shared output helpers for the command-line front-end.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::error::MismatchDetail;
use crate::utils::progress::{ProgressUnit, ProgressUpdate};

/// Print a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Line diff of the expected and actual manifest, if both are known.
///
/// Removed lines start with `-`, added lines with `+`; unchanged lines are
/// left out since manifests of large trees would drown the difference.
pub fn manifest_diff(detail: &MismatchDetail) -> Option<String> {
    let expected = detail.expected_manifest.as_deref()?;
    let actual = detail.actual_manifest.as_deref()?;

    let mut out = String::new();
    for change in TextDiff::from_lines(expected, actual).iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => continue,
        };
        out.push(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    Some(out)
}

/// One-line rendering of a progress update for stderr.
pub fn format_progress(update: &ProgressUpdate) -> String {
    let unit = match update.unit {
        ProgressUnit::Bytes => "bytes",
        ProgressUnit::Entries => "entries",
    };
    match (update.percentage(), update.total) {
        (Some(percent), Some(total)) => format!(
            "{}: {}% ({}/{} {})",
            update.task, percent, update.processed, total, unit
        ),
        _ => format!("{}: {} {}", update.task, update.processed, unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestFormat;

    #[test]
    fn test_manifest_diff_shows_only_changes() {
        let detail = MismatchDetail {
            format: ManifestFormat::Sha1New,
            expected: "a".repeat(40),
            actual: "b".repeat(40),
            expected_manifest: Some("D /a\nF 00 1 1 x\nF 11 1 1 y\n".to_string()),
            actual_manifest: Some("D /a\nF 00 1 1 x\nF 22 1 1 y\n".to_string()),
        };

        let diff = manifest_diff(&detail).unwrap();
        assert_eq!(diff, "-F 11 1 1 y\n+F 22 1 1 y\n");
    }

    #[test]
    fn test_manifest_diff_needs_both_sides() {
        let detail = MismatchDetail {
            format: ManifestFormat::Sha1New,
            expected: "a".repeat(40),
            actual: "b".repeat(40),
            expected_manifest: None,
            actual_manifest: Some("F 00 1 1 x\n".to_string()),
        };
        assert!(manifest_diff(&detail).is_none());
    }

    #[test]
    fn test_format_progress() {
        let update = ProgressUpdate {
            task: "Hashing /tmp/pkg".to_string(),
            processed: 50,
            total: Some(200),
            unit: ProgressUnit::Bytes,
        };
        assert_eq!(format_progress(&update), "Hashing /tmp/pkg: 25% (50/200 bytes)");
    }
}
