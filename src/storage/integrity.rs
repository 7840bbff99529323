//! Integrity verification for store entries
//!
//! `verify_tree` is the single check behind add, verify and audit: it
//! regenerates the manifest of a tree under every format a digest names and
//! compares the results. `audit_stream` runs it lazily over many entries,
//! turning per-entry failures into [`AuditProblem`] records.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{MismatchDetail, Result, StoreError};
use crate::manifest::{Manifest, ManifestDigest, ManifestFormat, MANIFEST_FILE_NAME};
use crate::storage::AuditStream;
use crate::utils::cancellation::TaskHandle;

/// One damaged or missing entry found by an audit.
#[derive(Debug, Clone, Serialize)]
pub struct AuditProblem {
    /// The digest the entry is filed under.
    pub digest: ManifestDigest,
    pub path: Option<PathBuf>,
    /// `prefix=hex` that was expected, for digest mismatches.
    pub expected: Option<String>,
    /// `prefix=hex` that was computed, for digest mismatches.
    pub actual: Option<String>,
    pub message: String,
}

impl AuditProblem {
    fn from_error(digest: ManifestDigest, path: Option<PathBuf>, error: &StoreError) -> Self {
        let (expected, actual) = match error.mismatch_detail() {
            Some(detail) => (
                Some(format!("{}={}", detail.format, detail.expected)),
                Some(format!("{}={}", detail.format, detail.actual)),
            ),
            None => (None, None),
        };
        Self {
            digest,
            path,
            expected,
            actual,
            message: error.to_string(),
        }
    }
}

/// Check `tree` against every format in `digest`, best first.
///
/// Returns the manifest generated for the best format. The first
/// disagreeing format fails with `DigestMismatch` carrying the generated
/// manifest text.
pub fn verify_tree(tree: &Path, digest: &ManifestDigest, handle: &TaskHandle) -> Result<Manifest> {
    let mut best_manifest = None;
    for (format, expected) in digest.iter() {
        let manifest = Manifest::generate(tree, format, handle)?;
        let actual = manifest.calculate_digest();
        if actual != expected {
            return Err(StoreError::digest_mismatch(
                tree.display().to_string(),
                MismatchDetail {
                    format,
                    expected: expected.to_string(),
                    actual,
                    expected_manifest: stored_manifest_text(tree, format),
                    actual_manifest: Some(manifest.to_string()),
                },
            ));
        }
        debug!(path = %tree.display(), format = %format, "Digest verified");
        best_manifest.get_or_insert(manifest);
    }
    best_manifest.ok_or_else(|| StoreError::invalid_data("digest names no manifest format"))
}

/// The `.manifest` text stored in `tree`, if it is written in `format`.
fn stored_manifest_text(tree: &Path, format: ManifestFormat) -> Option<String> {
    let path = tree.join(MANIFEST_FILE_NAME);
    let text = std::fs::read_to_string(path).ok()?;
    Manifest::parse(&text, format).ok().map(|_| text)
}

/// Load the stored manifest of an entry if it still describes `digest`.
pub(crate) fn load_trusted_manifest(entry: &Path, digest: &ManifestDigest) -> Option<Manifest> {
    let (format, hex) = digest.best()?;
    let manifest = Manifest::load(&entry.join(MANIFEST_FILE_NAME), format).ok()?;
    (manifest.calculate_digest() == hex).then_some(manifest)
}

struct AuditState {
    root: PathBuf,
    queue: Option<VecDeque<ManifestDigest>>,
    handle: TaskHandle,
    finished: bool,
}

/// Lazily verify entries below `root`.
///
/// `targets` limits the audit to the given digests; by default every entry
/// is checked. Only cancellation (or failing to list the root) ends the
/// stream with an error.
pub(crate) fn audit_stream(
    root: PathBuf,
    targets: Option<Vec<ManifestDigest>>,
    handle: TaskHandle,
) -> AuditStream {
    let state = AuditState {
        root,
        queue: targets.map(VecDeque::from),
        handle,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if state.handle.is_cancelled() {
                state.finished = true;
                return Some((Err(StoreError::UserCanceled), state));
            }

            let digest = match state.queue.as_mut() {
                Some(queue) => queue.pop_front()?,
                None => {
                    let root = state.root.clone();
                    match tokio::task::spawn_blocking(move || super::directory_store::list_entries(&root)).await {
                        Ok(Ok(digests)) => {
                            state.queue = Some(digests.into());
                            continue;
                        }
                        Ok(Err(e)) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e.into()), state));
                        }
                    }
                }
            };

            match audit_entry(&state.root, &digest, &state.handle).await {
                Ok(()) => continue,
                Err((_, StoreError::UserCanceled)) => {
                    state.finished = true;
                    return Some((Err(StoreError::UserCanceled), state));
                }
                Err((path, error)) => {
                    warn!(digest = %digest, error = %error, "Audit found a problem");
                    let problem = AuditProblem::from_error(digest, path, &error);
                    return Some((Ok(problem), state));
                }
            }
        }
    })
    .boxed()
}

async fn audit_entry(
    root: &Path,
    digest: &ManifestDigest,
    handle: &TaskHandle,
) -> std::result::Result<(), (Option<PathBuf>, StoreError)> {
    let path = digest
        .candidate_names()
        .into_iter()
        .map(|name| root.join(name))
        .find(|path| path.is_dir())
        .ok_or_else(|| (None, StoreError::not_found(digest)))?;

    let tree = path.clone();
    let digest = digest.clone();
    let handle = handle.clone();
    tokio::task::spawn_blocking(move || verify_tree(&tree, &digest, &handle).map(|_| ()))
        .await
        .map_err(StoreError::from)
        .and_then(|result| result)
        .map_err(|e| (Some(path), e))
}
