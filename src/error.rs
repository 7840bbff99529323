use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::manifest::ManifestFormat;

/// Details attached to a digest mismatch so the boundary can render a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchDetail {
    /// Format whose recomputed digest disagreed.
    pub format: ManifestFormat,
    /// Hex digest that was claimed.
    pub expected: String,
    /// Hex digest that was computed.
    pub actual: String,
    /// Manifest text that was expected, when known (e.g. a stored `.manifest`).
    pub expected_manifest: Option<String>,
    /// Manifest text that was actually generated.
    pub actual_manifest: Option<String>,
}

/**
 * Store error type - miette diagnostics for user-facing failures
 *
 * Every variant carries the offending digest or path so a report can point
 * at the exact entry.
 */
#[derive(Error, Debug, Diagnostic)]
pub enum StoreError {
    #[error("digest mismatch for {target}: expected {}={}, got {}={}", .detail.format, .detail.expected, .detail.format, .detail.actual)]
    #[diagnostic(
        code(store::digest_mismatch),
        help("The content is corrupted, was tampered with, or does not belong to this digest")
    )]
    DigestMismatch {
        target: String,
        detail: Box<MismatchDetail>,
    },

    #[error("implementation {digest} not found in store")]
    #[diagnostic(code(store::implementation_not_found))]
    ImplementationNotFound { digest: String },

    #[error("implementation {digest} is already in the store at {} with different content", .path.display())]
    #[diagnostic(
        code(store::implementation_already_in_store),
        help("Run `implstore verify` on the existing entry and remove it if it is damaged")
    )]
    ImplementationAlreadyInStore { digest: String, path: PathBuf },

    #[error("not supported: {0}")]
    #[diagnostic(code(store::not_supported))]
    NotSupported(String),

    #[error("invalid data format: {message}")]
    #[diagnostic(
        code(store::invalid_data_format),
        help("Check that the input is a well-formed manifest or digest string")
    )]
    InvalidDataFormat { message: String, line: Option<usize> },

    #[error("IO error: {message}")]
    #[diagnostic(code(store::io_error))]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("access denied: {message}")]
    #[diagnostic(
        code(store::access_denied),
        help("Check the permissions of the cache directory")
    )]
    AccessDenied { message: String, path: Option<PathBuf> },

    #[error("operation canceled by user")]
    #[diagnostic(code(store::user_canceled))]
    UserCanceled,

    #[error("configuration error: {0}")]
    #[diagnostic(code(store::config_error))]
    Config(String),
}

impl StoreError {
    /**
     * Wrap a filesystem error, mapping permission failures to `AccessDenied`
     */
    pub fn io(source: std::io::Error, message: impl Into<String>, path: Option<&Path>) -> Self {
        let message = message.into();
        let path = path.map(Path::to_path_buf);
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            StoreError::AccessDenied {
                message: format!("{}: {}", message, source),
                path,
            }
        } else {
            StoreError::Io {
                message: format!("{}: {}", message, source),
                path,
                source,
            }
        }
    }

    pub fn digest_mismatch(target: impl Into<String>, detail: MismatchDetail) -> Self {
        StoreError::DigestMismatch {
            target: target.into(),
            detail: Box::new(detail),
        }
    }

    pub fn not_found(digest: impl ToString) -> Self {
        StoreError::ImplementationNotFound {
            digest: digest.to_string(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        StoreError::InvalidDataFormat {
            message: message.into(),
            line: None,
        }
    }

    pub fn invalid_line(line: usize, message: impl Into<String>) -> Self {
        StoreError::InvalidDataFormat {
            message: format!("line {}: {}", line, message.into()),
            line: Some(line),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        StoreError::NotSupported(message.into())
    }

    pub fn access_denied(message: impl Into<String>, path: Option<&Path>) -> Self {
        StoreError::AccessDenied {
            message: message.into(),
            path: path.map(Path::to_path_buf),
        }
    }

    /// The mismatch details, if this is a `DigestMismatch`.
    pub fn mismatch_detail(&self) -> Option<&MismatchDetail> {
        match self {
            StoreError::DigestMismatch { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::ImplementationNotFound { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, StoreError::UserCanceled)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(source: std::io::Error) -> Self {
        StoreError::io(source, "filesystem operation failed", None)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            StoreError::UserCanceled
        } else {
            StoreError::Io {
                message: format!("background task failed: {}", err),
                path: None,
                source: std::io::Error::other(err.to_string()),
            }
        }
    }
}

/**
 * Unified result type for store operations
 */
pub type Result<T> = std::result::Result<T, StoreError>;
