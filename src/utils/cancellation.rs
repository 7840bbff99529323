//! Task handles - cancellation and progress for long-running store operations
//!
//! Every long operation (hashing a tree, extracting an archive, scanning the
//! whole cache) receives a [`TaskHandle`]. The handle wraps a tokio-util
//! [`CancellationToken`] and an optional progress callback. It is cheap to
//! clone and can be moved into `spawn_blocking` closures, where cancellation
//! is checked cooperatively between files.

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::utils::progress::{ProgressTracker, ProgressUnit, ProgressUpdate};

/// Callback invoked with throttled progress updates.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Cancellation and progress channel shared by one operation.
#[derive(Clone, Default)]
pub struct TaskHandle {
    token: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl TaskHandle {
    /// A handle with a fresh token and no progress reporting.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle bound to an existing token (e.g. one cancelled by Ctrl-C).
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            progress: None,
        }
    }

    /// Attach a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A handle whose token is cancelled together with this one, but can
    /// also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            progress: self.progress.clone(),
        }
    }

    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `UserCanceled` once cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(StoreError::UserCanceled)
        } else {
            Ok(())
        }
    }

    /// Forward an update to the callback, if any.
    pub fn report(&self, update: &ProgressUpdate) {
        if let Some(callback) = &self.progress {
            callback(update);
        }
    }

    /// Start a throttled progress tracker for a named sub-task.
    pub fn tracker(
        &self,
        task: impl Into<String>,
        total: Option<u64>,
        unit: ProgressUnit,
    ) -> ProgressTracker<'_> {
        ProgressTracker::new(self, task.into(), total, unit)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.token.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_check_cancelled() {
        let handle = TaskHandle::new();
        assert!(handle.check_cancelled().is_ok());

        handle.cancel();
        assert!(matches!(
            handle.check_cancelled(),
            Err(StoreError::UserCanceled)
        ));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = TaskHandle::new();
        let child = parent.child();

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_affect_parent() {
        let parent = TaskHandle::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_clone_shares_token() {
        let handle = TaskHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_report_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = TaskHandle::new().with_progress(move |update| {
            sink.lock().unwrap().push(update.processed);
        });

        handle.report(&ProgressUpdate {
            task: "hash".to_string(),
            processed: 42,
            total: Some(100),
            unit: ProgressUnit::Bytes,
        });

        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }
}
