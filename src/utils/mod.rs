//! Shared helpers: task handles, progress throttling, filesystem and path checks

pub mod cancellation;
pub mod fs;
pub mod path_security;
pub mod progress;

pub use cancellation::{ProgressCallback, TaskHandle};
pub use progress::{ProgressTracker, ProgressUnit, ProgressUpdate};
