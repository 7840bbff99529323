//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level so a single run can be made
//! more verbose without touching the config file.

use tracing_subscriber::EnvFilter;

use crate::error::{Result, StoreError};

/// Install the global subscriber. Logs go to stderr; stdout is reserved for
/// command output such as manifests and digest lists.
pub fn init(level: &str, json: bool) -> Result<()> {
    let filter = build_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| StoreError::Config(format!("failed to initialize logging: {}", e)))
}

/// Install a subscriber that writes through the test harness.
/// Repeated calls are harmless.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| StoreError::Config(format!("invalid RUST_LOG: {}", e))),
        _ => EnvFilter::try_new(format!("implstore={level},warn"))
            .map_err(|e| StoreError::Config(format!("invalid log level '{}': {}", level, e))),
    }
}
