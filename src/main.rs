//! implstore - command-line entry point
//!
//! Parses arguments, loads configuration, installs logging and runs one
//! verb. Ctrl-C cancels the running task through the shared token; the
//! store checks it between files and never after a commit.

use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use implstore::commands::output::{format_progress, manifest_diff};
use implstore::commands::{execute, load_config, Cli, CommandContext, ExitStatus};
use implstore::error::StoreError;
use implstore::infrastructure::logging;
use implstore::utils::cancellation::TaskHandle;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return report_error(e),
    };
    if let Err(e) = logging::init(&config.log_level, config.log_json) {
        eprintln!("{}", e);
    }
    debug!(version = env!("CARGO_PKG_VERSION"), "implstore starting");

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                token.cancel();
            }
        });
    }

    let mut handle = TaskHandle::with_token(token);
    if cli.verbose > 0 {
        handle = handle.with_progress(|update| eprintln!("{}", format_progress(update)));
    }
    let ctx = CommandContext::new(config, handle);

    match execute(cli.command, &ctx).await {
        Ok(status) => status.into(),
        Err(e) => report_error(e),
    }
}

fn report_error(error: StoreError) -> ExitCode {
    let status = ExitStatus::from_error(&error);
    if let Some(diff) = error.mismatch_detail().and_then(manifest_diff) {
        eprintln!("{}", diff);
    }
    eprintln!("{:?}", miette::Report::new(error));
    status.into()
}
