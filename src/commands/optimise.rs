//! `implstore optimise`

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use super::{CommandContext, ExitStatus};
use crate::error::Result;
use crate::storage::{DirectoryStore, Store};

#[derive(Debug, Args)]
pub struct OptimiseArgs {
    /// Cache directories to optimise instead of the configured stores
    pub caches: Vec<PathBuf>,
}

pub async fn run(args: OptimiseArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let saved = if args.caches.is_empty() {
        ctx.store()?.optimise(&ctx.handle).await?
    } else {
        let mut saved = 0;
        for cache in &args.caches {
            let store = DirectoryStore::new(cache)?;
            saved += store.optimise(&ctx.handle).await?;
        }
        saved
    };

    info!(bytes = saved, "Optimise finished");
    println!("Saved {} bytes", saved);
    Ok(ExitStatus::Ok)
}
