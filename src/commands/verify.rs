//! `implstore verify`

use clap::Args;
use std::path::PathBuf;

use super::entries::digest_from_dir_name;
use super::{CommandContext, ExitStatus};
use crate::error::Result;
use crate::manifest::ManifestDigest;
use crate::storage::{verify_tree, Store};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Digest of a store entry, or a directory to check
    pub target: String,
    /// Digest for a directory not named after its digest
    pub digest: Option<String>,
}

pub async fn run(args: VerifyArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let directory = PathBuf::from(&args.target);

    let digest = if directory.is_dir() {
        let digest = match &args.digest {
            Some(value) => value.parse::<ManifestDigest>()?,
            None => digest_from_dir_name(&directory)?,
        };
        let handle = ctx.handle.clone();
        let expected = digest.clone();
        tokio::task::spawn_blocking(move || verify_tree(&directory, &expected, &handle)).await??;
        digest
    } else {
        let digest: ManifestDigest = args.target.parse()?;
        ctx.store()?.verify(&digest, &ctx.handle).await?;
        digest
    };

    println!("{}: OK", digest);
    Ok(ExitStatus::Ok)
}
