//! `implstore manifest`

use clap::Args;
use std::path::{Path, PathBuf};

use super::entries::no_such_path;
use super::{CommandContext, ExitStatus};
use crate::error::Result;
use crate::manifest::{Manifest, ManifestFormat};

#[derive(Debug, Args)]
pub struct ManifestArgs {
    pub directory: PathBuf,
    /// sha1, sha1new or sha256new (taken from the directory name if it is a
    /// digest, otherwise the best available)
    #[arg(long)]
    pub format: Option<ManifestFormat>,
}

pub async fn run(args: ManifestArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    if !args.directory.is_dir() {
        return Err(no_such_path(&args.directory));
    }
    let format = args
        .format
        .unwrap_or_else(|| format_from_dir_name(&args.directory));

    let directory = args.directory.clone();
    let handle = ctx.handle.clone();
    let manifest =
        tokio::task::spawn_blocking(move || Manifest::generate(&directory, format, &handle))
            .await??;

    print!("{}", manifest);
    println!("{}", manifest.digest());
    Ok(ExitStatus::Ok)
}

/// `sha1=...` directories default to `sha1`, and so on.
fn format_from_dir_name(directory: &Path) -> ManifestFormat {
    std::path::absolute(directory)
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .and_then(|name| name.split_once('='))
        .and_then(|(prefix, _)| ManifestFormat::from_prefix(prefix))
        .unwrap_or(ManifestFormat::ALL[0])
}
