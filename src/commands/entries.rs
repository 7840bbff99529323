//! `add`, `copy`, `find`, `list` and `remove`.

use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::output::print_json;
use super::{CommandContext, ExitStatus};
use crate::archive::ArchiveInfo;
use crate::error::{Result, StoreError};
use crate::manifest::ManifestDigest;
use crate::storage::{DirectoryStore, Store};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Digest the content must match, e.g. `sha256new=...`
    pub digest: String,
    /// Directory or archive to add
    pub source: PathBuf,
    /// Directory inside the archive to use as the root
    #[arg(long, value_name = "DIR")]
    pub sub_dir: Option<String>,
    /// Archive media type (guessed from the file name by default)
    #[arg(long, value_name = "TYPE")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Args)]
pub struct CopyArgs {
    /// Directory named after its digest, e.g. another cache's entry
    pub directory: PathBuf,
    /// Cache directory to copy into (the configured cache by default)
    pub target_cache: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    pub digest: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print digests and paths as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[arg(required = true)]
    pub digests: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ListedEntry {
    digest: ManifestDigest,
    path: PathBuf,
}

pub async fn add(args: AddArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let digest: ManifestDigest = args.digest.parse()?;
    let store = ctx.store()?;

    let path = if args.source.is_dir() {
        if args.sub_dir.is_some() || args.mime_type.is_some() {
            return Err(StoreError::invalid_data(
                "--sub-dir and --mime-type only apply to archives",
            ));
        }
        store.add_directory(&args.source, &digest, &ctx.handle).await?
    } else if args.source.is_file() {
        let mut archive = ArchiveInfo::new(&args.source);
        if let Some(mime_type) = args.mime_type {
            archive = archive.with_mime_type(mime_type);
        }
        if let Some(sub_dir) = args.sub_dir {
            archive = archive.with_sub_dir(sub_dir);
        }
        store.add_archive(&archive, &digest, &ctx.handle).await?
    } else {
        return Err(no_such_path(&args.source));
    };

    println!("{}", path.display());
    Ok(ExitStatus::Ok)
}

pub async fn copy(args: CopyArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let digest = digest_from_dir_name(&args.directory)?;

    let path = match args.target_cache {
        Some(target) => {
            let store = DirectoryStore::new(target)?
                .with_read_only_entries(ctx.config.read_only_entries);
            store.add_directory(&args.directory, &digest, &ctx.handle).await?
        }
        None => {
            ctx.store()?
                .add_directory(&args.directory, &digest, &ctx.handle)
                .await?
        }
    };

    println!("{}", path.display());
    Ok(ExitStatus::Ok)
}

pub async fn find(args: FindArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let digest: ManifestDigest = args.digest.parse()?;
    let path = ctx.store()?.get_path(&digest).await?;
    println!("{}", path.display());
    Ok(ExitStatus::Ok)
}

pub async fn list(args: ListArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let store = ctx.store()?;
    let digests = store.list_all().await?;

    if args.json {
        let mut listed = Vec::with_capacity(digests.len());
        for digest in digests {
            // An entry removed since the listing is simply left out
            if let Ok(path) = store.get_path(&digest).await {
                listed.push(ListedEntry { digest, path });
            }
        }
        print_json(&listed);
    } else {
        for digest in digests {
            println!("{}", digest);
        }
    }
    Ok(ExitStatus::Ok)
}

pub async fn remove(args: RemoveArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let digests = args
        .digests
        .iter()
        .map(|value| value.parse::<ManifestDigest>())
        .collect::<Result<Vec<_>>>()?;

    let store = ctx.store()?;
    for digest in digests {
        ctx.handle.check_cancelled()?;
        store.remove(&digest).await?;
        info!(digest = %digest, "Successfully removed");
    }
    Ok(ExitStatus::Ok)
}

/// Parse the digest a directory is named after, like a store entry.
pub(crate) fn digest_from_dir_name(directory: &Path) -> Result<ManifestDigest> {
    let absolute = std::path::absolute(directory)
        .map_err(|e| StoreError::io(e, "Failed to resolve path", Some(directory)))?;
    let name = absolute
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            StoreError::invalid_data(format!("{} has no usable name", directory.display()))
        })?;
    name.parse()
}

pub(crate) fn no_such_path(path: &Path) -> StoreError {
    StoreError::io(
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        format!("Cannot open {}", path.display()),
        Some(path),
    )
}
