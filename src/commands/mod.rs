//! `implstore` command-line front-end
//!
//! Each verb lives in its own module with an `Args` struct and an async
//! `run` returning the process exit status. Errors are mapped to exit codes
//! in one place, [`ExitStatus::from_error`].

pub mod audit;
pub mod entries;
pub mod manifest;
pub mod optimise;
pub mod output;
pub mod verify;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::error::{Result, StoreError};
use crate::infrastructure::config::StoreConfig;
use crate::storage::CompositeStore;
use crate::utils::cancellation::TaskHandle;

#[derive(Debug, Parser)]
#[command(name = "implstore", version, about = "Manage a content-addressed implementation store")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use this cache directory instead of the configured one
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add a directory or archive to the store
    Add(entries::AddArgs),
    /// Verify every entry (or the given ones) and report problems
    Audit(audit::AuditArgs),
    /// Copy a directory named after its digest into a store
    Copy(entries::CopyArgs),
    /// Print the path of an entry
    Find(entries::FindArgs),
    /// List all entries
    List(entries::ListArgs),
    /// Print the manifest of a directory followed by its digest
    Manifest(manifest::ManifestArgs),
    /// Hard-link identical files across entries
    Optimise(optimise::OptimiseArgs),
    /// Remove entries from the store
    Remove(entries::RemoveArgs),
    /// Verify an entry or an arbitrary directory
    Verify(verify::VerifyArgs),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExitStatus {
    Ok = 0,
    UserCanceled = 1,
    InvalidArguments = 2,
    NotSupported = 3,
    IoError = 10,
    ImplementationError = 15,
    DigestMismatch = 20,
}

impl ExitStatus {
    pub fn from_error(error: &StoreError) -> Self {
        match error {
            StoreError::UserCanceled => ExitStatus::UserCanceled,
            StoreError::InvalidDataFormat { .. } | StoreError::Config(_) => {
                ExitStatus::InvalidArguments
            }
            StoreError::NotSupported(_) => ExitStatus::NotSupported,
            StoreError::Io { .. } | StoreError::AccessDenied { .. } => ExitStatus::IoError,
            StoreError::ImplementationNotFound { .. }
            | StoreError::ImplementationAlreadyInStore { .. } => ExitStatus::ImplementationError,
            StoreError::DigestMismatch { .. } => ExitStatus::DigestMismatch,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Shared state handed to every verb.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: StoreConfig,
    pub handle: TaskHandle,
}

impl CommandContext {
    pub fn new(config: StoreConfig, handle: TaskHandle) -> Self {
        Self { config, handle }
    }

    /// The user cache plus configured shared caches.
    pub fn store(&self) -> Result<CompositeStore> {
        CompositeStore::from_config(&self.config)
    }
}

/// Load the configuration with command-line overrides applied.
pub fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    match cli.verbose {
        0 => {}
        1 => config.log_level = "debug".to_string(),
        _ => config.log_level = "trace".to_string(),
    }
    Ok(config)
}

/// Run one verb.
pub async fn execute(command: Command, ctx: &CommandContext) -> Result<ExitStatus> {
    match command {
        Command::Add(args) => entries::add(args, ctx).await,
        Command::Audit(args) => audit::run(args, ctx).await,
        Command::Copy(args) => entries::copy(args, ctx).await,
        Command::Find(args) => entries::find(args, ctx).await,
        Command::List(args) => entries::list(args, ctx).await,
        Command::Manifest(args) => manifest::run(args, ctx).await,
        Command::Optimise(args) => optimise::run(args, ctx).await,
        Command::Remove(args) => entries::remove(args, ctx).await,
        Command::Verify(args) => verify::run(args, ctx).await,
    }
}
