//! `implstore audit`

use clap::Args;
use futures::StreamExt;
use tracing::{info, warn};

use super::{CommandContext, ExitStatus};
use crate::error::Result;
use crate::manifest::ManifestDigest;
use crate::storage::{AuditProblem, Store};

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Only check these entries
    pub digests: Vec<String>,
}

pub async fn run(args: AuditArgs, ctx: &CommandContext) -> Result<ExitStatus> {
    let targets = if args.digests.is_empty() {
        None
    } else {
        Some(
            args.digests
                .iter()
                .map(|value| value.parse::<ManifestDigest>())
                .collect::<Result<Vec<_>>>()?,
        )
    };

    let store = ctx.store()?;
    let Some(mut problems) = store.audit(targets, &ctx.handle) else {
        warn!("The configured store does not support auditing");
        return Ok(ExitStatus::InvalidArguments);
    };

    let mut found = 0usize;
    while let Some(problem) = problems.next().await {
        print_problem(&problem?);
        found += 1;
    }

    if found > 0 {
        warn!(problems = found, "Audit found damaged entries");
        Ok(ExitStatus::DigestMismatch)
    } else {
        info!("Audit passed, all entries are intact");
        Ok(ExitStatus::Ok)
    }
}

fn print_problem(problem: &AuditProblem) {
    println!("{}: {}", problem.digest, problem.message);
    if let Some(path) = &problem.path {
        println!("  path:     {}", path.display());
    }
    if let (Some(expected), Some(actual)) = (&problem.expected, &problem.actual) {
        println!("  expected: {}", expected);
        println!("  actual:   {}", actual);
    }
    println!();
}
