//! `metatrack integrate merge|rebase|resume|discard|status`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;

use metatrack_core::{EnvironmentName, IntegrationBranch};
use metatrack_sync::{self as sync, IntegrationOutcome, SyncContext, SyncError};

#[derive(Subcommand, Debug)]
pub enum IntegrateCommand {
    /// Merge `source`'s branch into `dest`, deploy the difference to `dest`'s
    /// org and promote it.
    Merge { source: String, dest: String },

    /// Bring production's changes into `org`.
    Rebase { org: String },

    /// Finish a pending integration after fixing the destination org.
    Resume { dest: String },

    /// Drop a pending integration and unlock both environments.
    Discard { dest: String },

    /// Show the pending integration into `dest`, if any.
    Status {
        dest: String,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(home: &Path, cmd: IntegrateCommand) -> Result<()> {
    let ctx = super::context(home)?;
    match cmd {
        IntegrateCommand::Merge { source, dest } => {
            let outcome = sync::integrate(&ctx, &source.as_str().into(), &dest.as_str().into())
                .map_err(explain)
                .with_context(|| format!("integration of '{source}' into '{dest}' failed"))?;
            print_outcome(&outcome);
        }
        IntegrateCommand::Rebase { org } => {
            let outcome = sync::rebase(&ctx, &org.as_str().into())
                .map_err(explain)
                .with_context(|| format!("rebase of '{org}' failed"))?;
            print_outcome(&outcome);
        }
        IntegrateCommand::Resume { dest } => {
            let outcome = sync::resume(&ctx, &dest.as_str().into())
                .map_err(explain)
                .with_context(|| format!("resuming integration into '{dest}' failed"))?;
            print_outcome(&outcome);
        }
        IntegrateCommand::Discard { dest } => {
            let record = sync::discard(&ctx, &dest.as_str().into())
                .with_context(|| format!("discarding integration into '{dest}' failed"))?;
            println!("✓ Discarded {}", record.name);
            println!("  '{}' and '{}' are unlocked", record.source, record.dest);
        }
        IntegrateCommand::Status { dest, json } => status(&ctx, &dest.as_str().into(), json)?,
    }
    Ok(())
}

/// Attach the way forward to errors that leave an integration pending.
fn explain(err: SyncError) -> anyhow::Error {
    match &err {
        SyncError::DeployFailure { org, .. } => {
            let hint = format!(
                "fix the org, then run `metatrack integrate resume {org}` or `metatrack integrate discard {org}`"
            );
            anyhow::Error::new(err).context(hint)
        }
        SyncError::IntegrationPending { dest, .. } => {
            let hint = format!("run `metatrack integrate resume {dest}` or `metatrack integrate discard {dest}`");
            anyhow::Error::new(err).context(hint)
        }
        _ => anyhow::Error::new(err),
    }
}

fn print_outcome(outcome: &IntegrationOutcome) {
    println!("✓ Integrated via {}", outcome.branch);
    println!("  tagged {}", outcome.tag);
    if outcome.deleted.is_empty() && outcome.deployed.is_empty() {
        println!("  nothing to deploy");
        return;
    }
    for obj in &outcome.deleted {
        println!("  {} {}:{}", "-".red(), obj.object_type, obj.full_name);
    }
    for obj in &outcome.deployed {
        println!("  {} {}:{}", "+".green(), obj.object_type, obj.full_name);
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    dest: &'a str,
    pending: Option<&'a IntegrationBranch>,
}

fn status(ctx: &SyncContext, dest: &EnvironmentName, json: bool) -> Result<()> {
    let pending = sync::status(ctx, dest)?;
    if json {
        let payload = StatusJson {
            dest: &dest.0,
            pending: pending.as_ref(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize status")?
        );
        return Ok(());
    }
    match pending {
        None => println!("No integration pending for '{dest}'."),
        Some(record) => {
            println!("{} {}", "PENDING".yellow().bold(), record.name);
            println!("  source:     {}", record.source);
            println!("  started:    {}", record.created_at.to_rfc3339());
            println!("  forked at:  {}", record.pre_merge_ref);
            if let Some(tip) = &record.post_merge_ref {
                println!("  merged tip: {tip}");
            }
            println!("  deployed:   {}", record.is_deployed);
        }
    }
    Ok(())
}
