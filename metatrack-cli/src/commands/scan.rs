//! `metatrack scan snapshot|changeset|manifest <name>`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;

use metatrack_core::{Change, EnvironmentName};
use metatrack_gateway::{Manifest, ManifestRenderer};
use metatrack_sync::{Environment, SyncContext};

#[derive(Subcommand, Debug)]
pub enum ScanCommand {
    /// Replace the recorded snapshot with the org's current objects.
    Snapshot { name: String },

    /// Commit every change since the recorded snapshot, oldest first.
    Changeset { name: String },

    /// Print the package manifest for the recorded snapshot.
    Manifest { name: String },
}

pub fn run(home: &Path, cmd: ScanCommand) -> Result<()> {
    let ctx = super::context(home)?;
    match cmd {
        ScanCommand::Snapshot { name } => snapshot(&ctx, &name),
        ScanCommand::Changeset { name } => changeset(&ctx, &name),
        ScanCommand::Manifest { name } => manifest(&ctx, &name),
    }
}

fn snapshot(ctx: &SyncContext, name: &str) -> Result<()> {
    let env = Environment::load(ctx, &EnvironmentName::from(name))?;
    let objects = env
        .snapshot()
        .with_context(|| format!("snapshot of '{name}' failed"))?;
    println!("✓ '{name}' snapshot recorded ({} objects)", objects.len());
    Ok(())
}

fn changeset(ctx: &SyncContext, name: &str) -> Result<()> {
    let env = Environment::load(ctx, &EnvironmentName::from(name))?;
    let changes = env
        .changeset()
        .with_context(|| format!("changeset of '{name}' failed"))?;
    if changes.is_empty() {
        println!("✓ '{name}': nothing to do");
        return Ok(());
    }
    println!("✓ '{name}': {} change(s) committed", changes.len());
    for change in &changes {
        println!("  {}  {}", marker(change), change);
    }
    Ok(())
}

fn marker(change: &Change) -> &'static str {
    match change {
        Change::Addition { .. } => "+",
        Change::Modification { .. } => "~",
        Change::Deletion { .. } => "-",
        Change::Rename { .. } => ">",
    }
}

fn manifest(ctx: &SyncContext, name: &str) -> Result<()> {
    let name = EnvironmentName::from(name);
    Environment::load(ctx, &name)?;
    let objects = ctx
        .store
        .load_objects(&name)
        .with_context(|| format!("cannot read snapshot of '{name}'"))?;
    let xml = ManifestRenderer::new()?.render(&Manifest::from_objects(&objects))?;
    print!("{xml}");
    Ok(())
}
