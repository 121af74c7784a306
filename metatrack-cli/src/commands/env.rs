//! `metatrack env create|list|describe|lock|unlock|update|delete`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use metatrack_core::{Credentials, EnvironmentName};
use metatrack_sync::{Environment, EnvironmentSummary, SyncContext};

/// Register, inspect and remove tracked environments.
#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// Register an org, provision its branch and record its first snapshot.
    Create(CreateArgs),

    /// List every environment.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one environment.
    Describe {
        name: String,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Block snapshot, changeset and integration on an environment.
    Lock { name: String },

    /// Lift the lock set by `lock` or left by a failed deploy.
    Unlock { name: String },

    /// Change stored credentials.
    Update(UpdateArgs),

    /// Remove an environment, its branch and its working copy.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Environment name; also the branch name for non-production orgs.
    pub name: String,

    #[arg(long, short = 'u')]
    pub username: String,

    #[arg(long, short = 'p', env = "METATRACK_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Track the production org on the main branch.
    #[arg(long)]
    pub production: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub name: String,

    #[arg(long, short = 'u')]
    pub username: Option<String>,

    #[arg(long, short = 'p')]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Environment to delete (omit when using `--all`).
    pub name: Option<String>,

    /// Delete every environment, production last.
    #[arg(long, conflicts_with = "name")]
    pub all: bool,
}

#[derive(Tabled)]
struct EnvRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "objects")]
    objects: usize,
    #[tabled(rename = "state")]
    state: String,
}

pub fn run(home: &Path, cmd: EnvCommand) -> Result<()> {
    let ctx = super::context(home)?;
    match cmd {
        EnvCommand::Create(args) => create(&ctx, args),
        EnvCommand::List { json } => list(&ctx, json),
        EnvCommand::Describe { name, json } => describe(&ctx, &name, json),
        EnvCommand::Lock { name } => set_locked(&ctx, &name, true),
        EnvCommand::Unlock { name } => set_locked(&ctx, &name, false),
        EnvCommand::Update(args) => update(&ctx, args),
        EnvCommand::Delete(args) => delete(&ctx, args),
    }
}

fn load<'a>(ctx: &'a SyncContext, name: &str) -> Result<Environment<'a>> {
    Environment::load(ctx, &EnvironmentName::from(name))
        .with_context(|| format!("cannot load environment '{name}'"))
}

fn create(ctx: &SyncContext, args: CreateArgs) -> Result<()> {
    let credentials = Credentials {
        username: args.username,
        password: args.password,
    };
    let env = Environment::create(ctx, &args.name, credentials, args.production)
        .with_context(|| format!("failed to create environment '{}'", args.name))?;
    let summary = env.describe()?;
    println!(
        "✓ Created {} environment '{}' on branch '{}' ({} objects)",
        if summary.production { "production" } else { "non-production" },
        summary.name,
        summary.branch,
        summary.objects
    );
    Ok(())
}

fn list(ctx: &SyncContext, json: bool) -> Result<()> {
    let summaries = Environment::list(ctx)
        .context("failed to list environments")?
        .iter()
        .map(Environment::describe)
        .collect::<Result<Vec<_>, _>>()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).context("failed to serialize environments")?
        );
        return Ok(());
    }
    if summaries.is_empty() {
        println!("No environments registered.");
        println!("Run: metatrack env create <name> --username <u> --password <p> --production");
        return Ok(());
    }

    let rows: Vec<EnvRow> = summaries
        .into_iter()
        .map(|s| EnvRow {
            role: if s.production { "production" } else { "sandbox" }.to_string(),
            state: state_label(&s),
            name: s.name,
            branch: s.branch,
            objects: s.objects,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn state_label(summary: &EnvironmentSummary) -> String {
    match (&summary.pending_integration, summary.locked) {
        (Some(branch), _) => format!("{} ({branch})", "PENDING".yellow().bold()),
        (None, true) => "LOCKED".red().bold().to_string(),
        (None, false) => "ready".green().to_string(),
    }
}

fn describe(ctx: &SyncContext, name: &str, json: bool) -> Result<()> {
    let summary = load(ctx, name)?.describe()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to serialize environment")?
        );
        return Ok(());
    }
    println!("{}", summary.name.bold());
    println!("  username:    {}", summary.username);
    println!("  password:    {}", summary.password);
    println!("  production:  {}", summary.production);
    println!("  locked:      {}", summary.locked);
    println!("  branch:      {}", summary.branch);
    println!("  working copy: {}", summary.local_path.display());
    println!("  objects:     {}", summary.objects);
    if let Some(branch) = &summary.pending_integration {
        println!("  pending:     {branch}");
    }
    Ok(())
}

fn set_locked(ctx: &SyncContext, name: &str, locked: bool) -> Result<()> {
    let mut env = load(ctx, name)?;
    if locked {
        env.lock()?;
        println!("✓ Locked '{name}'");
    } else {
        env.unlock()?;
        println!("✓ Unlocked '{name}'");
    }
    Ok(())
}

fn update(ctx: &SyncContext, args: UpdateArgs) -> Result<()> {
    let mut env = load(ctx, &args.name)?;
    env.update_credentials(args.username.as_deref(), args.password.as_deref())
        .with_context(|| format!("failed to update '{}'", args.name))?;
    println!("✓ Updated credentials for '{}'", args.name);
    Ok(())
}

fn delete(ctx: &SyncContext, args: DeleteArgs) -> Result<()> {
    if args.all {
        // Non-production first; production can only go once it is alone.
        let mut all = Environment::list(ctx)?;
        all.sort_by_key(Environment::is_production);
        if all.is_empty() {
            println!("No environments registered.");
        }
        for env in all {
            let name = env.name().clone();
            env.remove()
                .with_context(|| format!("failed to delete environment '{name}'"))?;
            println!("✓ Deleted '{name}'");
        }
        return Ok(());
    }

    let Some(name) = args.name else {
        bail!("provide an environment name or use --all");
    };
    load(ctx, &name)?
        .remove()
        .with_context(|| format!("failed to delete environment '{name}'"))?;
    println!("✓ Deleted '{name}'");
    Ok(())
}
