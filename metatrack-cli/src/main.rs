//! metatrack: org metadata history and promotion CLI.
//!
//! # Usage
//!
//! ```text
//! metatrack init
//! metatrack env create <name> --username <u> --password <p> [--production]
//! metatrack env list [--json]
//! metatrack env describe <name> [--json]
//! metatrack env lock|unlock <name>
//! metatrack env update <name> [--username <u>] [--password <p>]
//! metatrack env delete <name> | --all
//! metatrack scan snapshot|changeset <name>
//! metatrack scan manifest <name>
//! metatrack integrate merge <source> <dest>
//! metatrack integrate rebase <org>
//! metatrack integrate resume|discard|status <dest>
//! ```

mod commands;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{env::EnvCommand, init::InitArgs, integrate::IntegrateCommand, scan::ScanCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "metatrack",
    version,
    about = "Track org metadata in version control and promote it between orgs",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default ~/.metatrack/config.yaml.
    Init(InitArgs),

    /// Register, inspect and remove tracked environments.
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },

    /// Record snapshots and replay changesets into version control.
    Scan {
        #[command(subcommand)]
        command: ScanCommand,
    },

    /// Promote one environment's changes into another.
    Integrate {
        #[command(subcommand)]
        command: IntegrateCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = commands::home()?;
    logging::init(&home, cli.verbose);

    match cli.command {
        Commands::Init(args) => args.run(&home),
        Commands::Env { command } => commands::env::run(&home, command),
        Commands::Scan { command } => commands::scan::run(&home, command),
        Commands::Integrate { command } => commands::integrate::run(&home, command),
    }
}
