//! `metatrack init [--repository <name>] [--main-branch <name>] [--log-file] [--force]`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use metatrack_core::{paths, Settings};

/// Write a default configuration file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name of the shared remote repository.
    #[arg(long)]
    pub repository: Option<String>,

    /// Branch that tracks the production org.
    #[arg(long)]
    pub main_branch: Option<String>,

    /// Log to ~/.metatrack/logs/metatrack.log instead of stderr.
    #[arg(long)]
    pub log_file: bool,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let config = paths::config_path(home);
        if config.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite it",
                config.display()
            );
        }

        let mut settings = Settings::default();
        if let Some(repository) = self.repository {
            settings.scm.repository = repository;
        }
        if let Some(main_branch) = self.main_branch {
            settings.scm.main_branch = main_branch;
        }
        if self.log_file {
            settings.logging.file = Some(PathBuf::from(paths::LOG_FILE));
        }
        settings
            .save_at(home)
            .with_context(|| format!("failed to write {}", config.display()))?;

        let orgs = paths::orgs_dir(home);
        std::fs::create_dir_all(&orgs)
            .with_context(|| format!("failed to create {}", orgs.display()))?;

        println!("✓ Wrote {}", config.display());
        println!("  Mirrored orgs go under {}", orgs.display());
        Ok(())
    }
}
