pub mod env;
pub mod init;
pub mod integrate;
pub mod scan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use metatrack_sync::SyncContext;

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Settings, store, SCM backend and gateway for one invocation.
pub fn context(home: &Path) -> Result<SyncContext> {
    SyncContext::open(home).context("failed to load ~/.metatrack/config.yaml")
}
