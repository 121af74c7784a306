//! # metatrack-scm
//!
//! Version-control plumbing for per-environment working copies.
//!
//! - [`ScmAdapter`] — the contract the sync workflows drive
//! - [`GitScm`] — backend running the `git` executable
//! - [`hosting`] — where the shared remote repository lives (`local` bare
//!   repositories or the GitHub REST API)
//! - [`Branch`] — a working-copy handle bound to an adapter
//!
//! The backend is chosen once from settings with [`from_settings`].

pub mod adapter;
pub mod branch;
pub mod error;
pub mod git;
pub mod hosting;

use std::path::Path;
use std::sync::Arc;

use metatrack_core::{ScmBackend, Settings};

pub use adapter::{Author, BranchScope, PathChange, ScmAdapter};
pub use branch::Branch;
pub use error::ScmError;
pub use git::GitScm;
pub use hosting::{GithubHosting, LocalHosting, RemoteHosting};

/// Build the configured adapter. `home` anchors the default location of
/// local bare repositories.
pub fn from_settings(settings: &Settings, home: &Path) -> Result<Arc<dyn ScmAdapter>, ScmError> {
    let hosting = hosting::from_settings(&settings.scm, home)?;
    match settings.scm.backend {
        ScmBackend::Git => Ok(Arc::new(GitScm::new(
            hosting,
            Author::new("metatrack", &settings.scm.author_email),
        ))),
    }
}
