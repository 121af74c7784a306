//! The version-control contract.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ScmError};

/// Commit author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_owned(),
            email: email.to_owned(),
        }
    }
}

/// Which side of a branch deletion to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchScope {
    Local,
    Remote,
    Both,
}

impl BranchScope {
    pub fn local(self) -> bool {
        matches!(self, BranchScope::Local | BranchScope::Both)
    }

    pub fn remote(self) -> bool {
        matches!(self, BranchScope::Remote | BranchScope::Both)
    }
}

/// One path-level difference between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PathChange {
    Added { path: String },
    Modified { path: String },
    Deleted { path: String },
    Renamed { from: String, to: String },
}

impl PathChange {
    /// The path as it exists after the change (the old path for deletions).
    pub fn path(&self) -> &str {
        match self {
            PathChange::Added { path } | PathChange::Modified { path } | PathChange::Deleted { path } => {
                path
            }
            PathChange::Renamed { to, .. } => to,
        }
    }
}

/// Operations on the shared remote repository and on local working copies.
///
/// `repo` arguments are working-copy directories. Remote branches live on
/// `origin`. File operations take repository-relative paths and default to
/// plain filesystem operations; backends override them only when the SCM
/// must be told about moves explicitly.
pub trait ScmAdapter: Send + Sync {
    // -----------------------------------------------------------------------
    // Remote repository
    // -----------------------------------------------------------------------

    fn repo_exists(&self, name: &str) -> Result<bool, ScmError>;

    fn create_remote_repository(&self, name: &str) -> Result<(), ScmError>;

    fn delete_remote_repository(&self, name: &str) -> Result<(), ScmError>;

    /// Clone the remote repository `name` into `dest` (which must not exist).
    fn clone_repository(&self, name: &str, dest: &Path) -> Result<(), ScmError>;

    // -----------------------------------------------------------------------
    // Branches and history
    // -----------------------------------------------------------------------

    /// Create `branch` at `start` (or on the current, possibly unborn, HEAD
    /// when `start` is `None`) and check it out.
    fn create_branch(&self, repo: &Path, branch: &str, start: Option<&str>) -> Result<(), ScmError>;

    fn checkout(&self, repo: &Path, branch: &str) -> Result<(), ScmError>;

    fn fetch(&self, repo: &Path, branch: &str) -> Result<(), ScmError>;

    /// Fast-forward the checked-out `branch` from `origin`.
    fn pull(&self, repo: &Path, branch: &str) -> Result<(), ScmError>;

    /// Merge `rev` into the checked-out branch with a merge commit. Conflicts
    /// yield [`ScmError::MergeConflict`] and leave the merge in progress.
    fn merge(&self, repo: &Path, rev: &str, message: &str) -> Result<(), ScmError>;

    fn abort_merge(&self, repo: &Path) -> Result<(), ScmError>;

    /// Commit id of HEAD.
    fn head(&self, repo: &Path) -> Result<String, ScmError>;

    /// Path-level changes between two revisions, with rename detection.
    fn diff_paths(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<PathChange>, ScmError>;

    // -----------------------------------------------------------------------
    // Working-copy files
    // -----------------------------------------------------------------------

    fn add_file(&self, repo: &Path, rel: &str, source: &Path) -> Result<(), ScmError> {
        copy_into(repo, rel, source)
    }

    fn overwrite_file(&self, repo: &Path, rel: &str, source: &Path) -> Result<(), ScmError> {
        copy_into(repo, rel, source)
    }

    /// Remove a file. Returns whether it existed.
    fn delete_file(&self, repo: &Path, rel: &str) -> Result<bool, ScmError> {
        let path = repo.join(rel);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Move a file. Returns whether the source existed.
    fn rename_file(&self, repo: &Path, from: &str, to: &str) -> Result<bool, ScmError> {
        let src = repo.join(from);
        if !src.exists() {
            return Ok(false);
        }
        let dst = repo.join(to);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::rename(&src, &dst).map_err(|e| io_err(&src, e))?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Recording and publishing
    // -----------------------------------------------------------------------

    fn stage_all(&self, repo: &Path) -> Result<(), ScmError>;

    /// Commit the staged tree, even when it is unchanged. Returns the new
    /// commit id.
    fn commit(&self, repo: &Path, message: &str, author: &Author) -> Result<String, ScmError>;

    /// Push `branch` to `origin`, setting upstream.
    fn push(&self, repo: &Path, branch: &str) -> Result<(), ScmError>;

    fn push_tags(&self, repo: &Path) -> Result<(), ScmError>;

    /// Annotated tag on HEAD.
    fn tag(&self, repo: &Path, name: &str, message: &str) -> Result<(), ScmError>;

    /// Delete a branch locally, on `origin`, or both. Absent branches are not
    /// an error.
    fn delete_branch(&self, repo: &Path, branch: &str, scope: BranchScope) -> Result<(), ScmError>;
}

fn copy_into(repo: &Path, rel: &str, source: &Path) -> Result<(), ScmError> {
    let dst = repo.join(rel);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::copy(source, &dst).map_err(|e| io_err(source, e))?;
    Ok(())
}
