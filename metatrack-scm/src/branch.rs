//! Working-copy handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metatrack_core::BranchRecord;

use crate::adapter::{Author, ScmAdapter};
use crate::error::ScmError;

/// An environment's branch and the local working copy it is checked out in.
#[derive(Clone)]
pub struct Branch {
    name: String,
    local_path: PathBuf,
    scm: Arc<dyn ScmAdapter>,
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("local_path", &self.local_path)
            .finish()
    }
}

impl Branch {
    pub fn new(name: &str, local_path: impl Into<PathBuf>, scm: Arc<dyn ScmAdapter>) -> Self {
        Self {
            name: name.to_owned(),
            local_path: local_path.into(),
            scm,
        }
    }

    pub fn from_record(record: &BranchRecord, scm: Arc<dyn ScmAdapter>) -> Self {
        Self::new(&record.name, &record.local_path, scm)
    }

    pub fn record(&self) -> BranchRecord {
        BranchRecord {
            name: self.name.clone(),
            local_path: self.local_path.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.local_path
    }

    pub fn scm(&self) -> &Arc<dyn ScmAdapter> {
        &self.scm
    }

    pub fn exists_locally(&self) -> bool {
        self.local_path.join(".git").exists()
    }

    /// Clone `repository` into the working copy unless it is already there.
    pub fn ensure_cloned(&self, repository: &str) -> Result<(), ScmError> {
        if self.exists_locally() {
            return Ok(());
        }
        self.scm.clone_repository(repository, &self.local_path)
    }

    pub fn checkout(&self) -> Result<(), ScmError> {
        self.scm.checkout(&self.local_path, &self.name)
    }

    /// Check out the branch and fast-forward it from the remote.
    pub fn update(&self) -> Result<(), ScmError> {
        self.checkout()?;
        self.scm.pull(&self.local_path, &self.name)
    }

    pub fn head(&self) -> Result<String, ScmError> {
        self.scm.head(&self.local_path)
    }

    /// Stage everything and commit it.
    pub fn commit_all(&self, message: &str, author: &Author) -> Result<String, ScmError> {
        self.scm.stage_all(&self.local_path)?;
        self.scm.commit(&self.local_path, message, author)
    }

    pub fn push(&self) -> Result<(), ScmError> {
        self.scm.push(&self.local_path, &self.name)
    }

    /// Remove the working copy from disk. Tolerates absence.
    pub fn remove_working_copy(&self) -> Result<(), ScmError> {
        match std::fs::remove_dir_all(&self.local_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::error::io_err(&self.local_path, e)),
        }
    }
}
