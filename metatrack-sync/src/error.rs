//! Error types for metatrack-sync.

use std::path::PathBuf;

use thiserror::Error;

use metatrack_core::{InvalidObject, StoreError};
use metatrack_gateway::{DeployResult, GatewayError};
use metatrack_scm::ScmError;

/// All errors that can arise from environment and integration workflows.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Topology or settings violation (second production, non-production
    /// before production, bad name).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("an environment named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("{0} not found")]
    NotFound(String),

    /// The environment is locked by another workflow.
    #[error("environment '{name}' is locked")]
    Locked { name: String },

    #[error("integration into '{dest}' is already pending on branch {branch}; resume or discard it first")]
    IntegrationPending { dest: String, branch: String },

    #[error("no integration pending for '{dest}'")]
    NoPendingIntegration { dest: String },

    /// The merge stopped on conflicts and was aborted.
    #[error("merge conflict in: {}", .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    /// The gateway accepted the package but the deploy job failed.
    #[error("deploy to '{org}' failed (job {}): {}", .result.job_id, .result.message)]
    DeployFailure { org: String, result: DeployResult },

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    InvalidObject(#[from] InvalidObject),

    /// Replay stopped part-way. Changes before `applied` are committed and
    /// recorded; the store is the high-water mark for a rerun.
    #[error("replay stopped after {applied} of {total} change(s) at '{change}': {source}")]
    PartialReplay {
        applied: usize,
        total: usize,
        change: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("scm error: {0}")]
    Scm(ScmError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EnvironmentNotFound { name } => {
                SyncError::NotFound(format!("environment '{name}'"))
            }
            other => SyncError::Store(other),
        }
    }
}

impl From<ScmError> for SyncError {
    fn from(err: ScmError) -> Self {
        match err {
            ScmError::MergeConflict { paths } => SyncError::MergeConflict { paths },
            other => SyncError::Scm(other),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
