//! Error types for metatrack-scm.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScmError {
    /// The SCM executable could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// A merge stopped on conflicts. The working copy is left mid-merge.
    #[error("merge conflict in {} path(s): {}", .paths.len(), .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    /// Working-copy file operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hosting API request failed.
    #[error("hosting API error: {0}")]
    Hosting(String),

    /// The hosting API token variable is not set.
    #[error("environment variable {var} is not set; it must hold the hosting API token")]
    MissingToken { var: String },

    /// SCM output could not be understood.
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ScmError {
    ScmError::Io {
        path: path.into(),
        source,
    }
}
