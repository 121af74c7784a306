//! Error types for metatrack-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from persisted-store and settings operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error (object snapshots).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on load, with file path and serde_yaml line context.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON parse error on load of an object snapshot.
    #[error("failed to parse snapshot {path}: {source}")]
    ParseSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.metatrack/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No environment record with this name.
    #[error("environment '{name}' not found")]
    EnvironmentNotFound { name: String },

    /// No tracked object with this id in the environment's snapshot.
    #[error("object {object_id} not found in environment '{environment}'")]
    ObjectNotFound {
        environment: String,
        object_id: String,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// A metadata record that cannot be tracked: it lacks an identity, a name or
/// a modification timestamp, or its identity is duplicated within one set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object record {}: {reason}", .object_id.as_deref().unwrap_or("<no id>"))]
pub struct InvalidObject {
    pub object_id: Option<String>,
    pub reason: String,
}

impl InvalidObject {
    pub fn new(object_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            object_id: object_id.map(str::to_owned),
            reason: reason.into(),
        }
    }
}
