//! Error types for metatrack-gateway.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while talking to a metadata gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Tera template engine error (manifest rendering).
    #[error("manifest template error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (tera context, mirror listings).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The org could not be reached or authenticated against.
    #[error("cannot connect to org '{org}': {reason}")]
    Connection { org: String, reason: String },

    /// Listing one metadata type failed. Recoverable: gathering skips the type.
    #[error("failed to list {object_type}: {reason}")]
    Listing { object_type: String, reason: String },

    /// A manifest entry does not exist in the org.
    #[error("{object_type} '{full_name}' not found in org")]
    UnknownMember {
        object_type: String,
        full_name: String,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GatewayError {
    GatewayError::Io {
        path: path.into(),
        source,
    }
}
