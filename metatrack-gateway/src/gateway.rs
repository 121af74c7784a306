//! The metadata gateway contract and per-type gathering.

use std::path::Path;

use serde::{Deserialize, Serialize};

use metatrack_core::{EnvironmentName, EnvironmentRecord, ObjectRecord, TrackedObject};

use crate::error::GatewayError;
use crate::manifest::Manifest;
use crate::package::DeployPackage;

/// Options passed through to a deploy job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Validate only; do not commit the deploy in the org.
    pub check_only: bool,
    /// Roll the whole job back when any component fails.
    pub rollback_on_error: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            check_only: false,
            rollback_on_error: true,
        }
    }
}

/// Outcome of a deploy job as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub job_id: String,
    pub success: bool,
    pub message: String,
}

/// A connection to one org's metadata API.
///
/// Implementations perform blocking I/O; timeouts and retries are theirs to
/// handle.
pub trait MetadataGateway {
    /// The metadata types to track. Static configuration, never discovered.
    fn list_types(&self) -> Vec<String>;

    /// Raw listing records for one metadata type.
    fn list_objects(&self, object_type: &str) -> Result<Vec<ObjectRecord>, GatewayError>;

    /// Fetch the files of every manifest member into `dest`, laid out by
    /// their repository paths (primary file plus companion, if any).
    fn retrieve(&self, manifest: &Manifest, dest: &Path) -> Result<(), GatewayError>;

    /// Submit a staged package and wait for the job result.
    fn deploy(
        &self,
        package: &DeployPackage,
        options: &DeployOptions,
    ) -> Result<DeployResult, GatewayError>;
}

/// Builds a gateway for an environment's credentials.
pub trait GatewayConnector: Send + Sync {
    fn connect(
        &self,
        environment: &EnvironmentRecord,
    ) -> Result<Box<dyn MetadataGateway>, GatewayError>;
}

/// List every configured type and convert the records into tracked objects.
///
/// A type whose listing fails is logged and skipped; so is a record that
/// cannot be tracked. Neither aborts the gather.
pub fn gather(gateway: &dyn MetadataGateway, environment: &EnvironmentName) -> Vec<TrackedObject> {
    let mut objects = Vec::new();
    for object_type in gateway.list_types() {
        tracing::info!(org = %environment, %object_type, "gathering");
        let records = match gateway.list_objects(&object_type) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(org = %environment, %object_type, error = %err, "failed to gather type; skipping");
                continue;
            }
        };
        let before = objects.len();
        for record in records {
            match record.into_tracked(environment, &object_type) {
                Ok(obj) => objects.push(obj),
                Err(err) => {
                    tracing::warn!(org = %environment, %object_type, error = %err, "skipping record");
                }
            }
        }
        tracing::debug!(org = %environment, %object_type, count = objects.len() - before, "type complete");
    }
    objects
}
