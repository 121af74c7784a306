//! metatrack core library — domain types, persisted store, settings, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, tracked objects, changes, environment records
//! - [`error`] — [`StoreError`], [`InvalidObject`]
//! - [`store`] — file-backed persisted store
//! - [`settings`] — `config.yaml` loading
//! - [`paths`] — on-disk layout under `~/.metatrack/`

pub mod error;
pub mod paths;
pub mod settings;
pub mod store;
pub mod types;

pub use error::{InvalidObject, StoreError};
pub use settings::{
    GatewaySettings, Hosting, LoggingSettings, RenameDeploy, ScmBackend, ScmSettings, Settings,
};
pub use store::Store;
pub use types::{
    BranchRecord, Change, ChangeKind, Credentials, EnvironmentName, EnvironmentRecord,
    IntegrationBranch, ObjectId, ObjectRecord, SnapshotFile, TrackedObject,
};
