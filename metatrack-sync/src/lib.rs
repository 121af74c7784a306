//! # metatrack-sync
//!
//! Snapshot diffing, change replay, and the environment and integration
//! workflows.
//!
//! All workflows run against a [`SyncContext`]: the persisted [`Store`], the
//! loaded [`Settings`], the SCM adapter and the gateway connector. Call
//! [`SyncContext::open`] to build one from `<home>/.metatrack/config.yaml`,
//! or [`SyncContext::new`] to inject collaborators.

pub mod diff;
pub mod environment;
pub mod error;
pub mod integrate;
pub mod queue;

use std::path::Path;
use std::sync::Arc;

use metatrack_core::{paths, GatewaySettings, Settings, Store};
use metatrack_gateway::{GatewayConnector, MirrorConnector};
use metatrack_scm::ScmAdapter;

pub use diff::diff;
pub use environment::{DeployKind, Environment, EnvironmentSummary};
pub use error::SyncError;
pub use integrate::{discard, integrate, rebase, resume, status, IntegrationOutcome};
pub use queue::{commit_message, ChangeQueue};

/// Collaborators shared by every workflow of one invocation.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Store,
    pub settings: Settings,
    pub scm: Arc<dyn ScmAdapter>,
    pub gateways: Arc<dyn GatewayConnector>,
}

impl SyncContext {
    pub fn new(
        store: Store,
        settings: Settings,
        scm: Arc<dyn ScmAdapter>,
        gateways: Arc<dyn GatewayConnector>,
    ) -> Self {
        Self {
            store,
            settings,
            scm,
            gateways,
        }
    }

    /// Load settings under `home` and build the configured SCM backend and
    /// gateway connector.
    pub fn open(home: &Path) -> Result<Self, SyncError> {
        let settings = Settings::load_at(home)?;
        let scm = metatrack_scm::from_settings(&settings, home)?;
        let gateways: Arc<dyn GatewayConnector> = match &settings.gateway {
            GatewaySettings::Mirror { root } => Arc::new(MirrorConnector::new(
                root.clone().unwrap_or_else(|| paths::orgs_dir(home)),
                settings.metadata_types.clone(),
                &settings.companion_suffix,
            )),
        };
        Ok(Self::new(Store::at(home), settings, scm, gateways))
    }

    pub fn home(&self) -> &Path {
        self.store.home()
    }
}
