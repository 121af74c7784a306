//! `~/.metatrack/config.yaml` — static configuration.
//!
//! Every section is `#[serde(default)]`; a missing file or a partial file
//! yields defaults for whatever is absent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::paths;

/// Metadata types gathered when `metadata_types` is not configured.
pub const DEFAULT_METADATA_TYPES: &[&str] = &[
    "ApexClass",
    "ApexComponent",
    "ApexPage",
    "ApexTrigger",
    "CustomObject",
    "Layout",
    "StaticResource",
    "Workflow",
];

pub const DEFAULT_COMPANION_SUFFIX: &str = "-meta.xml";

/// How a rename recorded in history is deployed to a destination org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenameDeploy {
    /// Destructively delete the old name, then additively deploy the new one.
    #[default]
    DeleteThenAdd,
    /// Deploy only the new name; the old one stays in the destination org.
    AdditiveOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScmBackend {
    #[default]
    Git,
}

/// Where the shared remote repository lives and how it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Hosting {
    /// Bare repositories on the local filesystem.
    Local {
        #[serde(default)]
        root: Option<PathBuf>,
    },
    /// GitHub (or GitHub Enterprise) REST API.
    Github {
        #[serde(default = "default_github_api")]
        api_url: String,
        owner: String,
        #[serde(default = "default_token_env")]
        token_env: String,
        #[serde(default = "default_true")]
        private: bool,
    },
}

impl Default for Hosting {
    fn default() -> Self {
        Hosting::Local { root: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmSettings {
    pub backend: ScmBackend,
    /// Name of the shared remote repository.
    pub repository: String,
    /// Branch that tracks the production org.
    pub main_branch: String,
    /// Email recorded on commits authored from org change history.
    pub author_email: String,
    pub hosting: Hosting,
}

impl Default for ScmSettings {
    fn default() -> Self {
        Self {
            backend: ScmBackend::Git,
            repository: "metadata".to_string(),
            main_branch: "master".to_string(),
            author_email: "metatrack@localhost".to_string(),
            hosting: Hosting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GatewaySettings {
    /// Orgs mirrored as directories under `root` (one directory per org,
    /// named after the environment).
    Mirror {
        #[serde(default)]
        root: Option<PathBuf>,
    },
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings::Mirror { root: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub metadata_types: Vec<String>,
    pub companion_suffix: String,
    pub rename_deploy: RenameDeploy,
    /// Parent directory of working copies; defaults to `~/.metatrack/repos`.
    pub repos_dir: Option<PathBuf>,
    pub scm: ScmSettings,
    pub gateway: GatewaySettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_types: DEFAULT_METADATA_TYPES.iter().map(|s| s.to_string()).collect(),
            companion_suffix: DEFAULT_COMPANION_SUFFIX.to_string(),
            rename_deploy: RenameDeploy::default(),
            repos_dir: None,
            scm: ScmSettings::default(),
            gateway: GatewaySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load `<home>/.metatrack/config.yaml`, falling back to defaults when the
    /// file does not exist.
    pub fn load_at(home: &Path) -> Result<Settings, StoreError> {
        let path = paths::config_path(home);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// Write settings to `<home>/.metatrack/config.yaml` (atomic).
    pub fn save_at(&self, home: &Path) -> Result<(), StoreError> {
        let path = paths::config_path(home);
        let yaml = serde_yaml::to_string(self)?;
        crate::store::write_atomic(&path, yaml.as_bytes())
    }

    /// Working copy location for an environment's branch.
    pub fn working_copy_at(&self, home: &Path, environment: &str) -> PathBuf {
        self.repos_dir
            .clone()
            .unwrap_or_else(|| paths::repos_dir(home))
            .join(environment)
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_true() -> bool {
    true
}
