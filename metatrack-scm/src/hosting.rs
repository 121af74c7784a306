//! Remote repository hosting.
//!
//! The git backend only needs three things from a host: whether a repository
//! exists, how to create and delete one, and the URL to clone it from.

use std::fmt;
use std::path::{Path, PathBuf};

use metatrack_core::{paths, Hosting, ScmSettings};
use serde_json::json;

use crate::error::{io_err, ScmError};
use crate::git;

pub trait RemoteHosting: Send + Sync + fmt::Debug {
    fn exists(&self, name: &str) -> Result<bool, ScmError>;
    fn create(&self, name: &str) -> Result<(), ScmError>;
    fn delete(&self, name: &str) -> Result<(), ScmError>;
    fn clone_url(&self, name: &str) -> String;
}

pub fn from_settings(scm: &ScmSettings, home: &Path) -> Result<Box<dyn RemoteHosting>, ScmError> {
    Ok(match &scm.hosting {
        Hosting::Local { root } => Box::new(LocalHosting::new(
            root.clone().unwrap_or_else(|| paths::remotes_dir(home)),
            &scm.main_branch,
        )),
        Hosting::Github {
            api_url,
            owner,
            token_env,
            private,
        } => Box::new(GithubHosting::new(api_url, owner, token_env, *private)),
    })
}

// ---------------------------------------------------------------------------
// Local bare repositories
// ---------------------------------------------------------------------------

/// Bare repositories at `<root>/<name>.git`.
#[derive(Debug, Clone)]
pub struct LocalHosting {
    root: PathBuf,
    main_branch: String,
}

impl LocalHosting {
    pub fn new(root: impl Into<PathBuf>, main_branch: &str) -> Self {
        Self {
            root: root.into(),
            main_branch: main_branch.to_owned(),
        }
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.git"))
    }
}

impl RemoteHosting for LocalHosting {
    fn exists(&self, name: &str) -> Result<bool, ScmError> {
        Ok(self.repo_path(name).join("HEAD").is_file())
    }

    fn create(&self, name: &str) -> Result<(), ScmError> {
        let path = self.repo_path(name);
        std::fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        git::run(&path, &["init", "--bare", "--quiet"])?;
        // Clones of the bare repository check out the main branch.
        let head = format!("refs/heads/{}", self.main_branch);
        git::run(&path, &["symbolic-ref", "HEAD", &head])?;
        tracing::info!(path = %path.display(), "created bare repository");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), ScmError> {
        let path = self.repo_path(name);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn clone_url(&self, name: &str) -> String {
        self.repo_path(name).to_string_lossy().into_owned()
    }
}

// ---------------------------------------------------------------------------
// GitHub REST API
// ---------------------------------------------------------------------------

/// Repositories under a GitHub organization. The token is read from
/// `token_env` at request time; pushes authenticate through the user's git
/// credential helper.
pub struct GithubHosting {
    api_url: String,
    owner: String,
    token_env: String,
    private: bool,
    agent: ureq::Agent,
}

impl fmt::Debug for GithubHosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubHosting")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("token_env", &self.token_env)
            .finish()
    }
}

impl GithubHosting {
    pub fn new(api_url: &str, owner: &str, token_env: &str, private: bool) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
            token_env: token_env.to_owned(),
            private,
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }

    fn token(&self) -> Result<String, ScmError> {
        std::env::var(&self.token_env).map_err(|_| ScmError::MissingToken {
            var: self.token_env.clone(),
        })
    }

    fn request(&self, method: &str, path: &str) -> Result<ureq::Request, ScmError> {
        let token = self.token()?;
        Ok(self
            .agent
            .request(method, &format!("{}{path}", self.api_url))
            .set("Authorization", &format!("Bearer {token}"))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", "metatrack"))
    }

    /// Web host for clone URLs: `api.github.com` → `github.com`,
    /// `https://ghe.example.com/api/v3` → `ghe.example.com`.
    fn web_base(&self) -> String {
        if self.api_url == "https://api.github.com" {
            return "https://github.com".to_string();
        }
        self.api_url
            .strip_suffix("/api/v3")
            .unwrap_or(&self.api_url)
            .to_string()
    }
}

impl RemoteHosting for GithubHosting {
    fn exists(&self, name: &str) -> Result<bool, ScmError> {
        match self.request("GET", &format!("/repos/{}/{name}", self.owner))?.call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(ScmError::Hosting(e.to_string())),
        }
    }

    fn create(&self, name: &str) -> Result<(), ScmError> {
        self.request("POST", &format!("/orgs/{}/repos", self.owner))?
            .send_json(json!({ "name": name, "private": self.private }))
            .map_err(|e| ScmError::Hosting(e.to_string()))?;
        tracing::info!(owner = %self.owner, %name, "created GitHub repository");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), ScmError> {
        match self
            .request("DELETE", &format!("/repos/{}/{name}", self.owner))?
            .call()
        {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(e) => Err(ScmError::Hosting(e.to_string())),
        }
    }

    fn clone_url(&self, name: &str) -> String {
        format!("{}/{}/{name}.git", self.web_base(), self.owner)
    }
}
