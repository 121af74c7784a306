//! Environment aggregate: one tracked org, its working-copy branch and its
//! recorded snapshot.
//!
//! States: uninitialized → active (unlocked) ⇄ active (locked). The lock is a
//! persisted flag checked at the `snapshot`, `changeset` and integration entry
//! points.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use metatrack_core::{
    BranchRecord, Change, ChangeKind, Credentials, EnvironmentName, EnvironmentRecord,
    TrackedObject,
};
use metatrack_gateway::{
    gather, DeployOptions, DeployPackage, DeployResult, Manifest, ManifestRenderer,
    MetadataGateway,
};
use metatrack_scm::{Author, Branch, BranchScope};

use crate::diff::diff;
use crate::error::{io_err, SyncError};
use crate::queue::{ChangeQueue, DEFAULT_AUTHOR};
use crate::SyncContext;

pub const INITIAL_COMMIT_MESSAGE: &str = "Initial push of production metadata";

const MASKED_PASSWORD: &str = "********";

/// How [`Environment::deploy`] packages its objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployKind {
    /// Delete the objects from the org.
    Destructive,
    /// Deploy the objects' files found under `source_dir`.
    Additive { source_dir: PathBuf },
}

/// Printable description of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentSummary {
    pub name: String,
    pub username: String,
    pub password: String,
    pub production: bool,
    pub locked: bool,
    pub branch: String,
    pub local_path: PathBuf,
    pub objects: usize,
    pub pending_integration: Option<String>,
}

/// Which provisioning steps of `create` completed, for rollback.
#[derive(Debug, Default)]
struct Provisioning {
    created_repository: bool,
    pushed_branch: bool,
}

pub struct Environment<'a> {
    ctx: &'a SyncContext,
    record: EnvironmentRecord,
}

impl<'a> Environment<'a> {
    // -----------------------------------------------------------------------
    // 1. Loading
    // -----------------------------------------------------------------------

    pub fn load(ctx: &'a SyncContext, name: &EnvironmentName) -> Result<Self, SyncError> {
        let record = ctx.store.load_environment(name)?;
        Ok(Self { ctx, record })
    }

    pub fn list(ctx: &'a SyncContext) -> Result<Vec<Self>, SyncError> {
        Ok(ctx
            .store
            .list_environments()?
            .into_iter()
            .map(|record| Self { ctx, record })
            .collect())
    }

    pub fn production(ctx: &'a SyncContext) -> Result<Self, SyncError> {
        let record = ctx
            .store
            .production()?
            .ok_or_else(|| SyncError::NotFound("production environment".into()))?;
        Ok(Self { ctx, record })
    }

    pub fn record(&self) -> &EnvironmentRecord {
        &self.record
    }

    pub fn name(&self) -> &EnvironmentName {
        &self.record.name
    }

    pub fn is_production(&self) -> bool {
        self.record.production
    }

    pub fn branch(&self) -> Branch {
        Branch::from_record(&self.record.branch, self.ctx.scm.clone())
    }

    fn gateway(&self) -> Result<Box<dyn MetadataGateway>, SyncError> {
        Ok(self.ctx.gateways.connect(&self.record)?)
    }

    // -----------------------------------------------------------------------
    // 2. Creation
    // -----------------------------------------------------------------------

    /// Register an org, provision its branch and record its first snapshot.
    ///
    /// Any provisioning failure rolls back what was created (best effort) and
    /// returns the original error.
    pub fn create(
        ctx: &'a SyncContext,
        name: &str,
        credentials: Credentials,
        production: bool,
    ) -> Result<Self, SyncError> {
        validate_name(name)?;
        let name = EnvironmentName::from(name);
        if ctx.store.find_environment(&name)?.is_some() {
            return Err(SyncError::DuplicateName { name: name.0 });
        }
        match (production, ctx.store.production()?) {
            (true, Some(existing)) => {
                return Err(SyncError::Configuration(format!(
                    "production environment '{}' already exists",
                    existing.name
                )))
            }
            (false, None) => {
                return Err(SyncError::Configuration(
                    "a production environment must be created first".into(),
                ))
            }
            _ => {}
        }

        let local_path = ctx.settings.working_copy_at(ctx.home(), &name.0);
        if local_path.exists() {
            return Err(SyncError::Configuration(format!(
                "working copy {} already exists",
                local_path.display()
            )));
        }
        let branch_name = if production {
            ctx.settings.scm.main_branch.clone()
        } else {
            name.0.clone()
        };

        let now = Utc::now();
        let record = EnvironmentRecord {
            name: name.clone(),
            credentials,
            production,
            locked: false,
            branch: BranchRecord {
                name: branch_name,
                local_path,
            },
            created_at: now,
            updated_at: now,
        };
        ctx.store.save_environment(&record)?;

        let env = Self { ctx, record };
        let mut progress = Provisioning::default();
        match env.provision(&mut progress) {
            Ok(()) => {
                tracing::info!(org = %name, production, "environment created");
                Ok(env)
            }
            Err(err) => {
                tracing::error!(org = %name, error = %err, "provisioning failed; rolling back");
                env.rollback(&progress);
                Err(err)
            }
        }
    }

    fn provision(&self, progress: &mut Provisioning) -> Result<(), SyncError> {
        let scm = &self.ctx.scm;
        let repository = &self.ctx.settings.scm.repository;
        let branch = self.branch();

        if self.record.production {
            if !scm.repo_exists(repository)? {
                scm.create_remote_repository(repository)?;
                progress.created_repository = true;
            }
            branch.ensure_cloned(repository)?;
            scm.create_branch(branch.path(), branch.name(), None)?;

            let objects = self.refresh_snapshot()?;
            if !objects.is_empty() {
                self.gateway()?
                    .retrieve(&Manifest::from_objects(&objects), branch.path())?;
            }
            let author = Author::new(DEFAULT_AUTHOR, &self.ctx.settings.scm.author_email);
            branch.commit_all(INITIAL_COMMIT_MESSAGE, &author)?;
            progress.pushed_branch = true;
            branch.push()?;
        } else {
            branch.ensure_cloned(repository)?;
            let start = format!("origin/{}", self.ctx.settings.scm.main_branch);
            scm.create_branch(branch.path(), branch.name(), Some(&start))?;
            progress.pushed_branch = true;
            branch.push()?;
            self.refresh_snapshot()?;
        }
        Ok(())
    }

    fn rollback(&self, progress: &Provisioning) {
        let scm = &self.ctx.scm;
        let branch = self.branch();
        let name = self.name();

        if progress.pushed_branch && !self.record.production && branch.exists_locally() {
            if let Err(e) = scm.delete_branch(branch.path(), branch.name(), BranchScope::Remote) {
                tracing::warn!(org = %name, error = %e, "rollback: failed to delete remote branch");
            }
        }
        if progress.created_repository {
            if let Err(e) = scm.delete_remote_repository(&self.ctx.settings.scm.repository) {
                tracing::warn!(org = %name, error = %e, "rollback: failed to delete remote repository");
            }
        }
        if let Err(e) = branch.remove_working_copy() {
            tracing::warn!(org = %name, error = %e, "rollback: failed to remove working copy");
        }
        if let Err(e) = self.ctx.store.delete_objects(name) {
            tracing::warn!(org = %name, error = %e, "rollback: failed to delete objects");
        }
        if let Err(e) = self.ctx.store.delete_environment(name) {
            tracing::warn!(org = %name, error = %e, "rollback: failed to delete environment record");
        }
    }

    // -----------------------------------------------------------------------
    // 3. Locking
    // -----------------------------------------------------------------------

    pub fn is_locked(&self) -> Result<bool, SyncError> {
        Ok(self.ctx.store.load_environment(self.name())?.locked)
    }

    pub fn lock(&mut self) -> Result<(), SyncError> {
        self.record = self.ctx.store.set_locked(&self.record.name, true)?;
        tracing::debug!(org = %self.record.name, "locked");
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<(), SyncError> {
        self.record = self.ctx.store.set_locked(&self.record.name, false)?;
        tracing::debug!(org = %self.record.name, "unlocked");
        Ok(())
    }

    /// Fail with `Locked` when the persisted flag is set.
    ///
    /// Reading and later setting the flag is not atomic: two invocations can
    /// both pass this check before either locks.
    pub(crate) fn ensure_unlocked(&self) -> Result<(), SyncError> {
        if self.is_locked()? {
            return Err(SyncError::Locked {
                name: self.record.name.0.clone(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 4. Snapshot and changeset
    // -----------------------------------------------------------------------

    /// Gather the org's objects and replace the stored snapshot with them.
    pub fn snapshot(&self) -> Result<Vec<TrackedObject>, SyncError> {
        self.ensure_unlocked()?;
        self.refresh_snapshot()
    }

    /// Snapshot without the lock check, for workflows that hold the lock.
    pub(crate) fn refresh_snapshot(&self) -> Result<Vec<TrackedObject>, SyncError> {
        let gateway = self.gateway()?;
        let objects = gather(gateway.as_ref(), self.name());
        self.ctx.store.replace_objects(self.name(), objects.clone())?;
        tracing::info!(org = %self.name(), count = objects.len(), "snapshot recorded");
        Ok(objects)
    }

    /// Diff the org against the stored snapshot and replay the changes into
    /// the branch, one commit per change.
    pub fn changeset(&self) -> Result<Vec<Change>, SyncError> {
        self.ensure_unlocked()?;
        let gateway = self.gateway()?;
        let current = gather(gateway.as_ref(), self.name());
        let stored = self.ctx.store.load_objects(self.name())?;
        let changes = diff(&stored, &current)?;
        if changes.is_empty() {
            tracing::info!(org = %self.name(), "no changes");
            return Ok(changes);
        }

        let branch = self.branch();
        branch.checkout()?;

        // Removed when dropped, on every exit path.
        let scratch = tempfile::Builder::new()
            .prefix("metatrack-retrieve-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let manifest = Manifest::from_objects(
            changes
                .iter()
                .filter(|c| c.kind() != ChangeKind::Deletion)
                .map(Change::object),
        );
        if !manifest.is_empty() {
            gateway.retrieve(&manifest, scratch.path())?;
        }

        let settings = &self.ctx.settings;
        ChangeQueue::new(
            &self.ctx.store,
            self.name(),
            &branch,
            scratch.path(),
            &settings.companion_suffix,
            &settings.scm.author_email,
        )
        .replay(&changes)?;

        self.ctx.store.replace_objects(self.name(), current)?;
        branch.push()?;
        tracing::info!(org = %self.name(), count = changes.len(), "changeset applied");
        Ok(changes)
    }

    // -----------------------------------------------------------------------
    // 5. Deploy
    // -----------------------------------------------------------------------

    /// Stage a package for `objects` and submit it. The job result is returned
    /// as reported; a failed job is not an error here.
    pub fn deploy(
        &self,
        objects: &[TrackedObject],
        kind: DeployKind,
    ) -> Result<DeployResult, SyncError> {
        let renderer = ManifestRenderer::new()?;
        let scratch = tempfile::Builder::new()
            .prefix("metatrack-deploy-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let package = match &kind {
            DeployKind::Destructive => {
                DeployPackage::stage_destructive(scratch.path(), &renderer, objects)?
            }
            DeployKind::Additive { source_dir } => DeployPackage::stage_additive(
                scratch.path(),
                &renderer,
                source_dir,
                objects,
                &self.ctx.settings.companion_suffix,
            )?,
        };
        let result = self.gateway()?.deploy(&package, &DeployOptions::default())?;
        tracing::info!(
            org = %self.name(),
            destructive = package.is_destructive(),
            members = package.manifest().len(),
            job_id = %result.job_id,
            success = result.success,
            "deploy finished"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // 6. Removal and maintenance
    // -----------------------------------------------------------------------

    /// Delete everything recorded for this environment. Production can only
    /// be removed once it is the last environment.
    pub fn remove(self) -> Result<(), SyncError> {
        if self.record.production {
            let others: Vec<String> = self
                .ctx
                .store
                .list_environments()?
                .into_iter()
                .filter(|e| !e.production)
                .map(|e| e.name.0)
                .collect();
            if !others.is_empty() {
                return Err(SyncError::Configuration(format!(
                    "remove non-production environments first: {}",
                    others.join(", ")
                )));
            }
        }

        let name = self.name().clone();
        self.ctx.store.delete_objects(&name)?;
        self.ctx.store.delete_integration(&name)?;
        let branch = self.branch();
        if !self.record.production {
            self.delete_remote_branch(&branch)?;
        }
        branch.remove_working_copy()?;
        self.ctx.store.delete_environment(&name)?;
        tracing::info!(org = %name, "environment removed");
        Ok(())
    }

    /// Delete the branch on the remote. Without a working copy the push goes
    /// through a throwaway clone.
    fn delete_remote_branch(&self, branch: &Branch) -> Result<(), SyncError> {
        let scm = &self.ctx.scm;
        if branch.exists_locally() {
            scm.delete_branch(branch.path(), branch.name(), BranchScope::Remote)?;
            return Ok(());
        }
        let scratch = tempfile::Builder::new()
            .prefix("metatrack-remove-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let clone = scratch.path().join("repo");
        scm.clone_repository(&self.ctx.settings.scm.repository, &clone)?;
        scm.delete_branch(&clone, branch.name(), BranchScope::Remote)?;
        tracing::debug!(org = %self.name(), "remote branch deleted via temporary clone");
        Ok(())
    }

    pub fn describe(&self) -> Result<EnvironmentSummary, SyncError> {
        let store = &self.ctx.store;
        let record = store.load_environment(self.name())?;
        Ok(EnvironmentSummary {
            name: record.name.0.clone(),
            username: record.credentials.username.clone(),
            password: MASKED_PASSWORD.to_string(),
            production: record.production,
            locked: record.locked,
            branch: record.branch.name.clone(),
            local_path: record.branch.local_path.clone(),
            objects: store.load_objects(self.name())?.len(),
            pending_integration: store.load_integration(self.name())?.map(|i| i.name),
        })
    }

    /// Replace the stored username and/or password.
    pub fn update_credentials(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), SyncError> {
        if username.is_none() && password.is_none() {
            return Err(SyncError::Configuration("nothing to update".into()));
        }
        let mut record = self.ctx.store.load_environment(self.name())?;
        if let Some(username) = username {
            record.credentials.username = username.to_owned();
        }
        if let Some(password) = password {
            record.credentials.password = password.to_owned();
        }
        record.updated_at = Utc::now();
        self.ctx.store.save_environment(&record)?;
        self.record = record;
        tracing::info!(org = %self.name(), "credentials updated");
        Ok(())
    }
}

/// Names become branch names and file names.
fn validate_name(name: &str) -> Result<(), SyncError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(SyncError::Configuration(format!(
            "invalid environment name '{name}': use letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}
