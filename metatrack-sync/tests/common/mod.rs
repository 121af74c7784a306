//! Shared fixtures: a mirrored-org workspace under a temporary home, a
//! recording SCM fake, and a git-backed context for end-to-end runs.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use metatrack_core::{paths, Credentials, EnvironmentRecord, ObjectRecord, Settings, Store};
use metatrack_gateway::{
    DeployOptions, DeployPackage, DeployResult, GatewayConnector, GatewayError, Manifest,
    MetadataGateway, MirrorConnector, MirrorGateway,
};
use metatrack_scm::{Author, BranchScope, GitScm, LocalHosting, PathChange, ScmAdapter, ScmError};
use metatrack_sync::SyncContext;
use tempfile::TempDir;

pub const TYPES: &[&str] = &["ApexClass", "ApexPage"];

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[macro_export]
macro_rules! require_git {
    () => {
        if !common::git_available() {
            eprintln!("git not installed; skipping");
            return;
        }
    };
}

pub fn creds(user: &str) -> Credentials {
    Credentials {
        username: user.into(),
        password: "hunter2".into(),
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, minute, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Temporary home with mirrored orgs under `<home>/.metatrack/orgs/<name>`.
pub struct Workspace {
    pub home: TempDir,
    pub settings: Settings,
}

impl Workspace {
    pub fn new() -> Self {
        let home = TempDir::new().expect("home");
        let settings = Settings {
            metadata_types: TYPES.iter().map(|t| t.to_string()).collect(),
            ..Settings::default()
        };
        Self { home, settings }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn connector(&self) -> Arc<dyn GatewayConnector> {
        Arc::new(MirrorConnector::new(
            paths::orgs_dir(self.home()),
            self.settings.metadata_types.clone(),
            &self.settings.companion_suffix,
        ))
    }

    pub fn context(&self, scm: Arc<dyn ScmAdapter>) -> SyncContext {
        SyncContext::new(
            Store::at(self.home()),
            self.settings.clone(),
            scm,
            self.connector(),
        )
    }

    /// Context backed by real git and local bare repositories.
    pub fn git_context(&self) -> SyncContext {
        let scm: Arc<dyn ScmAdapter> = Arc::new(GitScm::new(
            Box::new(LocalHosting::new(paths::remotes_dir(self.home()), "master")),
            Author::new("metatrack", "metatrack@localhost"),
        ));
        self.context(scm)
    }

    /// The mirrored org for `name`, created empty when absent.
    pub fn org(&self, name: &str) -> MirrorGateway {
        let root = paths::orgs_dir(self.home()).join(name);
        fs::create_dir_all(&root).expect("org dir");
        MirrorGateway::new(root, self.settings.metadata_types.clone())
            .with_companion_suffix(&self.settings.companion_suffix)
    }

    /// Upsert an Apex class into `org` with a companion file.
    pub fn put_class(&self, org: &str, name: &str, body: &str, minute: u32) -> ObjectRecord {
        let file = format!("classes/{name}.cls");
        self.org(org)
            .upsert(
                ObjectRecord {
                    object_type: Some("ApexClass".into()),
                    full_name: Some(name.into()),
                    file_name: Some(file.clone()),
                    last_modified_by_name: Some("Grace Hopper".into()),
                    last_modified_date: Some(at(minute)),
                    ..ObjectRecord::default()
                },
                &[
                    (file.clone(), body.as_bytes().to_vec()),
                    (format!("{file}-meta.xml"), b"<ApexClass/>".to_vec()),
                ],
            )
            .expect("upsert")
    }

    /// Rename a class in the org: same id, new fullName and fileName.
    pub fn rename_class(&self, org: &str, old: &ObjectRecord, to: &str, body: &str, minute: u32) -> ObjectRecord {
        self.remove_class(org, old.full_name.as_deref().expect("old name"));
        let file = format!("classes/{to}.cls");
        self.org(org)
            .upsert(
                ObjectRecord {
                    full_name: Some(to.into()),
                    file_name: Some(file.clone()),
                    last_modified_date: Some(at(minute)),
                    ..old.clone()
                },
                &[
                    (file.clone(), body.as_bytes().to_vec()),
                    (format!("{file}-meta.xml"), b"<ApexClass/>".to_vec()),
                ],
            )
            .expect("upsert")
    }

    pub fn remove_class(&self, org: &str, name: &str) {
        assert!(self.org(org).remove("ApexClass", name).expect("remove"));
    }

    /// Contents of a file in the mirrored org, if present.
    pub fn org_file(&self, org: &str, rel: &str) -> Option<String> {
        fs::read_to_string(self.org(org).source_path(rel)).ok()
    }

    pub fn working_copy(&self, env: &str) -> PathBuf {
        self.settings.working_copy_at(self.home(), env)
    }
}

// ---------------------------------------------------------------------------
// Recording SCM fake
// ---------------------------------------------------------------------------

/// In-process SCM: working copies are plain directories, commits are
/// recorded messages. A failure can be injected at the Nth call of one
/// operation.
#[derive(Debug, Default)]
pub struct FakeScm {
    calls: Mutex<Vec<String>>,
    commits: Mutex<Vec<(String, String)>>,
    remote_repo: Mutex<bool>,
    fail: Mutex<Option<(String, usize)>>,
}

impl FakeScm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the `nth` (1-based) call of `op`.
    pub fn fail_on(&self, op: &str, nth: usize) {
        *self.fail.lock().unwrap() = Some((op.to_string(), nth));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `(message, author name)` per commit, oldest first.
    pub fn commits(&self) -> Vec<(String, String)> {
        self.commits.lock().unwrap().clone()
    }

    fn record(&self, op: &str, detail: &str) -> Result<(), ScmError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(format!("{op} {detail}").trim_end().to_string());
        let seen = calls.iter().filter(|c| c.split(' ').next() == Some(op)).count();
        if let Some((fail_op, nth)) = self.fail.lock().unwrap().as_ref() {
            if fail_op == op && *nth == seen {
                return Err(ScmError::Command {
                    command: format!("fake {op}"),
                    stderr: "injected failure".into(),
                });
            }
        }
        Ok(())
    }
}

impl ScmAdapter for FakeScm {
    fn repo_exists(&self, name: &str) -> Result<bool, ScmError> {
        self.record("repo_exists", name)?;
        Ok(*self.remote_repo.lock().unwrap())
    }

    fn create_remote_repository(&self, name: &str) -> Result<(), ScmError> {
        self.record("create_remote_repository", name)?;
        *self.remote_repo.lock().unwrap() = true;
        Ok(())
    }

    fn delete_remote_repository(&self, name: &str) -> Result<(), ScmError> {
        self.record("delete_remote_repository", name)?;
        *self.remote_repo.lock().unwrap() = false;
        Ok(())
    }

    fn clone_repository(&self, name: &str, dest: &Path) -> Result<(), ScmError> {
        self.record("clone_repository", name)?;
        fs::create_dir_all(dest.join(".git")).expect("fake clone");
        Ok(())
    }

    fn create_branch(&self, _repo: &Path, branch: &str, start: Option<&str>) -> Result<(), ScmError> {
        self.record("create_branch", &format!("{branch} {}", start.unwrap_or("")))
    }

    fn checkout(&self, _repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.record("checkout", branch)
    }

    fn fetch(&self, _repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.record("fetch", branch)
    }

    fn pull(&self, _repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.record("pull", branch)
    }

    fn merge(&self, _repo: &Path, rev: &str, _message: &str) -> Result<(), ScmError> {
        self.record("merge", rev)
    }

    fn abort_merge(&self, _repo: &Path) -> Result<(), ScmError> {
        self.record("abort_merge", "")
    }

    fn head(&self, _repo: &Path) -> Result<String, ScmError> {
        self.record("head", "")?;
        Ok(format!("{:040}", self.commits.lock().unwrap().len()))
    }

    fn diff_paths(&self, _repo: &Path, from: &str, to: &str) -> Result<Vec<PathChange>, ScmError> {
        self.record("diff_paths", &format!("{from} {to}"))?;
        Ok(vec![])
    }

    fn stage_all(&self, _repo: &Path) -> Result<(), ScmError> {
        self.record("stage_all", "")
    }

    fn commit(&self, _repo: &Path, message: &str, author: &Author) -> Result<String, ScmError> {
        self.record("commit", "")?;
        let mut commits = self.commits.lock().unwrap();
        commits.push((message.to_string(), author.name.clone()));
        Ok(format!("{:040}", commits.len()))
    }

    fn push(&self, _repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.record("push", branch)
    }

    fn push_tags(&self, _repo: &Path) -> Result<(), ScmError> {
        self.record("push_tags", "")
    }

    fn tag(&self, _repo: &Path, name: &str, _message: &str) -> Result<(), ScmError> {
        self.record("tag", name)
    }

    fn delete_branch(&self, _repo: &Path, branch: &str, scope: BranchScope) -> Result<(), ScmError> {
        self.record("delete_branch", &format!("{branch} {scope:?}"))
    }
}

// ---------------------------------------------------------------------------
// Deploy-recording connector
// ---------------------------------------------------------------------------

/// Wraps a connector, logging `(org, destructive)` per deploy. While
/// `failing` is set, deploys report an unsuccessful job without touching the
/// org.
#[derive(Clone)]
pub struct RecordingConnector {
    inner: Arc<dyn GatewayConnector>,
    pub deploys: Arc<Mutex<Vec<(String, bool)>>>,
    pub failing: Arc<Mutex<bool>>,
}

impl RecordingConnector {
    pub fn new(inner: Arc<dyn GatewayConnector>) -> Self {
        Self {
            inner,
            deploys: Arc::default(),
            failing: Arc::default(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn deploys(&self) -> Vec<(String, bool)> {
        self.deploys.lock().unwrap().clone()
    }
}

impl GatewayConnector for RecordingConnector {
    fn connect(&self, environment: &EnvironmentRecord) -> Result<Box<dyn MetadataGateway>, GatewayError> {
        Ok(Box::new(RecordingGateway {
            org: environment.name.0.clone(),
            inner: self.inner.connect(environment)?,
            owner: self.clone(),
        }))
    }
}

struct RecordingGateway {
    org: String,
    inner: Box<dyn MetadataGateway>,
    owner: RecordingConnector,
}

impl MetadataGateway for RecordingGateway {
    fn list_types(&self) -> Vec<String> {
        self.inner.list_types()
    }

    fn list_objects(&self, object_type: &str) -> Result<Vec<ObjectRecord>, GatewayError> {
        self.inner.list_objects(object_type)
    }

    fn retrieve(&self, manifest: &Manifest, dest: &Path) -> Result<(), GatewayError> {
        self.inner.retrieve(manifest, dest)
    }

    fn deploy(&self, package: &DeployPackage, options: &DeployOptions) -> Result<DeployResult, GatewayError> {
        self.owner
            .deploys
            .lock()
            .unwrap()
            .push((self.org.clone(), package.is_destructive()));
        if *self.owner.failing.lock().unwrap() {
            return Ok(DeployResult {
                job_id: "0Af000000000000FAIL".into(),
                success: false,
                message: "INVALID_CROSS_REFERENCE_KEY".into(),
            });
        }
        self.inner.deploy(package, options)
    }
}

impl Workspace {
    /// Git-backed context whose deploys go through a [`RecordingConnector`].
    pub fn recorded_git_context(&self) -> (SyncContext, RecordingConnector) {
        let recorder = RecordingConnector::new(self.connector());
        let mut ctx = self.git_context();
        ctx.gateways = Arc::new(recorder.clone());
        (ctx, recorder)
    }
}
