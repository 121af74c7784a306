//! `git` executable backend.
//!
//! Every command runs as `git -C <dir> ...` with the configured identity
//! passed through `-c user.name/-c user.email`, so working copies do not
//! depend on a global git config.

use std::path::Path;
use std::process::Command;

use crate::adapter::{Author, BranchScope, PathChange, ScmAdapter};
use crate::error::{io_err, ScmError};
use crate::hosting::RemoteHosting;

#[derive(Debug)]
pub struct GitScm {
    hosting: Box<dyn RemoteHosting>,
    identity: Author,
}

impl GitScm {
    pub fn new(hosting: Box<dyn RemoteHosting>, identity: Author) -> Self {
        Self { hosting, identity }
    }

    fn git(&self, repo: &Path, args: &[&str]) -> Result<String, ScmError> {
        let name = format!("user.name={}", self.identity.name);
        let email = format!("user.email={}", self.identity.email);
        let mut full: Vec<&str> = vec!["-c", &name, "-c", &email];
        full.extend_from_slice(args);
        run(repo, &full)
    }

    fn is_unborn(&self, repo: &Path) -> bool {
        run(repo, &["rev-parse", "--verify", "--quiet", "HEAD"]).is_err()
    }

    fn conflicted_paths(&self, repo: &Path) -> Result<Vec<String>, ScmError> {
        let out = self.git(repo, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out.lines().map(str::to_owned).collect())
    }
}

/// Run `git -C <dir> <args>` and return trimmed stdout.
pub(crate) fn run(dir: &Path, args: &[&str]) -> Result<String, ScmError> {
    let command = format!("git {}", args.join(" "));
    tracing::debug!(dir = %dir.display(), %command, "running");
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|source| ScmError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(ScmError::Command {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

/// Parse `git diff --name-status -z` output.
pub(crate) fn parse_name_status(raw: &str) -> Result<Vec<PathChange>, ScmError> {
    let mut tokens = raw.split('\0').filter(|t| !t.is_empty());
    let mut out = Vec::new();
    let missing = |status: &str| ScmError::Parse {
        command: "git diff --name-status".into(),
        detail: format!("status {status} without a path"),
    };
    while let Some(status) = tokens.next() {
        let code = status.chars().next().unwrap_or(' ');
        match code {
            'R' | 'C' => {
                let from = tokens.next().ok_or_else(|| missing(status))?.to_owned();
                let to = tokens.next().ok_or_else(|| missing(status))?.to_owned();
                if code == 'R' {
                    out.push(PathChange::Renamed { from, to });
                } else {
                    out.push(PathChange::Added { path: to });
                }
            }
            'A' => out.push(PathChange::Added {
                path: tokens.next().ok_or_else(|| missing(status))?.to_owned(),
            }),
            'D' => out.push(PathChange::Deleted {
                path: tokens.next().ok_or_else(|| missing(status))?.to_owned(),
            }),
            'M' | 'T' => out.push(PathChange::Modified {
                path: tokens.next().ok_or_else(|| missing(status))?.to_owned(),
            }),
            _ => {
                return Err(ScmError::Parse {
                    command: "git diff --name-status".into(),
                    detail: format!("unknown status {status:?}"),
                })
            }
        }
    }
    Ok(out)
}

impl ScmAdapter for GitScm {
    fn repo_exists(&self, name: &str) -> Result<bool, ScmError> {
        self.hosting.exists(name)
    }

    fn create_remote_repository(&self, name: &str) -> Result<(), ScmError> {
        self.hosting.create(name)
    }

    fn delete_remote_repository(&self, name: &str) -> Result<(), ScmError> {
        self.hosting.delete(name)
    }

    fn clone_repository(&self, name: &str, dest: &Path) -> Result<(), ScmError> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        let url = self.hosting.clone_url(name);
        let dest_str = dest.to_string_lossy();
        run(parent, &["clone", "--quiet", &url, &dest_str])?;
        tracing::info!(%url, dest = %dest.display(), "cloned");
        Ok(())
    }

    fn create_branch(&self, repo: &Path, branch: &str, start: Option<&str>) -> Result<(), ScmError> {
        match start {
            Some(start) => self.git(repo, &["checkout", "--quiet", "-B", branch, start])?,
            None if self.is_unborn(repo) => {
                let head = format!("refs/heads/{branch}");
                self.git(repo, &["symbolic-ref", "HEAD", &head])?
            }
            None => self.git(repo, &["checkout", "--quiet", "-B", branch])?,
        };
        Ok(())
    }

    fn checkout(&self, repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.git(repo, &["checkout", "--quiet", branch]).map(drop)
    }

    fn fetch(&self, repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.git(repo, &["fetch", "--quiet", "origin", branch]).map(drop)
    }

    fn pull(&self, repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.git(repo, &["pull", "--quiet", "--ff-only", "origin", branch])
            .map(drop)
    }

    fn merge(&self, repo: &Path, rev: &str, message: &str) -> Result<(), ScmError> {
        match self.git(repo, &["merge", "--no-ff", "--no-edit", "-m", message, rev]) {
            Ok(_) => Ok(()),
            Err(err) => {
                let paths = self.conflicted_paths(repo)?;
                if paths.is_empty() {
                    Err(err)
                } else {
                    Err(ScmError::MergeConflict { paths })
                }
            }
        }
    }

    fn abort_merge(&self, repo: &Path) -> Result<(), ScmError> {
        self.git(repo, &["merge", "--abort"]).map(drop)
    }

    fn head(&self, repo: &Path) -> Result<String, ScmError> {
        run(repo, &["rev-parse", "HEAD"])
    }

    fn diff_paths(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<PathChange>, ScmError> {
        let raw = run(repo, &["diff", "--name-status", "-z", "-M", from, to])?;
        parse_name_status(&raw)
    }

    fn rename_file(&self, repo: &Path, from: &str, to: &str) -> Result<bool, ScmError> {
        if !repo.join(from).exists() {
            return Ok(false);
        }
        if let Some(parent) = repo.join(to).parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        // Untracked files cannot be `git mv`ed; fall back to a plain move.
        if self.git(repo, &["mv", "-f", from, to]).is_err() {
            std::fs::rename(repo.join(from), repo.join(to)).map_err(|e| io_err(repo.join(from), e))?;
        }
        Ok(true)
    }

    fn stage_all(&self, repo: &Path) -> Result<(), ScmError> {
        self.git(repo, &["add", "--all"]).map(drop)
    }

    fn commit(&self, repo: &Path, message: &str, author: &Author) -> Result<String, ScmError> {
        let author = format!("{} <{}>", author.name, author.email);
        self.git(
            repo,
            &["commit", "--quiet", "--allow-empty", "--author", &author, "-m", message],
        )?;
        self.head(repo)
    }

    fn push(&self, repo: &Path, branch: &str) -> Result<(), ScmError> {
        self.git(repo, &["push", "--quiet", "--set-upstream", "origin", branch])
            .map(drop)
    }

    fn push_tags(&self, repo: &Path) -> Result<(), ScmError> {
        self.git(repo, &["push", "--quiet", "origin", "--tags"]).map(drop)
    }

    fn tag(&self, repo: &Path, name: &str, message: &str) -> Result<(), ScmError> {
        self.git(repo, &["tag", "-a", name, "-m", message]).map(drop)
    }

    fn delete_branch(&self, repo: &Path, branch: &str, scope: BranchScope) -> Result<(), ScmError> {
        if scope.local() {
            match self.git(repo, &["branch", "-D", branch]) {
                Ok(_) => {}
                Err(ScmError::Command { stderr, .. }) if stderr.contains("not found") => {
                    tracing::debug!(%branch, "local branch already absent");
                }
                Err(e) => return Err(e),
            }
        }
        if scope.remote() {
            match self.git(repo, &["push", "--quiet", "origin", "--delete", branch]) {
                Ok(_) => {}
                Err(ScmError::Command { stderr, .. }) if stderr.contains("remote ref does not exist") => {
                    tracing::debug!(%branch, "remote branch already absent");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
