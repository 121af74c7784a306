//! Promotion of one environment's branch into another's.
//!
//! ## `integrate(source, dest)`
//!
//! 1. Both environments unlocked, nothing pending for `dest`. Lock both.
//! 2. Fast-forward `dest`'s branch.
//! 3. Fork `integration/<source>-into-<dest>-<timestamp>`; record it.
//! 4. Merge `source`'s branch; push the integration branch.
//! 5. Resolve the merged paths to objects to delete and to deploy.
//! 6. Nothing to deploy → step 8.
//! 7. Destructive deploy, then additive deploy, into `dest`'s org.
//! 8. Merge the integration branch into `dest`'s branch, tag, push.
//! 9. Refresh `dest`'s snapshot.
//! 10. Delete the integration branch and its record.
//! 11. Unlock both.
//!
//! A failed deploy in step 7 keeps the integration branch, its record and
//! both locks, so the org can be fixed and the run finished with [`resume`]
//! or abandoned with [`discard`]. Failures in steps 2–5 remove the
//! integration branch and record; every other failure only unlocks.
//!
//! The record's `holds_locks` flag says whether the pending integration still
//! owns both locks. When it does not, `resume` and `discard` take the locks
//! again like a fresh run and fail with `Locked` if another workflow has them.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use metatrack_core::{EnvironmentName, IntegrationBranch, RenameDeploy, TrackedObject};
use metatrack_scm::{BranchScope, PathChange};

use crate::environment::{DeployKind, Environment};
use crate::error::SyncError;
use crate::SyncContext;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// What an integration run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrationOutcome {
    pub branch: String,
    pub deleted: Vec<TrackedObject>,
    pub deployed: Vec<TrackedObject>,
    pub tag: String,
}

/// Objects resolved from the merged paths.
#[derive(Debug, Default, PartialEq, Eq)]
struct DeployPlan {
    deleted: Vec<TrackedObject>,
    upserted: Vec<TrackedObject>,
}

impl DeployPlan {
    fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.upserted.is_empty()
    }
}

/// Path-level change after folding companion files into their primary.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathAction {
    Upsert,
    Delete,
    Rename { from: String },
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub fn integrate(
    ctx: &SyncContext,
    source: &EnvironmentName,
    dest: &EnvironmentName,
) -> Result<IntegrationOutcome, SyncError> {
    if source == dest {
        return Err(SyncError::Configuration(format!(
            "cannot integrate '{source}' into itself"
        )));
    }
    let mut src_env = Environment::load(ctx, source)?;
    let mut dest_env = Environment::load(ctx, dest)?;

    // Step 1.
    src_env.ensure_unlocked()?;
    dest_env.ensure_unlocked()?;
    if let Some(pending) = ctx.store.load_integration(dest)? {
        return Err(SyncError::IntegrationPending {
            dest: dest.0.clone(),
            branch: pending.name,
        });
    }
    lock_both(&mut src_env, &mut dest_env)?;
    tracing::info!(%source, %dest, "integration started");

    // Steps 2–5.
    let (record, plan) = match prepare(ctx, &src_env, &dest_env) {
        Ok(prepared) => prepared,
        Err(err) => {
            tracing::error!(%source, %dest, error = %err, "integration failed before deploy");
            cleanup_integration(ctx, &dest_env);
            unlock_quietly(&mut src_env);
            unlock_quietly(&mut dest_env);
            return Err(err);
        }
    };

    finish(ctx, src_env, dest_env, record, plan)
}

/// Re-run steps 5–11 of a pending integration into `dest`.
pub fn resume(ctx: &SyncContext, dest: &EnvironmentName) -> Result<IntegrationOutcome, SyncError> {
    let mut record = pending(ctx, dest)?;
    let mut src_env = Environment::load(ctx, &record.source)?;
    let mut dest_env = Environment::load(ctx, dest)?;
    if !still_holds_locks(&record, Some(&src_env), &dest_env)? {
        src_env.ensure_unlocked()?;
        dest_env.ensure_unlocked()?;
        lock_both(&mut src_env, &mut dest_env)?;
        record.holds_locks = true;
        if let Err(err) = ctx.store.save_integration(&record) {
            release(ctx, &mut src_env, &mut dest_env, &mut record);
            return Err(err.into());
        }
    }
    tracing::info!(branch = %record.name, "resuming integration");

    let repo = dest_env.branch();
    let plan = ctx
        .scm
        .checkout(repo.path(), &record.name)
        .map_err(SyncError::from)
        .and_then(|()| plan_deploy(ctx, &record, &src_env, &dest_env));
    let plan = match plan {
        Ok(plan) => plan,
        Err(err) => {
            release(ctx, &mut src_env, &mut dest_env, &mut record);
            return Err(err);
        }
    };
    finish(ctx, src_env, dest_env, record, plan)
}

/// Drop a pending integration into `dest` and unlock both environments.
pub fn discard(ctx: &SyncContext, dest: &EnvironmentName) -> Result<IntegrationBranch, SyncError> {
    let mut record = pending(ctx, dest)?;
    let mut dest_env = Environment::load(ctx, dest)?;
    let mut src_env = match Environment::load(ctx, &record.source) {
        Ok(env) => Some(env),
        Err(err) => {
            tracing::warn!(source = %record.source, error = %err, "source environment gone; unlocking destination only");
            None
        }
    };
    if !still_holds_locks(&record, src_env.as_ref(), &dest_env)? {
        dest_env.ensure_unlocked()?;
        match src_env.as_mut() {
            Some(src) => {
                src.ensure_unlocked()?;
                lock_both(src, &mut dest_env)?;
            }
            None => dest_env.lock()?,
        }
    }

    cleanup_integration(ctx, &dest_env);
    match src_env.as_mut() {
        Some(src) => release(ctx, src, &mut dest_env, &mut record),
        None => unlock_quietly(&mut dest_env),
    }
    tracing::info!(branch = %record.name, "integration discarded");
    Ok(record)
}

/// The pending integration into `dest`, if any.
pub fn status(ctx: &SyncContext, dest: &EnvironmentName) -> Result<Option<IntegrationBranch>, SyncError> {
    Environment::load(ctx, dest)?;
    Ok(ctx.store.load_integration(dest)?)
}

/// Bring production's changes into `org`.
pub fn rebase(ctx: &SyncContext, org: &EnvironmentName) -> Result<IntegrationOutcome, SyncError> {
    let production = Environment::production(ctx)?;
    integrate(ctx, production.name(), org)
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Steps 2–5.
fn prepare(
    ctx: &SyncContext,
    src_env: &Environment<'_>,
    dest_env: &Environment<'_>,
) -> Result<(IntegrationBranch, DeployPlan), SyncError> {
    let scm = &ctx.scm;
    let dest_branch = dest_env.branch();
    let src_branch = src_env.branch();
    let repo = dest_branch.path();

    // Step 2.
    dest_branch.update()?;

    // Step 3.
    let name = format!(
        "integration/{}-into-{}-{}",
        src_env.name(),
        dest_env.name(),
        Utc::now().format(TIMESTAMP_FORMAT)
    );
    let pre_merge_ref = dest_branch.head()?;
    scm.create_branch(repo, &name, Some(dest_branch.name()))?;
    let mut record = IntegrationBranch {
        name: name.clone(),
        source: src_env.name().clone(),
        dest: dest_env.name().clone(),
        pre_merge_ref,
        post_merge_ref: None,
        is_deployed: false,
        holds_locks: true,
        created_at: Utc::now(),
    };
    ctx.store.save_integration(&record)?;

    // Step 4.
    scm.fetch(repo, src_branch.name())?;
    let message = format!("Merge {} into {name}", src_branch.name());
    if let Err(err) = scm.merge(repo, &format!("origin/{}", src_branch.name()), &message) {
        if matches!(err, metatrack_scm::ScmError::MergeConflict { .. }) {
            if let Err(abort) = scm.abort_merge(repo) {
                tracing::warn!(error = %abort, "failed to abort merge");
            }
        }
        return Err(err.into());
    }
    record.post_merge_ref = Some(dest_branch.head()?);
    ctx.store.save_integration(&record)?;
    scm.push(repo, &name)?;

    // Step 5.
    let plan = plan_deploy(ctx, &record, src_env, dest_env)?;
    Ok((record, plan))
}

/// Steps 6–11.
fn finish<'a>(
    ctx: &'a SyncContext,
    mut src_env: Environment<'a>,
    mut dest_env: Environment<'a>,
    mut record: IntegrationBranch,
    plan: DeployPlan,
) -> Result<IntegrationOutcome, SyncError> {
    // Steps 6–7. A failure here keeps the locks and the branch.
    if record.is_deployed {
        tracing::info!(branch = %record.name, "already deployed; skipping deploy");
    } else if plan.is_empty() {
        tracing::info!(branch = %record.name, "nothing to deploy");
    } else {
        deploy_plan(&dest_env, &plan)?;
        record.is_deployed = true;
        if let Err(err) = ctx.store.save_integration(&record) {
            release(ctx, &mut src_env, &mut dest_env, &mut record);
            return Err(err.into());
        }
    }

    // Steps 8–10.
    let result = promote(ctx, &dest_env, &mut record);
    // Step 11.
    release(ctx, &mut src_env, &mut dest_env, &mut record);
    let tag = result?;

    tracing::info!(branch = %record.name, %tag, "integration complete");
    Ok(IntegrationOutcome {
        branch: record.name,
        deleted: plan.deleted,
        deployed: plan.upserted,
        tag,
    })
}

/// Step 7: destructive first, then additive from the integration tree.
fn deploy_plan(dest_env: &Environment<'_>, plan: &DeployPlan) -> Result<(), SyncError> {
    let fail = |result| SyncError::DeployFailure {
        org: dest_env.name().0.clone(),
        result,
    };
    if !plan.deleted.is_empty() {
        let result = dest_env.deploy(&plan.deleted, DeployKind::Destructive)?;
        if !result.success {
            tracing::error!(org = %dest_env.name(), job_id = %result.job_id, "destructive deploy failed; integration left pending");
            return Err(fail(result));
        }
    }
    if !plan.upserted.is_empty() {
        let source_dir = dest_env.branch().path().to_path_buf();
        let result = dest_env.deploy(&plan.upserted, DeployKind::Additive { source_dir })?;
        if !result.success {
            tracing::error!(org = %dest_env.name(), job_id = %result.job_id, "additive deploy failed; integration left pending");
            return Err(fail(result));
        }
    }
    Ok(())
}

/// Steps 8–10. Returns the deploy tag.
fn promote(
    ctx: &SyncContext,
    dest_env: &Environment<'_>,
    record: &mut IntegrationBranch,
) -> Result<String, SyncError> {
    let scm = &ctx.scm;
    let dest_branch = dest_env.branch();
    let repo = dest_branch.path();

    // Step 8.
    dest_branch.checkout()?;
    scm.merge(repo, &record.name, &format!("Merge {} into {}", record.name, dest_branch.name()))?;
    let tag = format!("deploy/{}/{}", dest_env.name(), Utc::now().format(TIMESTAMP_FORMAT));
    scm.tag(repo, &tag, &format!("Deployed {} into {}", record.source, record.dest))?;
    dest_branch.push()?;
    scm.push_tags(repo)?;
    record.is_deployed = true;
    ctx.store.save_integration(record)?;

    // Step 9.
    dest_env.refresh_snapshot()?;

    // Step 10.
    scm.delete_branch(repo, &record.name, BranchScope::Both)?;
    ctx.store.delete_integration(&record.dest)?;
    Ok(tag)
}

/// Step 5: map merged paths to objects.
fn plan_deploy(
    ctx: &SyncContext,
    record: &IntegrationBranch,
    src_env: &Environment<'_>,
    dest_env: &Environment<'_>,
) -> Result<DeployPlan, SyncError> {
    let repo = dest_env.branch();
    let tip = match &record.post_merge_ref {
        Some(tip) => tip.clone(),
        None => repo.head()?,
    };
    let changes = ctx.scm.diff_paths(repo.path(), &record.pre_merge_ref, &tip)?;
    let actions = fold_companions(&changes, &ctx.settings.companion_suffix);

    let store = &ctx.store;
    let resolve = |path: &str, first: &EnvironmentName, second: &EnvironmentName| -> Result<Option<TrackedObject>, SyncError> {
        if let Some(obj) = store.find_object_by_path(first, path)? {
            return Ok(Some(obj));
        }
        Ok(store.find_object_by_path(second, path)?)
    };
    let (src, dest) = (src_env.name(), dest_env.name());

    let mut plan = DeployPlan::default();
    for (path, action) in actions {
        match action {
            PathAction::Upsert => match resolve(&path, src, dest)? {
                Some(obj) => push_unique(&mut plan.upserted, obj),
                None => tracing::warn!(%path, "no tracked object for changed path; skipping"),
            },
            PathAction::Delete => match resolve(&path, dest, src)? {
                Some(obj) => push_unique(&mut plan.deleted, obj),
                None => tracing::warn!(%path, "no tracked object for deleted path; skipping"),
            },
            PathAction::Rename { from } => {
                if ctx.settings.rename_deploy == RenameDeploy::DeleteThenAdd {
                    match resolve(&from, dest, src)? {
                        Some(old) => push_unique(&mut plan.deleted, old),
                        None => tracing::warn!(path = %from, "no tracked object for renamed-from path; skipping"),
                    }
                }
                match resolve(&path, src, dest)? {
                    Some(new) => push_unique(&mut plan.upserted, new),
                    None => tracing::warn!(%path, "no tracked object for renamed path; skipping"),
                }
            }
        }
    }
    tracing::info!(
        branch = %record.name,
        deleted = plan.deleted.len(),
        deployed = plan.upserted.len(),
        "deploy plan"
    );
    Ok(plan)
}

/// Key path changes by primary path. A companion change stands for an upsert
/// of its primary unless the primary itself changed.
fn fold_companions(changes: &[PathChange], suffix: &str) -> BTreeMap<String, PathAction> {
    let primary = |p: &str| p.strip_suffix(suffix).unwrap_or(p).to_owned();
    let mut direct: BTreeMap<String, PathAction> = BTreeMap::new();
    let mut via_companion: BTreeMap<String, PathAction> = BTreeMap::new();

    for change in changes {
        let (path, action) = match change {
            PathChange::Added { path } | PathChange::Modified { path } => (path, PathAction::Upsert),
            PathChange::Deleted { path } => (path, PathAction::Delete),
            PathChange::Renamed { from, to } => (
                to,
                PathAction::Rename {
                    from: primary(from),
                },
            ),
        };
        let is_companion = !suffix.is_empty() && path.ends_with(suffix);
        if is_companion {
            via_companion.insert(primary(path), action);
        } else {
            direct.insert(path.clone(), action);
        }
    }

    for (path, action) in via_companion {
        direct.entry(path).or_insert(match action {
            PathAction::Delete => PathAction::Upsert,
            other => other,
        });
    }
    direct
}

fn push_unique(list: &mut Vec<TrackedObject>, obj: TrackedObject) {
    let taken = list
        .iter()
        .any(|o| o.object_type == obj.object_type && o.full_name == obj.full_name);
    if !taken {
        list.push(obj);
    }
}

fn pending(ctx: &SyncContext, dest: &EnvironmentName) -> Result<IntegrationBranch, SyncError> {
    ctx.store
        .load_integration(dest)?
        .ok_or_else(|| SyncError::NoPendingIntegration { dest: dest.0.clone() })
}

/// Best-effort removal of the integration branch (local and remote) and its
/// record. Leaves `dest`'s working copy on its own branch.
fn cleanup_integration(ctx: &SyncContext, dest_env: &Environment<'_>) {
    let Ok(Some(record)) = ctx.store.load_integration(dest_env.name()) else {
        return;
    };
    let branch = dest_env.branch();
    if branch.exists_locally() {
        if let Err(e) = branch.checkout() {
            tracing::warn!(error = %e, "failed to check out destination branch");
        }
        if let Err(e) = ctx.scm.delete_branch(branch.path(), &record.name, BranchScope::Both) {
            tracing::warn!(branch = %record.name, error = %e, "failed to delete integration branch");
        }
    }
    if let Err(e) = ctx.store.delete_integration(dest_env.name()) {
        tracing::warn!(error = %e, "failed to delete integration record");
    }
}

/// Whether the pending `record` still owns the locks it took. A lock lifted
/// by hand since then counts as released.
fn still_holds_locks(
    record: &IntegrationBranch,
    src_env: Option<&Environment<'_>>,
    dest_env: &Environment<'_>,
) -> Result<bool, SyncError> {
    if !record.holds_locks || !dest_env.is_locked()? {
        return Ok(false);
    }
    match src_env {
        Some(src) => src.is_locked(),
        None => Ok(true),
    }
}

/// Lock `src_env` then `dest_env`; a failure leaves neither locked.
fn lock_both<'a>(src_env: &mut Environment<'a>, dest_env: &mut Environment<'a>) -> Result<(), SyncError> {
    src_env.lock()?;
    if let Err(err) = dest_env.lock() {
        unlock_quietly(src_env);
        return Err(err);
    }
    Ok(())
}

/// Step 11. Unlocks both environments; a record still on disk is marked as
/// no longer holding them.
fn release<'a>(
    ctx: &SyncContext,
    src_env: &mut Environment<'a>,
    dest_env: &mut Environment<'a>,
    record: &mut IntegrationBranch,
) {
    for env in [src_env, dest_env] {
        unlock_quietly(env);
    }
    record.holds_locks = false;
    match ctx.store.load_integration(&record.dest) {
        Ok(Some(stored)) if stored.name == record.name => {
            if let Err(e) = ctx.store.save_integration(record) {
                tracing::warn!(branch = %record.name, error = %e, "failed to record lock release");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(branch = %record.name, error = %e, "failed to read integration record"),
    }
}

fn unlock_quietly(env: &mut Environment<'_>) {
    if let Err(e) = env.unlock() {
        tracing::warn!(org = %env.name(), error = %e, "failed to unlock");
    }
}
