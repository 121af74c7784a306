//! Integration workflow: guards and bookkeeping against the recording SCM
//! fake, and full promotions against real git with mirrored orgs.

mod common;

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use chrono::Utc;
use common::{creds, FakeScm, Workspace};
use metatrack_core::{EnvironmentName, IntegrationBranch, RenameDeploy, TrackedObject};
use metatrack_scm::ScmAdapter;
use metatrack_sync::{discard, integrate, rebase, resume, status, Environment, SyncContext, SyncError};
use rstest::rstest;

fn env(name: &str) -> EnvironmentName {
    EnvironmentName::from(name)
}

fn locked(ctx: &SyncContext, name: &str) -> bool {
    ctx.store.load_environment(&env(name)).expect("record").locked
}

fn object_names(ctx: &SyncContext, name: &str) -> Vec<String> {
    let mut names: Vec<String> = ctx
        .store
        .load_objects(&env(name))
        .expect("objects")
        .into_iter()
        .map(|o| o.full_name)
        .collect();
    names.sort();
    names
}

fn full_names(objects: &[TrackedObject]) -> Vec<String> {
    objects.iter().map(|o| o.full_name.clone()).collect()
}

fn git_out(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git").arg("-C").arg(repo).args(args).output().expect("git");
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// prod and dev orgs holding the same two classes, both environments created.
fn provision(ws: &Workspace, ctx: &SyncContext) {
    for org in ["prod", "dev"] {
        ws.put_class(org, "Invoice", "public class Invoice {}", 0);
        ws.put_class(org, "Legacy", "// retired before go-live", 0);
    }
    Environment::create(ctx, "prod", creds("admin@prod"), true).expect("prod");
    Environment::create(ctx, "dev", creds("admin@dev"), false).expect("dev");
}

// ---------------------------------------------------------------------------
// Guards (fake SCM)
// ---------------------------------------------------------------------------

fn fake_setup() -> (Workspace, Arc<FakeScm>, SyncContext) {
    let ws = Workspace::new();
    let fake = FakeScm::new();
    let ctx = ws.context(fake.clone() as Arc<dyn ScmAdapter>);
    provision(&ws, &ctx);
    (ws, fake, ctx)
}

#[test]
fn integrating_into_itself_is_rejected() {
    let (_ws, _fake, ctx) = fake_setup();
    let err = integrate(&ctx, &env("dev"), &env("dev")).err().expect("error");
    assert!(matches!(err, SyncError::Configuration(_)), "got: {err}");
}

#[test]
fn locked_source_aborts_without_side_effects() {
    let (_ws, fake, ctx) = fake_setup();
    let mut dev = Environment::load(&ctx, &env("dev")).expect("load");
    dev.lock().expect("lock");
    let calls = fake.calls().len();

    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("error");
    assert!(matches!(err, SyncError::Locked { ref name } if name == "dev"), "got: {err}");
    assert_eq!(fake.calls().len(), calls);
    assert!(!locked(&ctx, "prod"));
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
}

#[test]
fn pending_integration_blocks_a_new_one() {
    let (_ws, _fake, ctx) = fake_setup();
    let pending = IntegrationBranch {
        name: "integration/dev-into-prod-20240603090000".into(),
        source: env("dev"),
        dest: env("prod"),
        pre_merge_ref: "0".repeat(40),
        post_merge_ref: None,
        is_deployed: false,
        holds_locks: false,
        created_at: Utc::now(),
    };
    ctx.store.save_integration(&pending).expect("save");

    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("error");
    assert!(matches!(err, SyncError::IntegrationPending { .. }), "got: {err}");
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
    assert_eq!(status(&ctx, &env("prod")).unwrap(), Some(pending));
}

#[test]
fn resume_and_discard_need_a_pending_integration() {
    let (_ws, _fake, ctx) = fake_setup();
    assert!(matches!(
        resume(&ctx, &env("prod")),
        Err(SyncError::NoPendingIntegration { .. })
    ));
    assert!(matches!(
        discard(&ctx, &env("prod")),
        Err(SyncError::NoPendingIntegration { .. })
    ));
}

#[test]
fn failure_before_deploy_removes_branch_and_unlocks() {
    let (_ws, fake, ctx) = fake_setup();
    fake.fail_on("merge", 1);

    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("error");
    assert!(matches!(err, SyncError::Scm(_)), "got: {err}");
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
    assert!(fake
        .calls()
        .iter()
        .any(|c| c.starts_with("delete_branch integration/dev-into-prod-") && c.ends_with("Both")));
}

#[test]
fn lock_dropped_after_promotion_failure_is_not_reclaimed() {
    let (_ws, fake, ctx) = fake_setup();
    fake.fail_on("tag", 1);

    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("error");
    assert!(matches!(err, SyncError::Scm(_)), "got: {err}");
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
    let pending = status(&ctx, &env("prod")).unwrap().expect("record kept");
    assert!(!pending.holds_locks);

    // Another workflow takes dev in the meantime.
    let mut dev = Environment::load(&ctx, &env("dev")).expect("load");
    dev.lock().expect("lock");
    let calls = fake.calls().len();
    assert!(matches!(
        resume(&ctx, &env("prod")),
        Err(SyncError::Locked { ref name }) if name == "dev"
    ));
    assert!(matches!(
        discard(&ctx, &env("prod")),
        Err(SyncError::Locked { ref name }) if name == "dev"
    ));
    assert_eq!(fake.calls().len(), calls);
    assert!(locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
    assert_eq!(status(&ctx, &env("prod")).unwrap(), Some(pending.clone()));

    dev.unlock().expect("unlock");
    let outcome = resume(&ctx, &env("prod")).expect("resume");
    assert_eq!(outcome.branch, pending.name);
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

#[test]
fn discard_after_promotion_failure_relocks_then_releases() {
    let (_ws, fake, ctx) = fake_setup();
    fake.fail_on("push_tags", 1);
    integrate(&ctx, &env("dev"), &env("prod")).err().expect("error");
    assert!(!status(&ctx, &env("prod")).unwrap().expect("record kept").holds_locks);

    let dropped = discard(&ctx, &env("prod")).expect("discard");
    assert!(dropped.name.starts_with("integration/dev-into-prod-"));
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

#[test]
fn rebase_promotes_production_into_the_environment() {
    let (_ws, fake, ctx) = fake_setup();
    let outcome = rebase(&ctx, &env("dev")).expect("rebase");

    assert!(outcome.branch.starts_with("integration/prod-into-dev-"));
    assert!(outcome.tag.starts_with("deploy/dev/"));
    assert!(outcome.deleted.is_empty() && outcome.deployed.is_empty());

    let calls = fake.calls();
    let pos = |call: &str| calls.iter().position(|c| c == call).unwrap_or_else(|| panic!("missing {call}"));
    assert!(pos("fetch master") < pos("merge origin/master"));
    assert!(pos("merge origin/master") < pos(&format!("merge {}", outcome.branch)));
    assert!(pos(&format!("merge {}", outcome.branch)) < pos(&format!("tag {}", outcome.tag)));
    assert!(calls.contains(&"push_tags".to_string()));
    assert!(status(&ctx, &env("dev")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

// ---------------------------------------------------------------------------
// End to end (git)
// ---------------------------------------------------------------------------

/// dev edits Invoice, deletes Legacy and adds Report, then records it.
fn develop(ws: &Workspace, ctx: &SyncContext) {
    ws.put_class("dev", "Invoice", "public class Invoice { void pay() {} }", 10);
    ws.remove_class("dev", "Legacy");
    ws.put_class("dev", "Report", "public class Report { Integer rows = 42; }", 11);
    let changes = Environment::load(ctx, &env("dev"))
        .expect("load")
        .changeset()
        .expect("changeset");
    assert_eq!(changes.len(), 3);
}

#[test]
fn integration_deploys_destructive_then_additive_and_promotes() {
    require_git!();
    let ws = Workspace::new();
    let (ctx, recorder) = ws.recorded_git_context();
    provision(&ws, &ctx);
    develop(&ws, &ctx);

    let outcome = integrate(&ctx, &env("dev"), &env("prod")).expect("integrate");

    let deleted: Vec<_> = outcome.deleted.iter().map(|o| o.full_name.as_str()).collect();
    let mut deployed: Vec<_> = outcome.deployed.iter().map(|o| o.full_name.as_str()).collect();
    deployed.sort();
    assert_eq!(deleted, vec!["Legacy"]);
    assert_eq!(deployed, vec!["Invoice", "Report"]);
    assert_eq!(
        recorder.deploys(),
        vec![("prod".to_string(), true), ("prod".to_string(), false)]
    );

    assert_eq!(
        ws.org_file("prod", "classes/Invoice.cls").as_deref(),
        Some("public class Invoice { void pay() {} }")
    );
    assert!(ws.org_file("prod", "classes/Legacy.cls").is_none());
    assert!(ws.org_file("prod", "classes/Report.cls-meta.xml").is_some());
    assert_eq!(object_names(&ctx, "prod"), vec!["Invoice", "Report"]);

    let wc = ws.working_copy("prod");
    assert_eq!(git_out(&wc, &["rev-parse", "--abbrev-ref", "HEAD"]), "master");
    assert!(wc.join("classes/Report.cls").is_file());
    assert!(!wc.join("classes/Legacy.cls").exists());
    assert_eq!(git_out(&wc, &["tag", "--list", "deploy/prod/*"]), outcome.tag);
    assert!(git_out(&wc, &["branch", "--list", "integration/*"]).is_empty());
    assert!(!git_out(&wc, &["ls-remote", "--heads", "origin"]).contains("integration/"));

    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

#[test]
fn merge_conflict_aborts_and_cleans_up() {
    require_git!();
    let ws = Workspace::new();
    let ctx = ws.git_context();
    provision(&ws, &ctx);

    ws.put_class("prod", "Invoice", "public class Invoice { /* hotfix */ }", 20);
    Environment::load(&ctx, &env("prod")).unwrap().changeset().expect("prod changeset");
    ws.put_class("dev", "Invoice", "public class Invoice { /* feature */ }", 21);
    Environment::load(&ctx, &env("dev")).unwrap().changeset().expect("dev changeset");

    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("conflict");
    match err {
        SyncError::MergeConflict { ref paths } => assert_eq!(paths, &vec!["classes/Invoice.cls".to_string()]),
        other => panic!("expected MergeConflict, got {other}"),
    }

    let wc = ws.working_copy("prod");
    assert_eq!(git_out(&wc, &["rev-parse", "--abbrev-ref", "HEAD"]), "master");
    assert!(git_out(&wc, &["branch", "--list", "integration/*"]).is_empty());
    assert!(git_out(&wc, &["status", "--porcelain"]).is_empty());
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

const LEDGER_BODY: &str = "    Integer total = 0;
    Integer count = 0;
    String label = 'ledger';
    Boolean open = true;
    Decimal rate = 0.5;
}
";

fn ledger_class(name: &str) -> String {
    format!("public class {name} {{\n{LEDGER_BODY}")
}

#[rstest]
#[case::delete_then_add(RenameDeploy::DeleteThenAdd, vec!["Invoice"], vec![("prod", true), ("prod", false)], vec!["Billing"])]
#[case::additive_only(RenameDeploy::AdditiveOnly, vec![], vec![("prod", false)], vec!["Billing", "Invoice"])]
fn renamed_object_deploys_per_policy(
    #[case] policy: RenameDeploy,
    #[case] deleted: Vec<&str>,
    #[case] deploys: Vec<(&str, bool)>,
    #[case] prod_objects: Vec<&str>,
) {
    require_git!();
    let ws = Workspace::new();
    let (mut ctx, recorder) = ws.recorded_git_context();
    ctx.settings.rename_deploy = policy;
    ws.put_class("prod", "Invoice", &ledger_class("Invoice"), 0);
    let invoice = ws.put_class("dev", "Invoice", &ledger_class("Invoice"), 0);
    Environment::create(&ctx, "prod", creds("admin@prod"), true).expect("prod");
    Environment::create(&ctx, "dev", creds("admin@dev"), false).expect("dev");

    ws.rename_class("dev", &invoice, "Billing", &ledger_class("Billing"), 10);
    let changes = Environment::load(&ctx, &env("dev"))
        .expect("load")
        .changeset()
        .expect("changeset");
    assert_eq!(changes.len(), 1);

    let outcome = integrate(&ctx, &env("dev"), &env("prod")).expect("integrate");
    assert_eq!(full_names(&outcome.deleted), deleted);
    assert_eq!(full_names(&outcome.deployed), vec!["Billing"]);
    let expected: Vec<(String, bool)> = deploys.into_iter().map(|(o, d)| (o.to_string(), d)).collect();
    assert_eq!(recorder.deploys(), expected);
    assert_eq!(object_names(&ctx, "prod"), prod_objects);
    assert!(ws.org_file("prod", "classes/Billing.cls").is_some());
}

#[test]
fn failed_deploy_stays_locked_until_resumed() {
    require_git!();
    let ws = Workspace::new();
    let (ctx, recorder) = ws.recorded_git_context();
    provision(&ws, &ctx);
    develop(&ws, &ctx);

    recorder.set_failing(true);
    let err = integrate(&ctx, &env("dev"), &env("prod")).err().expect("deploy failure");
    assert!(matches!(err, SyncError::DeployFailure { ref org, .. } if org == "prod"), "got: {err}");
    assert!(locked(&ctx, "dev"));
    assert!(locked(&ctx, "prod"));
    let pending = status(&ctx, &env("prod")).unwrap().expect("pending");
    assert!(!pending.is_deployed);
    assert!(pending.post_merge_ref.is_some());
    assert_eq!(
        ws.org_file("prod", "classes/Invoice.cls").as_deref(),
        Some("public class Invoice {}")
    );

    // A new integration cannot start while this one is pending.
    assert!(matches!(
        integrate(&ctx, &env("dev"), &env("prod")),
        Err(SyncError::Locked { .. })
    ));

    recorder.set_failing(false);
    let outcome = resume(&ctx, &env("prod")).expect("resume");
    assert_eq!(outcome.branch, pending.name);
    assert_eq!(
        ws.org_file("prod", "classes/Invoice.cls").as_deref(),
        Some("public class Invoice { void pay() {} }")
    );
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));
}

#[test]
fn failed_deploy_can_be_discarded() {
    require_git!();
    let ws = Workspace::new();
    let (ctx, recorder) = ws.recorded_git_context();
    provision(&ws, &ctx);
    develop(&ws, &ctx);

    recorder.set_failing(true);
    integrate(&ctx, &env("dev"), &env("prod")).err().expect("deploy failure");

    let dropped = discard(&ctx, &env("prod")).expect("discard");
    assert!(dropped.name.starts_with("integration/dev-into-prod-"));
    assert!(status(&ctx, &env("prod")).unwrap().is_none());
    assert!(!locked(&ctx, "dev"));
    assert!(!locked(&ctx, "prod"));

    let wc = ws.working_copy("prod");
    assert_eq!(git_out(&wc, &["rev-parse", "--abbrev-ref", "HEAD"]), "master");
    assert!(git_out(&wc, &["branch", "--list", "integration/*"]).is_empty());
    assert!(wc.join("classes/Legacy.cls").is_file());
    assert_eq!(
        ws.org_file("prod", "classes/Invoice.cls").as_deref(),
        Some("public class Invoice {}")
    );
}
