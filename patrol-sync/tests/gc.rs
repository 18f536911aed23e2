//! Collector behavior: closed-item reclamation, retention pruning,
//! orphan worktree sweeps, and stale base-clone removal.

mod support;

use std::time::{Duration, SystemTime};

use chrono::Utc;
use patrol_core::store;
use patrol_core::types::{ItemKey, RepoSlug, ReviewVersion};
use patrol_sync::{run_gc, CycleOptions, CycleOutcome};
use support::{candidate, Harness};

fn key(s: &str) -> ItemKey {
    ItemKey::parse(s).unwrap()
}

async fn run_cycle(harness: &Harness) {
    match harness.orchestrator.run_cycle(CycleOptions::default()).await.unwrap() {
        CycleOutcome::Completed(_) => {}
        CycleOutcome::AlreadyRunning => panic!("cycle unexpectedly rejected"),
    }
}

async fn collect(harness: &Harness) -> patrol_sync::GcReport {
    let settings = harness.settings();
    run_gc(
        harness.home.path(),
        harness.host.as_ref(),
        harness.workspaces.as_ref(),
        &harness.ledger,
        &settings,
    )
    .await
}

#[tokio::test]
async fn closed_item_loses_ledger_entry_and_worktree() {
    let harness = Harness::new(&["acme/widgets"]);
    let k = key("acme/widgets#42");
    harness.host.upsert(candidate("acme/widgets#42", "octocat", "abc1234"));
    run_cycle(&harness).await;
    assert!(harness.ledger_revision(&k).await.is_some());

    // Simulate a crash that left an isolation directory behind.
    harness.workspaces.make_worktree(&k);

    harness.host.close(&k);
    let report = collect(&harness).await;

    assert_eq!(report.closed_reclaimed, vec![k.clone()]);
    assert_eq!(harness.ledger_revision(&k).await, None);
    assert!(!harness.workspaces.worktree_exists(&k));

    // Stored reviews survive reclamation; operators delete them explicitly.
    assert!(!store::list_versions_at(harness.home.path(), &k).unwrap().is_empty());

    // A second pass finds nothing.
    let again = collect(&harness).await;
    assert!(again.closed_reclaimed.is_empty());
}

#[tokio::test]
async fn retention_keeps_only_the_newest_versions() {
    let harness = Harness::new(&["acme/widgets"]);
    let k = key("acme/widgets#42");
    for (rev, age) in [("aaa1111", 30i64), ("bbb2222", 20), ("ccc3333", 10)] {
        store::append_version_at(
            harness.home.path(),
            &k,
            &ReviewVersion {
                created_at: Utc::now() - chrono::Duration::minutes(age),
                revision: rev.to_string(),
                ok: true,
                body: format!("review of {rev}"),
            },
        )
        .unwrap();
    }

    // Retention limit is 2 and three versions exist.
    let mut settings = harness.settings();
    settings.retention = 2;
    patrol_core::settings::save_at(harness.home.path(), &settings).unwrap();

    let report = collect(&harness).await;
    assert_eq!(report.versions_pruned, 1);

    let versions = store::list_versions_at(harness.home.path(), &k).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].revision, "ccc3333");
    assert_eq!(versions[1].revision, "bbb2222");
}

#[tokio::test]
async fn orphan_worktrees_are_swept() {
    let harness = Harness::new(&["acme/widgets"]);
    let tracked = key("acme/widgets#1");
    let orphan = key("acme/widgets#2");
    harness.host.upsert(candidate("acme/widgets#1", "octocat", "aaa1111"));
    run_cycle(&harness).await;

    harness.workspaces.make_worktree(&tracked);
    harness.workspaces.make_worktree(&orphan);

    let report = collect(&harness).await;

    assert_eq!(report.orphans_swept, vec![orphan.clone()]);
    assert!(harness.workspaces.worktree_exists(&tracked));
    assert!(!harness.workspaces.worktree_exists(&orphan));
}

#[tokio::test]
async fn stale_clone_without_ledger_entries_is_removed() {
    let harness = Harness::new(&["acme/widgets"]);
    let live = RepoSlug::parse("acme/widgets").unwrap();
    let dead = RepoSlug::parse("beta/abandoned").unwrap();
    harness.host.upsert(candidate("acme/widgets#1", "octocat", "aaa1111"));
    run_cycle(&harness).await;

    let long_ago = SystemTime::now() - Duration::from_secs(90 * 24 * 60 * 60);
    harness.workspaces.set_clone_age(&live, long_ago);
    harness.workspaces.set_clone_age(&dead, long_ago);

    let report = collect(&harness).await;

    assert_eq!(report.stale_clones_removed, vec![dead]);
}

#[tokio::test]
async fn fresh_clone_is_kept_even_without_ledger_entries() {
    let harness = Harness::new(&[]);
    let fresh = RepoSlug::parse("beta/active").unwrap();
    harness.workspaces.set_clone_age(&fresh, SystemTime::now());

    let report = collect(&harness).await;
    assert!(report.stale_clones_removed.is_empty());
}

#[tokio::test]
async fn unreachable_item_keeps_its_ledger_entry() {
    let harness = Harness::new(&["acme/widgets"]);
    let k = key("acme/widgets#42");
    {
        let mut ledger = harness.ledger.lock().await;
        ledger.set(k.clone(), "abc1234");
    }

    // The host has never heard of the item (query failure); the entry
    // must survive rather than be reclaimed on bad data.
    let report = collect(&harness).await;
    assert!(report.closed_reclaimed.is_empty());
    assert_eq!(harness.ledger_revision(&k).await.as_deref(), Some("abc1234"));
}
