//! Retention and garbage collection.
//!
//! Four sub-tasks, each independently idempotent and safe to interrupt:
//! closed-item reclamation, stale base-clone reclamation, version
//! pruning, and the orphan worktree sweep. One item's failure is logged
//! and never aborts the remaining work.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::Mutex;

use patrol_core::ledger::Ledger;
use patrol_core::settings::Settings;
use patrol_core::store;
use patrol_core::types::{ItemKey, RepoSlug};
use patrol_git::{Host, Workspaces};

/// Summary of one collector pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub closed_reclaimed: Vec<ItemKey>,
    pub stale_clones_removed: Vec<RepoSlug>,
    pub versions_pruned: usize,
    pub orphans_swept: Vec<ItemKey>,
}

/// Run one full collector pass.
pub async fn run_gc(
    home: &Path,
    host: &dyn Host,
    workspaces: &dyn Workspaces,
    ledger: &Arc<Mutex<Ledger>>,
    settings: &Settings,
) -> GcReport {
    let mut report = GcReport::default();

    reclaim_closed_items(home, host, workspaces, ledger, &mut report).await;
    reclaim_stale_clones(workspaces, ledger, settings, &mut report).await;
    prune_versions(home, settings, &mut report);
    sweep_orphan_worktrees(workspaces, ledger, &mut report).await;

    tracing::info!(
        closed = report.closed_reclaimed.len(),
        stale_clones = report.stale_clones_removed.len(),
        versions_pruned = report.versions_pruned,
        orphans = report.orphans_swept.len(),
        "collector pass completed",
    );
    report
}

/// Delete ledger entries and lingering worktrees of items that closed
/// upstream. Review versions stay until pruned or deleted explicitly.
async fn reclaim_closed_items(
    home: &Path,
    host: &dyn Host,
    workspaces: &dyn Workspaces,
    ledger: &Arc<Mutex<Ledger>>,
    report: &mut GcReport,
) {
    let keys = {
        let ledger = ledger.lock().await;
        ledger.keys()
    };

    let mut closed = Vec::new();
    for key in keys {
        match host.view(&key).await {
            Ok(view) if !view.open => closed.push(key),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(item = %key, error = %err, "open/closed query failed; keeping entry");
            }
        }
    }
    if closed.is_empty() {
        return;
    }

    {
        let mut ledger = ledger.lock().await;
        let mut dirty = false;
        for key in &closed {
            if ledger.delete(key) {
                dirty = true;
            }
        }
        if dirty {
            if let Err(err) = ledger.persist_at(home) {
                tracing::error!(error = %err, "ledger persist failed during reclamation");
            }
        }
    }

    for key in closed {
        if let Err(err) = workspaces.release_worktree(&key).await {
            tracing::warn!(item = %key, error = %err, "releasing closed item's worktree failed");
        }
        tracing::info!(item = %key, "reclaimed closed item");
        report.closed_reclaimed.push(key);
    }
}

/// Delete base clones past the age threshold with no live ledger entry.
async fn reclaim_stale_clones(
    workspaces: &dyn Workspaces,
    ledger: &Arc<Mutex<Ledger>>,
    settings: &Settings,
    report: &mut GcReport,
) {
    let inventory = match workspaces.clone_inventory().await {
        Ok(inventory) => inventory,
        Err(err) => {
            tracing::warn!(error = %err, "clone inventory failed; skipping stale-clone pass");
            return;
        }
    };

    let live_repos = {
        let ledger = ledger.lock().await;
        ledger.repos()
    };
    let ttl = Duration::from_secs(settings.clone_ttl_days * 24 * 60 * 60);
    let now = SystemTime::now();

    for (repo, modified) in inventory {
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= ttl || live_repos.contains(&repo) {
            continue;
        }
        if let Err(err) = workspaces.release_all_for_repo(&repo).await {
            tracing::warn!(repo = %repo, error = %err, "releasing repo worktrees failed");
            continue;
        }
        match workspaces.remove_base_clone(&repo).await {
            Ok(()) => {
                tracing::info!(repo = %repo, "removed stale base clone");
                report.stale_clones_removed.push(repo);
            }
            Err(err) => {
                tracing::warn!(repo = %repo, error = %err, "removing stale clone failed");
            }
        }
    }
}

/// Trim every item's version count down to the retention limit.
fn prune_versions(home: &Path, settings: &Settings, report: &mut GcReport) {
    let keys = match store::list_item_keys_at(home) {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!(error = %err, "listing review items failed; skipping prune pass");
            return;
        }
    };
    for key in keys {
        match store::prune_versions_at(home, &key, settings.retention) {
            Ok(removed) => report.versions_pruned += removed,
            Err(err) => {
                tracing::warn!(item = %key, error = %err, "pruning versions failed");
            }
        }
    }
}

/// Release isolation directories not backed by a current ledger entry.
async fn sweep_orphan_worktrees(
    workspaces: &dyn Workspaces,
    ledger: &Arc<Mutex<Ledger>>,
    report: &mut GcReport,
) {
    let active: HashSet<ItemKey> = {
        let ledger = ledger.lock().await;
        ledger.keys().into_iter().collect()
    };
    match workspaces.sweep_orphans(&active).await {
        Ok(swept) => report.orphans_swept = swept,
        Err(err) => {
            tracing::warn!(error = %err, "orphan worktree sweep failed");
        }
    }
}
