//! Sync orchestrator — one cycle of discovery → delta → processing →
//! persistence.
//!
//! A cycle is "Idle → Running → Idle": a single atomic flag makes cycles
//! mutually exclusive, and a request while one is running is rejected
//! immediately ([`CycleOutcome::AlreadyRunning`]) rather than queued.
//! Within a cycle, due items are partitioned by repository; partitions
//! run on semaphore-gated tasks (the concurrency cap) while items inside
//! one partition run strictly sequentially, because the repository's base
//! clone must never be fetched by two workers at once.
//!
//! The ledger advances — and is persisted — only after a review attempt
//! for that exact revision has durably stored an artifact. A failed
//! attempt stores a failed version for operator visibility and leaves the
//! ledger untouched, so the item is retried next cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use patrol_core::ledger::Ledger;
use patrol_core::settings::{self, Settings};
use patrol_core::store;
use patrol_core::types::{Candidate, ItemKey, ItemMeta, RepoSlug, ReviewVersion};
use patrol_git::{Host, Workspaces};

use crate::discover::{self, AuthorDecision};
use crate::error::SyncError;
use crate::generator::{build_prompt, Generator, GeneratorOutcome};

// ---------------------------------------------------------------------------
// Cycle inputs and outputs
// ---------------------------------------------------------------------------

/// Options for one cycle run.
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    /// Restrict the cycle to these identities (manual "sync selected").
    pub selected: Option<Vec<ItemKey>>,
    /// Re-review even when the head revision is unchanged.
    pub force: bool,
    /// Instructions for this run, overriding the configured ones.
    pub instructions: Option<String>,
}

/// Outcome of requesting a cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A cycle was already running; nothing happened.
    AlreadyRunning,
    Completed(CycleReport),
}

/// Result of one processed item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub key: ItemKey,
    pub revision: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub processed: Vec<ItemReport>,
    /// Items advanced without review (author-filtered).
    pub advanced_only: Vec<ItemKey>,
    /// Discovered items whose head matched the ledger.
    pub unchanged: usize,
}

/// One row of the side-effect-free "pending" listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingItem {
    pub key: ItemKey,
    pub title: String,
    pub head_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed: Option<String>,
    pub due: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the cycle state machine and, transitively, all ledger mutation.
pub struct Orchestrator {
    home: PathBuf,
    host: Arc<dyn Host>,
    workspaces: Arc<dyn Workspaces>,
    generator: Arc<dyn Generator>,
    ledger: Arc<Mutex<Ledger>>,
    syncing: AtomicBool,
}

/// Everything a spawned repository task needs, cloned once per cycle.
struct CycleContext {
    home: PathBuf,
    host: Arc<dyn Host>,
    workspaces: Arc<dyn Workspaces>,
    generator: Arc<dyn Generator>,
    ledger: Arc<Mutex<Ledger>>,
    settings: Settings,
    instructions: String,
}

impl Orchestrator {
    pub fn new(
        home: impl Into<PathBuf>,
        host: Arc<dyn Host>,
        workspaces: Arc<dyn Workspaces>,
        generator: Arc<dyn Generator>,
        ledger: Arc<Mutex<Ledger>>,
    ) -> Self {
        Self {
            home: home.into(),
            host,
            workspaces,
            generator,
            ledger,
            syncing: AtomicBool::new(false),
        }
    }

    /// Whether a cycle is running right now.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Run one cycle. Returns [`CycleOutcome::AlreadyRunning`] without
    /// doing anything when a cycle is already in flight.
    pub async fn run_cycle(&self, opts: CycleOptions) -> Result<CycleOutcome, SyncError> {
        let Some(_guard) = SyncGuard::try_acquire(&self.syncing) else {
            tracing::info!("sync cycle already running; request rejected");
            return Ok(CycleOutcome::AlreadyRunning);
        };

        let started = std::time::Instant::now();
        let started_at = Utc::now();
        let settings = settings::load_at(&self.home);

        let discovered = discover::discover(self.host.as_ref(), &settings).await?;
        let candidates = match &opts.selected {
            Some(selected) => self.resolve_selected(discovered, selected).await,
            None => discovered,
        };

        // Delta against the ledger, honoring the author predicate.
        // Filtered items advance in place so they stop being rediscovered.
        let mut advanced_only = Vec::new();
        let mut due = Vec::new();
        let mut unchanged = 0usize;
        {
            let mut ledger = self.ledger.lock().await;
            let mut dirty = false;
            for candidate in candidates {
                match discover::author_decision(&settings, &candidate.author) {
                    AuthorDecision::AdvanceOnly => {
                        if ledger.get(&candidate.key) != Some(candidate.head_sha.as_str()) {
                            ledger.set(candidate.key.clone(), candidate.head_sha.clone());
                            dirty = true;
                            advanced_only.push(candidate.key);
                        }
                    }
                    AuthorDecision::Process => {
                        let current = ledger.get(&candidate.key) == Some(candidate.head_sha.as_str());
                        if opts.force || !current {
                            due.push(candidate);
                        } else {
                            unchanged += 1;
                        }
                    }
                }
            }
            if dirty {
                ledger.persist_at(&self.home)?;
            }
        }

        // Partition by repository, preserving discovery order.
        let mut order: Vec<RepoSlug> = Vec::new();
        let mut partitions: HashMap<RepoSlug, Vec<Candidate>> = HashMap::new();
        for candidate in due {
            let repo = candidate.key.repo.clone();
            let partition = partitions.entry(repo.clone()).or_default();
            if partition.is_empty() {
                order.push(repo);
            }
            partition.push(candidate);
        }

        let ctx = Arc::new(CycleContext {
            home: self.home.clone(),
            host: self.host.clone(),
            workspaces: self.workspaces.clone(),
            generator: self.generator.clone(),
            ledger: self.ledger.clone(),
            instructions: opts
                .instructions
                .unwrap_or_else(|| settings.custom_instructions.clone()),
            settings,
        });

        let semaphore = Arc::new(Semaphore::new(ctx.settings.concurrency.max(1)));
        let mut tasks: JoinSet<Vec<ItemReport>> = JoinSet::new();
        for repo in order {
            let Some(items) = partitions.remove(&repo) else {
                continue;
            };
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Vec::new();
                };
                let mut reports = Vec::with_capacity(items.len());
                for candidate in items {
                    reports.push(process_item(&ctx, candidate).await);
                }
                reports
            });
        }

        let mut processed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(reports) => processed.extend(reports),
                Err(err) => tracing::error!(error = %err, "repository task panicked"),
            }
        }

        let report = CycleReport {
            started_at,
            duration_ms: started.elapsed().as_millis(),
            processed,
            advanced_only,
            unchanged,
        };
        tracing::info!(
            processed = report.processed.len(),
            unchanged = report.unchanged,
            duration_ms = report.duration_ms as u64,
            "sync cycle completed",
        );
        Ok(CycleOutcome::Completed(report))
    }

    /// List due / not-due items without side effects.
    pub async fn pending(&self) -> Result<Vec<PendingItem>, SyncError> {
        let settings = settings::load_at(&self.home);
        let candidates = discover::discover(self.host.as_ref(), &settings).await?;
        let ledger = self.ledger.lock().await;
        Ok(candidates
            .into_iter()
            .filter(|c| {
                discover::author_decision(&settings, &c.author) == AuthorDecision::Process
            })
            .map(|c| {
                let last_reviewed = ledger.get(&c.key).map(str::to_string);
                let due = last_reviewed.as_deref() != Some(c.head_sha.as_str());
                PendingItem {
                    key: c.key,
                    title: c.title,
                    head_sha: c.head_sha,
                    last_reviewed,
                    due,
                }
            })
            .collect())
    }

    /// Narrow a discovered set to an explicit selection, resolving items
    /// the discovery pass did not surface (e.g. filtered repositories).
    async fn resolve_selected(
        &self,
        discovered: Vec<Candidate>,
        selected: &[ItemKey],
    ) -> Vec<Candidate> {
        let mut by_key: HashMap<ItemKey, Candidate> =
            discovered.into_iter().map(|c| (c.key.clone(), c)).collect();

        let mut out = Vec::new();
        for key in selected {
            if let Some(candidate) = by_key.remove(key) {
                out.push(candidate);
                continue;
            }
            match self.host.view(key).await {
                Ok(view) if view.open => {
                    if view.candidate.head_sha.is_empty() {
                        tracing::warn!(item = %key, "selected item has no head revision; skipping");
                    } else {
                        out.push(view.candidate);
                    }
                }
                Ok(_) => tracing::warn!(item = %key, "selected item is not open; skipping"),
                Err(err) => {
                    tracing::warn!(item = %key, error = %err, "resolving selected item failed");
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Per-item processing
// ---------------------------------------------------------------------------

async fn process_item(ctx: &CycleContext, candidate: Candidate) -> ItemReport {
    let key = candidate.key.clone();
    let revision = candidate.head_sha.clone();
    tracing::info!(item = %key, revision = %revision, "processing item");

    if let Err(err) = prepare_store(ctx, &candidate).await {
        tracing::warn!(item = %key, error = %err, "preparing review store failed");
    }

    let worktree = match acquire(ctx, &candidate).await {
        Ok(path) => path,
        Err(err) => {
            tracing::error!(item = %key, error = %err, "isolation setup failed");
            return ItemReport {
                key,
                revision,
                ok: false,
                detail: Some(err.to_string()),
            };
        }
    };

    let report = review_in_worktree(ctx, &candidate, &worktree).await;

    // The worktree is destroyed no matter how the attempt went.
    if let Err(err) = ctx.workspaces.release_worktree(&key).await {
        tracing::warn!(item = %key, error = %err, "worktree release failed");
    }

    report
}

/// Run the legacy-layout migration and refresh item metadata.
async fn prepare_store(ctx: &CycleContext, candidate: &Candidate) -> Result<(), SyncError> {
    let stored = {
        let ledger = ctx.ledger.lock().await;
        ledger.get(&candidate.key).map(str::to_string)
    };
    store::migrate_legacy_at(&ctx.home, &candidate.key, stored.as_deref())?;
    store::record_meta_at(
        &ctx.home,
        &candidate.key,
        &ItemMeta {
            title: candidate.title.clone(),
            author: candidate.author.clone(),
            url: candidate.url.clone(),
            recorded_at: Utc::now(),
        },
    )?;
    Ok(())
}

async fn acquire(ctx: &CycleContext, candidate: &Candidate) -> Result<PathBuf, SyncError> {
    ctx.workspaces.ensure_base_clone(&candidate.key.repo).await?;
    let worktree = ctx
        .workspaces
        .acquire_worktree(&candidate.key, &candidate.head_sha)
        .await?;
    Ok(worktree)
}

async fn review_in_worktree(
    ctx: &CycleContext,
    candidate: &Candidate,
    worktree: &Path,
) -> ItemReport {
    let key = candidate.key.clone();
    let revision = candidate.head_sha.clone();

    let changed_files = match ctx.host.changed_files(&key).await {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(item = %key, error = %err, "changed-file query failed; continuing");
            Vec::new()
        }
    };

    let prior = if ctx.settings.context_versions > 0 {
        match store::list_versions_at(&ctx.home, &key) {
            Ok(versions) => versions
                .into_iter()
                .filter(|v| v.ok)
                .take(ctx.settings.context_versions)
                .collect(),
            Err(err) => {
                tracing::warn!(item = %key, error = %err, "loading prior versions failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let prompt = build_prompt(candidate, &changed_files, &prior, &ctx.instructions);
    match ctx.generator.generate(worktree, &prompt).await {
        GeneratorOutcome::Success { body } => {
            let version = ReviewVersion {
                created_at: Utc::now(),
                revision: revision.clone(),
                ok: true,
                body,
            };
            if let Err(err) = store::append_version_at(&ctx.home, &key, &version) {
                // Without a durable artifact the ledger must not advance.
                tracing::error!(item = %key, error = %err, "storing review version failed");
                return ItemReport {
                    key,
                    revision,
                    ok: false,
                    detail: Some(err.to_string()),
                };
            }

            let mut ledger = ctx.ledger.lock().await;
            ledger.set(key.clone(), revision.clone());
            if let Err(err) = ledger.persist_at(&ctx.home) {
                tracing::error!(item = %key, error = %err, "ledger persist failed");
            }
            tracing::info!(item = %key, revision = %revision, "review stored");
            ItemReport {
                key,
                revision,
                ok: true,
                detail: None,
            }
        }
        GeneratorOutcome::Failed { reason } => {
            // Record the failure for operator visibility; the unchanged
            // ledger guarantees a retry next cycle.
            let version = ReviewVersion {
                created_at: Utc::now(),
                revision: revision.clone(),
                ok: false,
                body: reason.clone(),
            };
            if let Err(err) = store::append_version_at(&ctx.home, &key, &version) {
                tracing::error!(item = %key, error = %err, "storing failure record failed");
            }
            tracing::warn!(item = %key, reason = %reason, "review generation failed");
            ItemReport {
                key,
                revision,
                ok: false,
                detail: Some(reason),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle guard
// ---------------------------------------------------------------------------

/// Resets the `syncing` flag when the cycle ends, however it ends.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_and_resets_on_drop() {
        let flag = AtomicBool::new(false);

        let first = SyncGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(SyncGuard::try_acquire(&flag).is_none(), "second acquire must fail");

        drop(first);
        assert!(SyncGuard::try_acquire(&flag).is_some(), "flag must reset on drop");
    }
}
