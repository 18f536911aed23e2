//! Isolation manager — durable base clones and disposable worktrees.
//!
//! One base clone per repository under `~/.patrol/clones/`; one
//! revision-pinned worktree per in-flight item under
//! `~/.patrol/worktrees/`. Worktrees are created at the start of a
//! processing attempt and always destroyed at its end; a leftover from a
//! crash is destroyed and re-created. The base clone is only ever touched
//! by one worker at a time (per-repository serialization is enforced by
//! the orchestrator, not here).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::process::Command;

use patrol_core::paths;
use patrol_core::types::{ItemKey, RepoSlug};

use crate::error::{io_err, GitError};

/// Filesystem isolation for review attempts.
#[async_trait]
pub trait Workspaces: Send + Sync {
    /// Clone the repository if absent, otherwise fetch all refs and prune
    /// deleted ones. Idempotent. Returns the base clone path.
    async fn ensure_base_clone(&self, repo: &RepoSlug) -> Result<PathBuf, GitError>;

    /// Create a worktree for `key` pinned to `head_sha`, destroying any
    /// leftover directory first. Fetches the exact revision, falling back
    /// to the item's dedicated `pull/<n>/head` ref.
    async fn acquire_worktree(&self, key: &ItemKey, head_sha: &str) -> Result<PathBuf, GitError>;

    /// Remove the worktree and its registration in the base clone.
    /// Tolerates the directory already being gone; falls back to a forced
    /// filesystem removal when the structured removal fails.
    async fn release_worktree(&self, key: &ItemKey) -> Result<(), GitError>;

    /// Release every worktree belonging to `repo`.
    async fn release_all_for_repo(&self, repo: &RepoSlug) -> Result<(), GitError>;

    /// Release every worktree whose identity is not in `active`.
    /// Returns the identities that were swept.
    async fn sweep_orphans(&self, active: &HashSet<ItemKey>) -> Result<Vec<ItemKey>, GitError>;

    /// Base clones on disk with their last-modified time, for GC.
    async fn clone_inventory(&self) -> Result<Vec<(RepoSlug, SystemTime)>, GitError>;

    /// Delete one base clone directory outright.
    async fn remove_base_clone(&self, repo: &RepoSlug) -> Result<(), GitError>;
}

// ---------------------------------------------------------------------------
// git implementation
// ---------------------------------------------------------------------------

/// `git`/`gh`-backed [`Workspaces`] rooted at one home directory.
#[derive(Debug, Clone)]
pub struct GitWorkspaces {
    home: PathBuf,
}

impl GitWorkspaces {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<(), GitError> {
        run_checked(Command::new("git").current_dir(cwd).args(args), "git", args).await
    }

    async fn gh_clone(&self, repo: &RepoSlug, target: &Path) -> Result<(), GitError> {
        let slug = repo.to_string();
        let target_str = target.display().to_string();
        let args = ["repo", "clone", slug.as_str(), target_str.as_str()];
        run_checked(Command::new("gh").args(args), "gh", &args).await
    }
}

async fn run_checked(
    command: &mut Command,
    program: &str,
    args: &[&str],
) -> Result<(), GitError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| GitError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(GitError::Command {
            program: program.to_string(),
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Workspaces for GitWorkspaces {
    async fn ensure_base_clone(&self, repo: &RepoSlug) -> Result<PathBuf, GitError> {
        let clone = paths::clone_dir(&self.home, repo);
        if clone.join(".git").exists() {
            self.git(&clone, &["fetch", "--all", "--prune", "--quiet"])
                .await?;
            return Ok(clone);
        }

        if let Some(parent) = clone.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        tracing::info!(repo = %repo, "cloning repository");
        self.gh_clone(repo, &clone).await?;
        Ok(clone)
    }

    async fn acquire_worktree(&self, key: &ItemKey, head_sha: &str) -> Result<PathBuf, GitError> {
        let clone = paths::clone_dir(&self.home, &key.repo);
        let worktree = paths::worktree_dir(&self.home, key);

        // A leftover directory means a prior attempt crashed mid-flight.
        if worktree.exists() {
            tracing::warn!(item = %key, "destroying stale worktree before re-acquire");
            self.release_worktree(key).await?;
        }

        // Fetch the exact revision; a head reachable only from the item's
        // dedicated ref needs the fallback fetch.
        let direct = self
            .git(&clone, &["fetch", "--quiet", "origin", head_sha])
            .await;
        if direct.is_err() {
            let pull_ref = format!("pull/{}/head", key.number);
            self.git(&clone, &["fetch", "--quiet", "origin", &pull_ref])
                .await?;
        }

        if let Some(parent) = worktree.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let worktree_str = worktree.display().to_string();
        self.git(
            &clone,
            &["worktree", "add", "--detach", &worktree_str, head_sha],
        )
        .await?;
        Ok(worktree)
    }

    async fn release_worktree(&self, key: &ItemKey) -> Result<(), GitError> {
        let clone = paths::clone_dir(&self.home, &key.repo);
        let worktree = paths::worktree_dir(&self.home, key);

        if clone.join(".git").exists() {
            let worktree_str = worktree.display().to_string();
            let removed = self
                .git(&clone, &["worktree", "remove", "--force", &worktree_str])
                .await;
            if let Err(err) = removed {
                tracing::debug!(item = %key, error = %err, "structured worktree removal failed");
            }
            // Drop any dangling registration regardless of the outcome.
            let _ = self.git(&clone, &["worktree", "prune"]).await;
        }

        match std::fs::remove_dir_all(&worktree) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&worktree, err)),
        }
    }

    async fn release_all_for_repo(&self, repo: &RepoSlug) -> Result<(), GitError> {
        for key in worktree_keys(&self.home)? {
            if &key.repo == repo {
                self.release_worktree(&key).await?;
            }
        }
        Ok(())
    }

    async fn sweep_orphans(&self, active: &HashSet<ItemKey>) -> Result<Vec<ItemKey>, GitError> {
        let mut swept = Vec::new();
        for key in worktree_keys(&self.home)? {
            if active.contains(&key) {
                continue;
            }
            tracing::info!(item = %key, "sweeping orphan worktree");
            self.release_worktree(&key).await?;
            swept.push(key);
        }
        Ok(swept)
    }

    async fn clone_inventory(&self) -> Result<Vec<(RepoSlug, SystemTime)>, GitError> {
        let root = paths::clones_root(&self.home);
        let mut inventory = Vec::new();
        for owner in subdirs(&root)? {
            for name in subdirs(&owner)? {
                let slug = format!(
                    "{}/{}",
                    dir_name(&owner),
                    dir_name(&name),
                );
                let Ok(repo) = RepoSlug::parse(&slug) else {
                    continue;
                };
                let modified = std::fs::metadata(&name)
                    .and_then(|m| m.modified())
                    .map_err(|e| io_err(&name, e))?;
                inventory.push((repo, modified));
            }
        }
        inventory.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(inventory)
    }

    async fn remove_base_clone(&self, repo: &RepoSlug) -> Result<(), GitError> {
        let clone = paths::clone_dir(&self.home, repo);
        match std::fs::remove_dir_all(&clone) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&clone, err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Directory walking
// ---------------------------------------------------------------------------

/// Identities reconstructed from the `<owner>/<name>/<number>` worktree
/// layout. Directories that do not fit the layout are ignored.
fn worktree_keys(home: &Path) -> Result<Vec<ItemKey>, GitError> {
    let root = paths::worktrees_root(home);
    let mut keys = Vec::new();
    for owner in subdirs(&root)? {
        for name in subdirs(&owner)? {
            for number in subdirs(&name)? {
                let candidate = format!(
                    "{}/{}#{}",
                    dir_name(&owner),
                    dir_name(&name),
                    dir_name(&number),
                );
                if let Ok(key) = ItemKey::parse(&candidate) {
                    keys.push(key);
                }
            }
        }
    }
    keys.sort();
    Ok(keys)
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, GitError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(dir, err)),
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
