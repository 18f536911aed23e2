//! Filesystem layout under `~/.patrol/`.
//!
//! ```text
//! ~/.patrol/
//!   settings.json
//!   ledger.json
//!   clones/<owner>/<name>/          (durable base clones)
//!   worktrees/<owner>/<name>/<num>/ (disposable, revision-pinned checkouts)
//!   reviews/<owner>/<name>/<num>/   (meta.json + versions/*.json)
//! ```
//!
//! Every helper takes an explicit `home` so tests can point at a `TempDir`;
//! callers outside tests resolve home once via [`home`].

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::{ItemKey, RepoSlug};

pub const PATROL_DIR: &str = ".patrol";

pub fn patrol_root(home: &Path) -> PathBuf {
    home.join(PATROL_DIR)
}

pub fn settings_path(home: &Path) -> PathBuf {
    patrol_root(home).join("settings.json")
}

pub fn ledger_path(home: &Path) -> PathBuf {
    patrol_root(home).join("ledger.json")
}

pub fn clones_root(home: &Path) -> PathBuf {
    patrol_root(home).join("clones")
}

pub fn worktrees_root(home: &Path) -> PathBuf {
    patrol_root(home).join("worktrees")
}

pub fn reviews_root(home: &Path) -> PathBuf {
    patrol_root(home).join("reviews")
}

/// `~/.patrol/clones/<owner>/<name>`
pub fn clone_dir(home: &Path, repo: &RepoSlug) -> PathBuf {
    clones_root(home).join(repo.owner()).join(repo.name())
}

/// `~/.patrol/worktrees/<owner>/<name>/<number>`
pub fn worktree_dir(home: &Path, key: &ItemKey) -> PathBuf {
    worktrees_root(home)
        .join(key.repo.owner())
        .join(key.repo.name())
        .join(key.number.to_string())
}

/// `~/.patrol/reviews/<owner>/<name>/<number>`
pub fn review_dir(home: &Path, key: &ItemKey) -> PathBuf {
    reviews_root(home)
        .join(key.repo.owner())
        .join(key.repo.name())
        .join(key.number.to_string())
}

/// Resolve the real home directory.
pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}
