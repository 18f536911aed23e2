//! # patrol-git
//!
//! External collaborators behind trait seams:
//! - [`host`] — the source-hosting query surface ([`Host`]), implemented
//!   by [`GhClient`] over the `gh` CLI
//! - [`repo`] — the isolation manager ([`Workspaces`]), implemented by
//!   [`GitWorkspaces`] over `git` base clones and disposable worktrees

pub mod error;
pub mod host;
pub mod repo;

pub use error::GitError;
pub use host::{GhClient, Host, ItemView, SearchHit};
pub use repo::{GitWorkspaces, Workspaces};
