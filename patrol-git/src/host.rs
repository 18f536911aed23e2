//! Source-hosting query surface.
//!
//! [`Host`] is the trait boundary the orchestrator and collector depend
//! on; [`GhClient`] implements it by shelling out to the `gh` CLI with
//! `--json` output. Tests substitute an in-memory fake.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use patrol_core::types::{Candidate, ItemKey, RepoSlug};

use crate::error::GitError;

/// A hit from the broad "involving me" search. Search results carry no
/// head revision; callers resolve one via [`Host::view`] before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub key: ItemKey,
    pub title: String,
}

/// Full item metadata including upstream open/closed state.
#[derive(Debug, Clone)]
pub struct ItemView {
    pub candidate: Candidate,
    pub open: bool,
}

/// Read-only queries against the source-hosting service.
#[async_trait]
pub trait Host: Send + Sync {
    /// Open items of one exactly-named repository (bounded page size).
    async fn list_open(&self, repo: &RepoSlug, limit: usize) -> Result<Vec<Candidate>, GitError>;

    /// Open items anywhere that involve `login`.
    async fn search_involving(&self, login: &str) -> Result<Vec<SearchHit>, GitError>;

    /// Full metadata for one item, including open/closed state.
    async fn view(&self, key: &ItemKey) -> Result<ItemView, GitError>;

    /// Paths changed by the item, relative to the repository root.
    async fn changed_files(&self, key: &ItemKey) -> Result<Vec<String>, GitError>;
}

// ---------------------------------------------------------------------------
// gh CLI implementation
// ---------------------------------------------------------------------------

const LIST_FIELDS: &str = "number,title,author,headRefOid,headRefName,baseRefName,url,body";
const VIEW_FIELDS: &str = "number,title,author,headRefOid,headRefName,baseRefName,url,body,state";

/// `gh`-backed [`Host`]. Authentication is whatever `gh auth` holds.
#[derive(Debug, Clone)]
pub struct GhClient {
    program: String,
}

impl Default for GhClient {
    fn default() -> Self {
        Self {
            program: "gh".to_string(),
        }
    }
}

impl GhClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, args: &[String]) -> Result<String, GitError> {
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(GitError::Command {
                program: self.program.clone(),
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct GhAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    title: String,
    author: Option<GhAuthor>,
    #[serde(default)]
    head_ref_oid: String,
    #[serde(default)]
    head_ref_name: String,
    #[serde(default)]
    base_ref_name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl GhPullRequest {
    fn into_candidate(self, repo: &RepoSlug) -> Candidate {
        Candidate {
            key: ItemKey::new(repo.clone(), self.number),
            title: self.title,
            author: self.author.map(|a| a.login).unwrap_or_default(),
            head_sha: self.head_ref_oid,
            head_ref: self.head_ref_name,
            base_ref: self.base_ref_name,
            url: self.url,
            body: self.body.filter(|b| !b.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhSearchRepo {
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
struct GhSearchHit {
    number: u64,
    title: String,
    repository: GhSearchRepo,
}

#[derive(Debug, Deserialize)]
struct GhFileList {
    #[serde(default)]
    files: Vec<GhFile>,
}

#[derive(Debug, Deserialize)]
struct GhFile {
    path: String,
}

#[async_trait]
impl Host for GhClient {
    async fn list_open(&self, repo: &RepoSlug, limit: usize) -> Result<Vec<Candidate>, GitError> {
        let stdout = self
            .run(&args([
                "pr",
                "list",
                "--repo",
                &repo.to_string(),
                "--state",
                "open",
                "--limit",
                &limit.to_string(),
                "--json",
                LIST_FIELDS,
            ]))
            .await?;
        let prs: Vec<GhPullRequest> = serde_json::from_str(&stdout)?;
        Ok(prs.into_iter().map(|pr| pr.into_candidate(repo)).collect())
    }

    async fn search_involving(&self, login: &str) -> Result<Vec<SearchHit>, GitError> {
        let stdout = self
            .run(&args([
                "search",
                "prs",
                "--involves",
                login,
                "--state",
                "open",
                "--limit",
                "100",
                "--json",
                "number,title,repository",
            ]))
            .await?;
        let hits: Vec<GhSearchHit> = serde_json::from_str(&stdout)?;
        let mut out = Vec::new();
        for hit in hits {
            match RepoSlug::parse(&hit.repository.name_with_owner) {
                Ok(repo) => out.push(SearchHit {
                    key: ItemKey::new(repo, hit.number),
                    title: hit.title,
                }),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping search hit with odd repository name");
                }
            }
        }
        Ok(out)
    }

    async fn view(&self, key: &ItemKey) -> Result<ItemView, GitError> {
        let stdout = self
            .run(&args([
                "pr",
                "view",
                &key.number.to_string(),
                "--repo",
                &key.repo.to_string(),
                "--json",
                VIEW_FIELDS,
            ]))
            .await?;
        let pr: GhPullRequest = serde_json::from_str(&stdout)?;
        let open = pr.state.as_deref() == Some("OPEN");
        Ok(ItemView {
            candidate: pr.into_candidate(&key.repo),
            open,
        })
    }

    async fn changed_files(&self, key: &ItemKey) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run(&args([
                "pr",
                "view",
                &key.number.to_string(),
                "--repo",
                &key.repo.to_string(),
                "--json",
                "files",
            ]))
            .await?;
        let list: GhFileList = serde_json::from_str(&stdout)?;
        Ok(list.files.into_iter().map(|f| f.path).collect())
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
