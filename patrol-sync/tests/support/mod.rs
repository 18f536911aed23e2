//! In-memory fakes for the collaborator traits, plus a test harness that
//! wires them into an [`Orchestrator`] rooted at a temp home.
//!
//! Shared by several test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use patrol_core::ledger::Ledger;
use patrol_core::paths;
use patrol_core::settings::{self, Settings};
use patrol_core::types::{Candidate, ItemKey, RepoSlug};
use patrol_git::{GitError, Host, ItemView, SearchHit, Workspaces};
use patrol_sync::{Generator, GeneratorOutcome, Orchestrator};

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeHost {
    state: StdMutex<HostState>,
}

#[derive(Default)]
struct HostState {
    items: HashMap<ItemKey, (Candidate, bool)>,
    files: HashMap<ItemKey, Vec<String>>,
}

impl FakeHost {
    pub fn upsert(&self, candidate: Candidate) {
        let mut state = self.state.lock().unwrap();
        state.items.insert(candidate.key.clone(), (candidate, true));
    }

    pub fn set_head(&self, key: &ItemKey, sha: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some((candidate, _)) = state.items.get_mut(key) {
            candidate.head_sha = sha.to_string();
        }
    }

    pub fn close(&self, key: &ItemKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.items.get_mut(key) {
            entry.1 = false;
        }
    }

    pub fn set_files(&self, key: &ItemKey, files: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .insert(key.clone(), files.iter().map(|f| f.to_string()).collect());
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn list_open(&self, repo: &RepoSlug, limit: usize) -> Result<Vec<Candidate>, GitError> {
        let state = self.state.lock().unwrap();
        let mut open: Vec<Candidate> = state
            .items
            .values()
            .filter(|(c, is_open)| *is_open && &c.key.repo == repo)
            .map(|(c, _)| c.clone())
            .collect();
        open.sort_by(|a, b| a.key.cmp(&b.key));
        open.truncate(limit);
        Ok(open)
    }

    async fn search_involving(&self, _login: &str) -> Result<Vec<SearchHit>, GitError> {
        Ok(Vec::new())
    }

    async fn view(&self, key: &ItemKey) -> Result<ItemView, GitError> {
        let state = self.state.lock().unwrap();
        let (candidate, open) = state.items.get(key).ok_or_else(|| GitError::Command {
            program: "fake".to_string(),
            args: format!("view {key}"),
            stderr: "no such item".to_string(),
        })?;
        Ok(ItemView {
            candidate: candidate.clone(),
            open: *open,
        })
    }

    async fn changed_files(&self, key: &ItemKey) -> Result<Vec<String>, GitError> {
        let state = self.state.lock().unwrap();
        Ok(state.files.get(key).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FakeWorkspaces
// ---------------------------------------------------------------------------

/// Mimics the isolation layout on a real temp filesystem, without git.
pub struct FakeWorkspaces {
    home: PathBuf,
    pub acquired: StdMutex<Vec<ItemKey>>,
    pub released: StdMutex<Vec<ItemKey>>,
    clone_mtimes: StdMutex<HashMap<RepoSlug, SystemTime>>,
}

impl FakeWorkspaces {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            acquired: StdMutex::new(Vec::new()),
            released: StdMutex::new(Vec::new()),
            clone_mtimes: StdMutex::new(HashMap::new()),
        }
    }

    pub fn set_clone_age(&self, repo: &RepoSlug, modified: SystemTime) {
        self.clone_mtimes
            .lock()
            .unwrap()
            .insert(repo.clone(), modified);
    }

    pub fn worktree_exists(&self, key: &ItemKey) -> bool {
        paths::worktree_dir(&self.home, key).exists()
    }

    pub fn make_worktree(&self, key: &ItemKey) {
        std::fs::create_dir_all(paths::worktree_dir(&self.home, key)).unwrap();
    }
}

#[async_trait]
impl Workspaces for FakeWorkspaces {
    async fn ensure_base_clone(&self, repo: &RepoSlug) -> Result<PathBuf, GitError> {
        let dir = paths::clone_dir(&self.home, repo);
        std::fs::create_dir_all(&dir).map_err(|e| GitError::Io {
            path: dir.clone(),
            source: e,
        })?;
        self.clone_mtimes
            .lock()
            .unwrap()
            .entry(repo.clone())
            .or_insert_with(SystemTime::now);
        Ok(dir)
    }

    async fn acquire_worktree(&self, key: &ItemKey, _head_sha: &str) -> Result<PathBuf, GitError> {
        let dir = paths::worktree_dir(&self.home, key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).ok();
        }
        std::fs::create_dir_all(&dir).map_err(|e| GitError::Io {
            path: dir.clone(),
            source: e,
        })?;
        self.acquired.lock().unwrap().push(key.clone());
        Ok(dir)
    }

    async fn release_worktree(&self, key: &ItemKey) -> Result<(), GitError> {
        let dir = paths::worktree_dir(&self.home, key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).ok();
        }
        self.released.lock().unwrap().push(key.clone());
        Ok(())
    }

    async fn release_all_for_repo(&self, repo: &RepoSlug) -> Result<(), GitError> {
        let keys: Vec<ItemKey> = worktree_keys(&self.home)
            .into_iter()
            .filter(|k| &k.repo == repo)
            .collect();
        for key in keys {
            self.release_worktree(&key).await?;
        }
        Ok(())
    }

    async fn sweep_orphans(&self, active: &HashSet<ItemKey>) -> Result<Vec<ItemKey>, GitError> {
        let mut swept = Vec::new();
        for key in worktree_keys(&self.home) {
            if !active.contains(&key) {
                self.release_worktree(&key).await?;
                swept.push(key);
            }
        }
        Ok(swept)
    }

    async fn clone_inventory(&self) -> Result<Vec<(RepoSlug, SystemTime)>, GitError> {
        let mut inventory: Vec<_> = self
            .clone_mtimes
            .lock()
            .unwrap()
            .iter()
            .map(|(repo, modified)| (repo.clone(), *modified))
            .collect();
        inventory.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(inventory)
    }

    async fn remove_base_clone(&self, repo: &RepoSlug) -> Result<(), GitError> {
        let dir = paths::clone_dir(&self.home, repo);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).ok();
        }
        self.clone_mtimes.lock().unwrap().remove(repo);
        Ok(())
    }
}

fn worktree_keys(home: &Path) -> Vec<ItemKey> {
    let root = paths::worktrees_root(home);
    let mut keys = Vec::new();
    for owner in dirs_in(&root) {
        for name in dirs_in(&owner) {
            for number in dirs_in(&name) {
                let text = format!(
                    "{}/{}#{}",
                    file_name(&owner),
                    file_name(&name),
                    file_name(&number)
                );
                if let Ok(key) = ItemKey::parse(&text) {
                    keys.push(key);
                }
            }
        }
    }
    keys.sort();
    keys
}

fn dirs_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// FakeGenerator
// ---------------------------------------------------------------------------

/// Succeeds by default; individual items can be scripted to fail. Records
/// every prompt and counts invocations.
#[derive(Default)]
pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub prompts: StdMutex<Vec<String>>,
    failing: StdMutex<HashSet<ItemKey>>,
}

impl FakeGenerator {
    pub fn fail_for(&self, key: &ItemKey) {
        self.failing.lock().unwrap().insert(key.clone());
    }

    pub fn succeed_for(&self, key: &ItemKey) {
        self.failing.lock().unwrap().remove(key);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// The worktree path ends in `<owner>/<name>/<number>`.
fn key_from_worktree(path: &Path) -> Option<ItemKey> {
    let mut parts = path.components().rev().map(|c| {
        c.as_os_str().to_string_lossy().into_owned()
    });
    let number = parts.next()?;
    let name = parts.next()?;
    let owner = parts.next()?;
    ItemKey::parse(&format!("{owner}/{name}#{number}")).ok()
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, worktree: &Path, prompt: &str) -> GeneratorOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let failing = match key_from_worktree(worktree) {
            Some(key) => self.failing.lock().unwrap().contains(&key),
            None => false,
        };
        if failing {
            GeneratorOutcome::Failed {
                reason: "scripted failure".to_string(),
            }
        } else {
            GeneratorOutcome::Success {
                body: "Looks reasonable overall.".to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub home: TempDir,
    pub host: Arc<FakeHost>,
    pub workspaces: Arc<FakeWorkspaces>,
    pub generator: Arc<FakeGenerator>,
    pub ledger: Arc<Mutex<Ledger>>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// A harness polling the given exact repositories.
    pub fn new(repos: &[&str]) -> Self {
        let home = TempDir::new().unwrap();
        let settings = Settings {
            repos: repos.iter().map(|r| r.to_string()).collect(),
            ..Settings::default()
        };
        Self::with_settings(home, settings)
    }

    pub fn with_settings(home: TempDir, settings: Settings) -> Self {
        settings::save_at(home.path(), &settings).unwrap();

        let host = Arc::new(FakeHost::default());
        let workspaces = Arc::new(FakeWorkspaces::new(home.path()));
        let generator = Arc::new(FakeGenerator::default());
        let ledger = Arc::new(Mutex::new(patrol_core::ledger::load_at(home.path())));

        let orchestrator = Orchestrator::new(
            home.path(),
            host.clone(),
            workspaces.clone(),
            generator.clone(),
            ledger.clone(),
        );
        Self {
            home,
            host,
            workspaces,
            generator,
            ledger,
            orchestrator,
        }
    }

    pub fn settings(&self) -> Settings {
        settings::load_at(self.home.path())
    }

    pub async fn ledger_revision(&self, key: &ItemKey) -> Option<String> {
        let ledger = self.ledger.lock().await;
        ledger.get(key).map(str::to_string)
    }
}

/// A plain open candidate for `key` at `head_sha`.
pub fn candidate(key: &str, author: &str, head_sha: &str) -> Candidate {
    let key = ItemKey::parse(key).unwrap();
    let url = format!(
        "https://example.test/{}/pull/{}",
        key.repo, key.number
    );
    Candidate {
        title: format!("Change #{}", key.number),
        author: author.to_string(),
        head_sha: head_sha.to_string(),
        head_ref: "feature/change".to_string(),
        base_ref: "main".to_string(),
        url,
        body: Some("A change worth reviewing.".to_string()),
        key,
    }
}
