//! Shared plumbing for commands that run the engine inline (no daemon).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use patrol_core::ledger::{self, Ledger};
use patrol_git::{GhClient, GitWorkspaces, Host, Workspaces};
use patrol_sync::{Orchestrator, SettingsGenerator};

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Run a future to completion on a fresh runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// Engine wiring for commands that run without the daemon.
pub struct InlineEngine {
    pub host: Arc<dyn Host>,
    pub workspaces: Arc<dyn Workspaces>,
    pub ledger: Arc<Mutex<Ledger>>,
    pub orchestrator: Orchestrator,
}

pub fn inline_engine(home: &Path) -> InlineEngine {
    let host: Arc<dyn Host> = Arc::new(GhClient::new());
    let workspaces: Arc<dyn Workspaces> = Arc::new(GitWorkspaces::new(home));
    let ledger = Arc::new(Mutex::new(ledger::load_at(home)));
    let orchestrator = Orchestrator::new(
        home,
        host.clone(),
        workspaces.clone(),
        Arc::new(SettingsGenerator::new(home)),
        ledger.clone(),
    );
    InlineEngine {
        host,
        workspaces,
        ledger,
        orchestrator,
    }
}
