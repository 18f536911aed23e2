//! `patrol sync` — run one cycle, via the daemon when it is up, inline
//! otherwise.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use patrol_core::types::ItemKey;
use patrol_daemon::{request_sync, DaemonError};
use patrol_sync::{CycleOptions, CycleOutcome, CycleReport};

use super::util;

/// Arguments for `patrol sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Sync only these items (`owner/name#number` each); empty = all due.
    pub items: Vec<String>,

    /// Re-review even when the head revision is unchanged.
    #[arg(long)]
    pub force: bool,

    /// Extra generator instructions for this run only.
    #[arg(long)]
    pub instructions: Option<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = util::home()?;
        let items = if self.items.is_empty() {
            None
        } else {
            Some(self.items.clone())
        };

        match request_sync(&home, items, self.force, self.instructions.clone()) {
            Ok(data) => {
                print_daemon_outcome(&data);
                Ok(())
            }
            Err(DaemonError::DaemonNotRunning { .. }) => self.run_inline(),
            Err(err) => Err(err).context("sync request failed"),
        }
    }

    fn run_inline(self) -> Result<()> {
        let home = util::home()?;
        let selected = self
            .items
            .iter()
            .map(|raw| ItemKey::parse(raw))
            .collect::<Result<Vec<_>, _>>()
            .context("invalid item reference")?;

        let opts = CycleOptions {
            selected: (!selected.is_empty()).then_some(selected),
            force: self.force,
            instructions: self.instructions,
        };

        let engine = util::inline_engine(&home);
        let outcome = util::block_on(engine.orchestrator.run_cycle(opts))??;
        match outcome {
            CycleOutcome::Completed(report) => print_report(&report),
            CycleOutcome::AlreadyRunning => println!("sync already running"),
        }
        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    if report.processed.is_empty() {
        println!(
            "✓ nothing to review ({} unchanged, {} filtered)",
            report.unchanged,
            report.advanced_only.len()
        );
        return;
    }

    for item in &report.processed {
        if item.ok {
            println!("  {} {} @ {}", "✓".green(), item.key, item.revision);
        } else {
            let detail = item.detail.as_deref().unwrap_or("failed");
            println!("  {} {} @ {} — {detail}", "✗".red(), item.key, item.revision);
        }
    }
    let reviewed = report.processed.iter().filter(|r| r.ok).count();
    println!(
        "✓ cycle finished: {} reviewed, {} failed, {} unchanged ({} ms)",
        reviewed,
        report.processed.len() - reviewed,
        report.unchanged,
        report.duration_ms
    );
}

fn print_daemon_outcome(data: &serde_json::Value) {
    match data.get("status").and_then(|s| s.as_str()) {
        Some("already-running") => println!("sync already running"),
        _ => match serde_json::to_string_pretty(data) {
            Ok(rendered) => println!("{rendered}"),
            Err(_) => println!("{data}"),
        },
    }
}
