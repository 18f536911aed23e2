//! `patrol pending` — list due / not-due items without side effects.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use patrol_daemon::{request_pending, DaemonError};
use patrol_sync::PendingItem;

use super::util;

/// Arguments for `patrol pending`.
#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "item")]
    item: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "head")]
    head: String,
    #[tabled(rename = "last reviewed")]
    last_reviewed: String,
    #[tabled(rename = "due")]
    due: String,
}

impl PendingArgs {
    pub fn run(self) -> Result<()> {
        let home = util::home()?;

        let items: Vec<PendingItem> = match request_pending(&home) {
            Ok(data) => serde_json::from_value(data).context("unexpected daemon response")?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let engine = util::inline_engine(&home);
                util::block_on(engine.orchestrator.pending())??
            }
            Err(err) => return Err(err).context("pending request failed"),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }

        if items.is_empty() {
            println!("No open items discovered. Check `patrol settings show`.");
            return Ok(());
        }

        let rows: Vec<PendingRow> = items
            .iter()
            .map(|item| PendingRow {
                item: item.key.to_string(),
                title: truncate(&item.title, 48),
                head: short_sha(&item.head_sha),
                last_reviewed: item
                    .last_reviewed
                    .as_deref()
                    .map(short_sha)
                    .unwrap_or_else(|| "—".to_string()),
                due: if item.due {
                    "due".green().to_string()
                } else {
                    "current".dimmed().to_string()
                },
            })
            .collect();

        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{table}");

        let due = items.iter().filter(|i| i.due).count();
        println!("{due} of {} item(s) due for review", items.len());
        Ok(())
    }
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{head}…")
}
