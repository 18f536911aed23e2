//! `patrol reviews` — inspect or delete an item's stored reviews.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use patrol_core::store;
use patrol_core::types::ItemKey;

use super::util;

#[derive(Subcommand, Debug)]
pub enum ReviewsCommand {
    /// List stored review versions for an item, newest first.
    List {
        /// Item reference (`owner/name#number`).
        item: String,

        /// Print the full review bodies instead of a summary.
        #[arg(long)]
        full: bool,
    },
    /// Delete every stored review and the item's metadata.
    Delete {
        /// Item reference (`owner/name#number`).
        item: String,
    },
}

pub fn run(command: ReviewsCommand) -> Result<()> {
    let home = util::home()?;

    match command {
        ReviewsCommand::List { item, full } => {
            let key = ItemKey::parse(&item).context("invalid item reference")?;
            if let Some(meta) = store::load_meta_at(&home, &key)? {
                println!("{} — {} by {}", key, meta.title.bold(), meta.author);
                println!("{}", meta.url.dimmed());
            }

            let versions = store::list_versions_at(&home, &key)?;
            if versions.is_empty() {
                println!("no stored reviews for {key}");
                return Ok(());
            }

            for version in &versions {
                let marker = if version.ok {
                    "✓".green()
                } else {
                    "✗".red()
                };
                println!(
                    "{marker} {} @ {}",
                    version.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    &version.revision[..version.revision.len().min(12)],
                );
                if full {
                    println!("{}\n", version.body);
                } else if let Some(first_line) = version.body.lines().next() {
                    println!("    {first_line}");
                }
            }
        }
        ReviewsCommand::Delete { item } => {
            let key = ItemKey::parse(&item).context("invalid item reference")?;
            if store::delete_item_at(&home, &key)? {
                println!("{} deleted stored reviews for {key}", "✓".green());
            } else {
                println!("nothing stored for {key}");
            }
        }
    }
    Ok(())
}
