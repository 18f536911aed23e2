//! `patrol settings` — read, update, and reset configuration.
//!
//! Updates are `KEY=VALUE` pairs validated as one batch; any violation
//! rejects the whole batch and prints one line per offending field.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use patrol_core::settings::{self, SettingsUpdate};
use patrol_core::StoreError;

use super::util;

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the effective settings as JSON.
    Show,
    /// Apply KEY=VALUE updates (e.g. `retention=3 repos='["acme/widgets"]'`).
    Set {
        /// KEY=VALUE pairs; values are JSON when they parse as JSON,
        /// plain strings otherwise.
        pairs: Vec<String>,
    },
    /// Restore the default settings.
    Reset,
}

pub fn run(command: SettingsCommand) -> Result<()> {
    let home = util::home()?;

    match command {
        SettingsCommand::Show => {
            let settings = settings::load_at(&home);
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommand::Set { pairs } => {
            if pairs.is_empty() {
                bail!("provide at least one KEY=VALUE pair");
            }
            let update = parse_pairs(&pairs)?;
            match settings::update_at(&home, update) {
                Ok(saved) => {
                    println!("{} settings updated", "✓".green());
                    println!("{}", serde_json::to_string_pretty(&saved)?);
                }
                Err(StoreError::InvalidSettings { errors }) => {
                    eprintln!("{} update rejected; nothing was changed:", "✗".red());
                    for error in &errors {
                        eprintln!("  {}: {}", error.field.bold(), error.message);
                    }
                    bail!("invalid settings update");
                }
                Err(err) => return Err(err).context("failed to update settings"),
            }
        }
        SettingsCommand::Reset => {
            settings::reset_at(&home).context("failed to reset settings")?;
            println!("{} settings reset to defaults", "✓".green());
        }
    }
    Ok(())
}

/// Build a partial update from `KEY=VALUE` pairs. Unknown keys are
/// rejected by the update schema itself.
fn parse_pairs(pairs: &[String]) -> Result<SettingsUpdate> {
    let mut object = serde_json::Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got '{pair}'");
        };
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        object.insert(key.to_string(), value);
    }
    serde_json::from_value(serde_json::Value::Object(object))
        .context("unrecognized settings key")
}
