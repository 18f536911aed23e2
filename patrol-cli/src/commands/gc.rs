//! `patrol gc` — run one collector pass.

use anyhow::{Context, Result};
use clap::Args;

use patrol_core::settings;
use patrol_daemon::{request_gc, DaemonError};
use patrol_sync::run_gc;

use super::util;

/// Arguments for `patrol gc`.
#[derive(Args, Debug)]
pub struct GcArgs {}

impl GcArgs {
    pub fn run(self) -> Result<()> {
        let home = util::home()?;

        let report = match request_gc(&home) {
            Ok(data) => data,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let engine = util::inline_engine(&home);
                let settings = settings::load_at(&home);
                let report = util::block_on(run_gc(
                    &home,
                    engine.host.as_ref(),
                    engine.workspaces.as_ref(),
                    &engine.ledger,
                    &settings,
                ))?;
                serde_json::to_value(report)?
            }
            Err(err) => return Err(err).context("gc request failed"),
        };

        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
