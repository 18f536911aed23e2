//! Patrol — continuous pull-request review CLI.
//!
//! # Usage
//!
//! ```text
//! patrol sync [ITEM…] [--force] [--instructions TEXT]
//! patrol pending [--json]
//! patrol status
//! patrol settings show
//! patrol settings set KEY=VALUE…
//! patrol settings reset
//! patrol reviews list <owner/name#number>
//! patrol reviews delete <owner/name#number>
//! patrol gc
//! patrol daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, gc::GcArgs, pending::PendingArgs, reviews::ReviewsCommand,
    settings::SettingsCommand, status::StatusArgs, sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "patrol",
    version,
    about = "Keep pull requests continuously reviewed",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a sync cycle — all due items, or an explicit selection.
    Sync(SyncArgs),

    /// List due / not-due items without reviewing anything.
    Pending(PendingArgs),

    /// Show daemon and sync status.
    Status(StatusArgs),

    /// Read, update, or reset settings.
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Inspect or delete stored reviews for an item.
    Reviews {
        #[command(subcommand)]
        command: ReviewsCommand,
    },

    /// Run the retention and garbage collector once.
    Gc(GcArgs),

    /// Manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Pending(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Settings { command } => commands::settings::run(command),
        Commands::Reviews { command } => commands::reviews::run(command),
        Commands::Gc(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
