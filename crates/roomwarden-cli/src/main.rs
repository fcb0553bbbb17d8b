//! Roomwarden CLI — entry point.
//!
//! # Commands
//!
//! - `roomwarden run [--logs] [--dry-run]` — trigger handler + scan scheduler
//! - `roomwarden init` — write a default config
//! - `roomwarden status` — show configuration and registry status
//! - `roomwarden rooms|tmp|countdown|recall|guild ...` — registry admin
//! - `roomwarden extend <kind> <id> <amount> <unit>` — queue an expiry extension
//! - `roomwarden scan <job>` — one immediate reconcile pass

mod helpers;
mod init;
mod records_cmd;
mod rooms_cmd;
mod run;
mod scan_cmd;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Roomwarden — keeps ephemeral chat resources in line with their records
#[derive(Parser)]
#[command(name = "roomwarden", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service (voice trigger handler + scan scheduler)
    Run {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Reconcile against an in-memory copy of the registry and platform
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Write a default configuration file
    Init,

    /// Show configuration and registry status
    Status,

    /// Manage on-demand voice room configs
    Rooms {
        #[command(subcommand)]
        action: rooms_cmd::RoomsCommands,
    },

    /// Manage per-guild settings
    Guild {
        #[command(subcommand)]
        action: rooms_cmd::GuildCommands,
    },

    /// Manage temporary text channels
    Tmp {
        #[command(subcommand)]
        action: records_cmd::TmpCommands,
    },

    /// Manage countdown channels
    Countdown {
        #[command(subcommand)]
        action: records_cmd::CountdownCommands,
    },

    /// Manage message recall intents
    Recall {
        #[command(subcommand)]
        action: records_cmd::RecallCommands,
    },

    /// Push back the expiry of a temp channel or recall
    Extend {
        /// Target kind: tmp | recall
        kind: String,

        /// Target record id
        id: u64,

        /// Amount of `unit` to extend by
        amount: u32,

        /// minute | hour | day | week
        unit: String,
    },

    /// Run one reconcile pass of a scan job now
    Scan {
        /// Job name or alias: rooms | tmp | countdown | recall | settings
        job: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Use an in-memory copy of the registry and platform
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Print the job state as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { logs, dry_run } => {
            init_logging(logs);
            run::run(dry_run).await
        }
        Commands::Init => init::run(),
        Commands::Status => status::run().await,
        Commands::Rooms { action } => {
            init_logging(false);
            rooms_cmd::dispatch_rooms(action).await
        }
        Commands::Guild { action } => {
            init_logging(false);
            rooms_cmd::dispatch_guild(action).await
        }
        Commands::Tmp { action } => {
            init_logging(false);
            records_cmd::dispatch_tmp(action).await
        }
        Commands::Countdown { action } => {
            init_logging(false);
            records_cmd::dispatch_countdown(action).await
        }
        Commands::Recall { action } => {
            init_logging(false);
            records_cmd::dispatch_recall(action).await
        }
        Commands::Extend {
            kind,
            id,
            amount,
            unit,
        } => {
            init_logging(false);
            records_cmd::extend(&kind, id, amount, &unit).await
        }
        Commands::Scan {
            job,
            logs,
            dry_run,
            json,
        } => {
            init_logging(logs);
            scan_cmd::run(&job, dry_run, json).await
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("roomwarden=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
