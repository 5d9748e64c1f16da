//! rudi-sync: keep the Portal catalog in step with this node's metadata.
//!
//! # Usage
//!
//! ```text
//! rudi-sync send <id>
//! rudi-sync token [--check]
//! rudi-sync reconcile <id> --file <report.json>
//! rudi-sync reports <id> [--json]
//! rudi-sync portal get|delete <id>
//! rudi-sync daemon start|stop|status|send <id>|purge
//! ```
//!
//! `--verbose` raises logging to `debug`; otherwise `RUST_LOG` applies.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, portal::PortalCommand, reconcile::ReconcileArgs, reports::ReportsArgs,
    send::SendArgs, token::TokenArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rudi-sync",
    version,
    about = "Synchronize RUDI node metadata with the Portal catalog",
    long_about = None,
)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one metadata record to the Portal if it is sendable.
    Send(SendArgs),

    /// Obtain a valid Portal token, renewing it when needed.
    Token(TokenArgs),

    /// Apply a Portal integration report read from a file.
    Reconcile(ReconcileArgs),

    /// List the integration reports stored for a metadata record.
    Reports(ReportsArgs),

    /// Inspect or remove the Portal copy of a record.
    Portal {
        #[command(subcommand)]
        command: PortalCommand,
    },

    /// Run or talk to the node daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Send(args) => args.run(),
        Commands::Token(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Reports(args) => args.run(),
        Commands::Portal { command } => commands::portal::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
