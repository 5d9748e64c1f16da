//! `rudi-sync daemon`: node daemon lifecycle and control.

use anyhow::{Context, Result};
use clap::Subcommand;

use rudi_core::types::MetadataId;
use rudi_daemon::paths::socket_path;
use rudi_daemon::{
    request_purge, request_send, request_status, request_stop, start_blocking, DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watcher, socket, report callback).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the running daemon to send one record.
    Send { id: MetadataId },
    /// Drop waiting entries whose report never came.
    Purge,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Send { id } => {
            let summary = request_send(&home, &id.to_string())
                .with_context(|| format!("daemon could not send {id}"))?;
            print_json(&summary)?;
        }
        DaemonCommand::Purge => {
            let purged = request_purge(&home).context("failed to purge waiting room")?;
            print_json(&purged)?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
