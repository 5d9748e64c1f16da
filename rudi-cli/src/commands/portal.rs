//! `rudi-sync portal`: direct access to the Portal copy of a record.

use anyhow::{Context, Result};
use clap::Subcommand;

use rudi_core::types::MetadataId;

use super::{block_on, engine, home};

#[derive(Subcommand, Debug)]
pub enum PortalCommand {
    /// Print the Portal copy of a record.
    Get { id: MetadataId },
    /// Withdraw a record from the Portal catalog.
    Delete { id: MetadataId },
}

pub fn run(command: PortalCommand) -> Result<()> {
    let home = home()?;
    let engine = engine(&home)?;

    let answer = match command {
        PortalCommand::Get { id } => block_on(engine.fetch_portal_metadata(&id))?
            .with_context(|| format!("failed to fetch {id} from portal"))?,
        PortalCommand::Delete { id } => block_on(engine.delete_portal_metadata(&id))?
            .with_context(|| format!("failed to delete {id} from portal"))?,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&answer).context("failed to render portal answer")?
    );
    Ok(())
}
