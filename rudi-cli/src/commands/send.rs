//! `rudi-sync send`: push one record through the sendability gate.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use rudi_core::types::MetadataId;
use rudi_portal::DispatchOutcome;

use super::{block_on, engine, home};

/// Arguments for `rudi-sync send`.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// `global_id` of the metadata record.
    pub id: MetadataId,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let engine = engine(&home)?;
        let outcome = block_on(engine.send_metadata_to_portal(&self.id))?
            .with_context(|| format!("send failed for metadata {}", self.id))?;
        print_outcome(&self.id, &outcome);
        Ok(())
    }
}

pub(crate) fn print_outcome(id: &MetadataId, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Created { report_id } => {
            println!("{} {id} created on portal{}", "✓".green(), report_suffix(report_id.as_ref()));
        }
        DispatchOutcome::Updated { report_id } => {
            println!("{} {id} updated on portal{}", "✓".green(), report_suffix(report_id.as_ref()));
        }
        DispatchOutcome::AlreadyCurrent => {
            println!("{} {id} already current on portal", "=".cyan());
        }
        DispatchOutcome::Skipped { reason } => {
            println!("{} {id} not sent: {reason}", "·".yellow());
        }
    }
}

fn report_suffix(report_id: Option<&rudi_core::types::ReportId>) -> String {
    report_id
        .map(|id| format!(" (report {id})"))
        .unwrap_or_default()
}
