//! `rudi-sync reconcile`: apply an integration report received out of band.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use rudi_core::store::ReportWrite;
use rudi_core::types::{IntegrationReport, MetadataId};
use rudi_portal::ReconcileState;

use super::{block_on, engine, home};

/// Arguments for `rudi-sync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// `global_id` of the metadata record the report concerns.
    pub id: MetadataId,

    /// JSON file holding the Portal's integration report.
    #[arg(long)]
    pub file: PathBuf,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.file)
            .with_context(|| format!("read {}", self.file.display()))?;
        let report: IntegrationReport = serde_json::from_str(&contents)
            .with_context(|| format!("{} is not an integration report", self.file.display()))?;

        let home = home()?;
        let engine = engine(&home)?;
        let report_id = report.report_id;
        let outcome = block_on(engine.reconcile(&self.id, &report_id, report))?
            .with_context(|| format!("reconcile failed for report {report_id}"))?;

        let state = match outcome.state {
            ReconcileState::Published { first_time: true } => "published (first time)".green(),
            ReconcileState::Published { first_time: false } => "published".green(),
            ReconcileState::IntegrationError => "integration error recorded".red(),
            ReconcileState::ObjectNotFound => "record not found locally".yellow(),
        };
        let write = match outcome.write {
            ReportWrite::Created => "stored",
            ReportWrite::Updated => "replaced",
        };
        println!("report {report_id} {write} for {}: {state}", self.id);
        Ok(())
    }
}
