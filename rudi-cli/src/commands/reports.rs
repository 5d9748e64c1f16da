//! `rudi-sync reports`: integration history of one record.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use rudi_core::types::{IntegrationReport, MetadataId, ReportStatus};

use super::{block_on, engine, home};

/// Arguments for `rudi-sync reports`.
#[derive(Args, Debug)]
pub struct ReportsArgs {
    /// `global_id` of the metadata record.
    pub id: MetadataId,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "report")]
    report_id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "method")]
    method: String,
    #[tabled(rename = "submitted")]
    submitted: String,
    #[tabled(rename = "errors")]
    errors: String,
}

impl ReportsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let engine = engine(&home)?;
        let reports = block_on(engine.store().list_reports_for(&self.id))?
            .with_context(|| format!("failed to list reports for {}", self.id))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&reports).context("failed to render reports JSON")?
            );
            return Ok(());
        }

        if reports.is_empty() {
            println!("No integration reports for {}.", self.id);
            return Ok(());
        }
        let rows: Vec<ReportRow> = reports.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(report: &IntegrationReport) -> ReportRow {
    let status = match report.status {
        ReportStatus::Ok => "OK".green().to_string(),
        ReportStatus::Ko => "KO".red().to_string(),
    };
    let mut errors: Vec<String> = report
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.error_code, e.error_message))
        .collect();
    if let Some(local) = &report.local_error {
        errors.push(local.kind.clone());
    }
    ReportRow {
        report_id: report.report_id.to_string(),
        status,
        method: report.method.clone().unwrap_or_else(|| "-".into()),
        submitted: report.submission_date.format("%Y-%m-%d %H:%M").to_string(),
        errors: if errors.is_empty() { "-".into() } else { errors.join("; ") },
    }
}
