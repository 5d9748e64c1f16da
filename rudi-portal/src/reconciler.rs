//! Applies the Portal's integration report to local state.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use rudi_core::store::{ReportWrite, Store};
use rudi_core::types::{IntegrationReport, LocalReportError, MetadataId, ReportId, ReportStatus};

use crate::error::PortalError;
use crate::waiting_room::WaitingRoom;

/// `error_type` of the annotation added when the reported record is unknown.
pub const OBJECT_NOT_FOUND: &str = "Object not found";

/// What the report did to the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileState {
    /// OK report. `first_time` when this report set `publishedAt`.
    Published { first_time: bool },
    /// KO report; the record now points at it.
    IntegrationError,
    /// The record does not exist locally; only the report was stored.
    ObjectNotFound,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// The report as stored.
    pub report: IntegrationReport,
    pub write: ReportWrite,
    pub state: ReconcileState,
}

pub struct ReportReconciler {
    store: Arc<dyn Store>,
    waiting_room: Arc<WaitingRoom>,
}

impl ReportReconciler {
    pub fn new(store: Arc<dyn Store>, waiting_room: Arc<WaitingRoom>) -> Self {
        Self {
            store,
            waiting_room,
        }
    }

    pub async fn reconcile(
        &self,
        metadata_id: &MetadataId,
        report_id: &ReportId,
        mut report: IntegrationReport,
    ) -> Result<ReconcileOutcome, PortalError> {
        if report.resource_id != *metadata_id {
            return Err(PortalError::InvalidReport(format!(
                "report concerns {} but was posted for {metadata_id}",
                report.resource_id
            )));
        }
        if report.report_id != *report_id {
            return Err(PortalError::InvalidReport(format!(
                "report body id {} does not match {report_id}",
                report.report_id
            )));
        }

        match self.waiting_room.remove(metadata_id) {
            Some(entry) if entry.report_id != Some(*report_id) => {
                tracing::warn!(
                    %metadata_id,
                    %report_id,
                    expected = ?entry.report_id,
                    "integration report does not match the awaited one"
                );
            }
            Some(_) => {}
            None => {
                tracing::warn!(%metadata_id, %report_id, "integration report for a record not waiting");
            }
        }

        let metadata = self.store.get_metadata_by_id(metadata_id).await?;
        if metadata.is_none() && !report.is_deletion() {
            tracing::warn!(%metadata_id, %report_id, "integration report for unknown metadata");
            report.local_error = Some(LocalReportError {
                kind: OBJECT_NOT_FOUND.to_string(),
                message: format!("the metadata {metadata_id} concerned by the report was not found"),
            });
        }

        let write = self.store.save_report(&report).await?;
        tracing::info!(
            %metadata_id,
            %report_id,
            status = %report.status,
            write = ?write,
            "integration report stored"
        );

        let Some(mut metadata) = metadata else {
            return Ok(ReconcileOutcome {
                report,
                write,
                state: ReconcileState::ObjectNotFound,
            });
        };

        let state = match report.status {
            ReportStatus::Ok => {
                let first_time = metadata.mark_published(Utc::now());
                metadata.integration_error_id = None;
                ReconcileState::Published { first_time }
            }
            ReportStatus::Ko => {
                metadata.integration_error_id = Some(*report_id);
                ReconcileState::IntegrationError
            }
        };
        self.store.save_metadata(&metadata).await?;

        Ok(ReconcileOutcome {
            report,
            write,
            state,
        })
    }
}
