//! Local diagnostics for failed Portal exchanges.
//!
//! Every failed call is written to the store as a KO integration report, so
//! the audit trail shows what the node tried and why it did not get through.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use rudi_core::store::Store;
use rudi_core::types::{
    ErrorDetail, IntegrationReport, LocalReportError, MetadataId, ReportId, ReportStatus,
};

use crate::error::PortalError;
use crate::http::{Method, TransportError};

/// `error_code` used when no HTTP status is available.
pub const COMMUNICATION_ERROR_CODE: &str = "communication";
/// `error_code` for a 2xx answer the node cannot use.
pub const PROTOCOL_ERROR_CODE: &str = "protocol";

#[derive(Clone)]
pub struct ErrorReporter {
    store: Arc<dyn Store>,
}

impl ErrorReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a KO report for a failed call. `metadata_id` is `None` for
    /// authentication steps, which concern no particular record.
    ///
    /// Returns the id of the stored report, or `None` if saving it failed.
    pub async fn report_failure(
        &self,
        metadata_id: Option<&MetadataId>,
        step: &str,
        method: Method,
        url: &str,
        error: &TransportError,
    ) -> Option<ReportId> {
        let report = build_error_report(metadata_id, step, method, url, error);
        self.persist(report, step, method, url, &error.to_string())
            .await
    }

    /// Report the failure, then turn it into [`PortalError::Communication`].
    pub async fn communication(
        &self,
        metadata_id: Option<&MetadataId>,
        step: &str,
        method: Method,
        url: &str,
        source: TransportError,
    ) -> PortalError {
        self.report_failure(metadata_id, step, method, url, &source)
            .await;
        PortalError::Communication {
            step: step.to_string(),
            method,
            url: url.to_string(),
            source,
        }
    }

    /// Report a 2xx answer whose body is unusable, then turn it into
    /// [`PortalError::ProtocolViolation`].
    pub async fn protocol_violation(
        &self,
        metadata_id: Option<&MetadataId>,
        step: &str,
        method: Method,
        url: &str,
        message: String,
    ) -> PortalError {
        let report = build_report(metadata_id, step, method, url, PROTOCOL_ERROR_CODE, &message);
        self.persist(report, step, method, url, &message).await;
        PortalError::ProtocolViolation(message)
    }

    async fn persist(
        &self,
        report: IntegrationReport,
        step: &str,
        method: Method,
        url: &str,
        detail: &str,
    ) -> Option<ReportId> {
        match self.store.save_report(&report).await {
            Ok(_) => {
                tracing::warn!(
                    report_id = %report.report_id,
                    step,
                    %method,
                    url,
                    error = detail,
                    "portal call failed; error report stored"
                );
                Some(report.report_id)
            }
            Err(save_err) => {
                tracing::warn!(
                    step,
                    %method,
                    url,
                    error = detail,
                    save_error = %save_err,
                    "portal call failed and the error report could not be stored"
                );
                None
            }
        }
    }
}

pub fn build_error_report(
    metadata_id: Option<&MetadataId>,
    step: &str,
    method: Method,
    url: &str,
    error: &TransportError,
) -> IntegrationReport {
    let error_code = error
        .status()
        .map(|status| status.to_string())
        .unwrap_or_else(|| COMMUNICATION_ERROR_CODE.to_string());
    build_report(metadata_id, step, method, url, &error_code, &error.to_string())
}

fn build_report(
    metadata_id: Option<&MetadataId>,
    step: &str,
    method: Method,
    url: &str,
    error_code: &str,
    detail: &str,
) -> IntegrationReport {
    let now = Utc::now();
    IntegrationReport {
        report_id: ReportId::new_v4(),
        resource_id: metadata_id
            .copied()
            .unwrap_or_else(|| MetadataId(Uuid::nil())),
        resource_title: None,
        status: ReportStatus::Ko,
        submission_date: now,
        treatment_date: Some(now),
        method: Some(method.to_string()),
        version: None,
        comment: Some(step.to_string()),
        errors: vec![ErrorDetail {
            error_code: error_code.to_string(),
            error_message: detail.to_string(),
            field_name: None,
        }],
        local_error: Some(LocalReportError {
            kind: step.to_string(),
            message: format!("{method} {url}: {detail}"),
        }),
    }
}
