//! In-process store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{ReportWrite, Store};
use crate::types::{IntegrationReport, Metadata, MetadataId, PortalToken, ReportId};

/// [`Store`] holding every document in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    metadata: RwLock<HashMap<MetadataId, Metadata>>,
    reports: RwLock<HashMap<ReportId, IntegrationReport>>,
    token: RwLock<Option<PortalToken>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports currently stored.
    pub async fn report_count(&self) -> usize {
        self.reports.read().await.len()
    }

    /// Every stored report, in no particular order.
    pub async fn all_reports(&self) -> Vec<IntegrationReport> {
        self.reports.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_metadata_by_id(&self, id: &MetadataId) -> Result<Option<Metadata>, StoreError> {
        Ok(self.metadata.read().await.get(id).cloned())
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<Metadata, StoreError> {
        let mut stored = metadata.clone();
        stored.normalize_storage_status();
        self.metadata
            .write()
            .await
            .insert(stored.global_id, stored.clone());
        Ok(stored)
    }

    async fn store_token(&self, token: &PortalToken) -> Result<(), StoreError> {
        *self.token.write().await = Some(token.clone());
        Ok(())
    }

    async fn get_latest_token(&self) -> Result<Option<PortalToken>, StoreError> {
        Ok(self.token.read().await.clone())
    }

    async fn save_report(&self, report: &IntegrationReport) -> Result<ReportWrite, StoreError> {
        let previous = self
            .reports
            .write()
            .await
            .insert(report.report_id, report.clone());
        Ok(match previous {
            Some(_) => ReportWrite::Updated,
            None => ReportWrite::Created,
        })
    }

    async fn get_report_by_id(&self, id: &ReportId) -> Result<Option<IntegrationReport>, StoreError> {
        Ok(self.reports.read().await.get(id).cloned())
    }

    async fn list_reports_for(
        &self,
        resource_id: &MetadataId,
    ) -> Result<Vec<IntegrationReport>, StoreError> {
        let mut reports: Vec<_> = self
            .reports
            .read()
            .await
            .values()
            .filter(|r| r.resource_id == *resource_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| {
            a.submission_date
                .cmp(&b.submission_date)
                .then_with(|| a.report_id.cmp(&b.report_id))
        });
        Ok(reports)
    }
}
