//! Persistence collaborator consumed by the synchronization engine.
//!
//! Two implementations ship with the crate:
//! - [`FileStore`]: JSON documents under `~/.rudi/`, written atomically
//! - [`MemoryStore`]: process-local maps, used by tests and dry runs

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{IntegrationReport, Metadata, MetadataId, PortalToken, ReportId};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Whether [`Store::save_report`] inserted a new report or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportWrite {
    Created,
    Updated,
}

/// Document access needed by the Portal synchronization engine.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_metadata_by_id(&self, id: &MetadataId) -> Result<Option<Metadata>, StoreError>;

    /// Persist a metadata record. The storage status is recomputed from the
    /// media states on every write; the stored record is returned.
    async fn save_metadata(&self, metadata: &Metadata) -> Result<Metadata, StoreError>;

    /// Replace the stored Portal token with a freshly obtained one.
    async fn store_token(&self, token: &PortalToken) -> Result<(), StoreError>;

    async fn get_latest_token(&self) -> Result<Option<PortalToken>, StoreError>;

    async fn save_report(&self, report: &IntegrationReport) -> Result<ReportWrite, StoreError>;

    async fn get_report_by_id(&self, id: &ReportId) -> Result<Option<IntegrationReport>, StoreError>;

    /// All reports concerning `resource_id`, oldest submission first.
    async fn list_reports_for(
        &self,
        resource_id: &MetadataId,
    ) -> Result<Vec<IntegrationReport>, StoreError>;
}
