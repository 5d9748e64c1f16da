//! One synchronization engine per node process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use rudi_core::config::PortalConfig;
use rudi_core::store::Store;
use rudi_core::types::{IntegrationReport, MetadataId, PortalToken, ReportId};

use crate::dispatcher::{DispatchOutcome, SyncDispatcher};
use crate::error::PortalError;
use crate::error_report::ErrorReporter;
use crate::gate::SendabilityGate;
use crate::http::{PortalTransport, UreqTransport};
use crate::reconciler::{ReconcileOutcome, ReportReconciler};
use crate::token::TokenManager;
use crate::waiting_room::WaitingRoom;

/// Wires the components around one shared store, transport and waiting room.
pub struct SyncEngine {
    config: Arc<PortalConfig>,
    store: Arc<dyn Store>,
    waiting_room: Arc<WaitingRoom>,
    tokens: Arc<TokenManager>,
    dispatcher: SyncDispatcher,
    reconciler: ReportReconciler,
}

impl SyncEngine {
    pub fn new(config: PortalConfig, store: Arc<dyn Store>, transport: Arc<dyn PortalTransport>) -> Self {
        let config = Arc::new(config);
        let waiting_room = Arc::new(WaitingRoom::new(config.waiting_room_timeout()));
        let reporter = ErrorReporter::new(store.clone());
        let tokens = Arc::new(TokenManager::new(
            config.clone(),
            store.clone(),
            transport.clone(),
            reporter.clone(),
        ));
        let gate = SendabilityGate::new(config.clone(), store.clone(), waiting_room.clone());
        let dispatcher = SyncDispatcher::new(
            config.clone(),
            gate,
            tokens.clone(),
            transport,
            waiting_room.clone(),
            reporter,
        );
        let reconciler = ReportReconciler::new(store.clone(), waiting_room.clone());
        Self {
            config,
            store,
            waiting_room,
            tokens,
            dispatcher,
            reconciler,
        }
    }

    /// Engine talking to the real Portal over HTTP.
    pub fn with_http(config: PortalConfig, store: Arc<dyn Store>) -> Self {
        let transport = Arc::new(UreqTransport::new(config.request_timeout()));
        Self::new(config, store, transport)
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn waiting_room(&self) -> &Arc<WaitingRoom> {
        &self.waiting_room
    }

    pub async fn send_metadata_to_portal(&self, metadata_id: &MetadataId) -> Result<DispatchOutcome, PortalError> {
        self.dispatcher.send_metadata_to_portal(metadata_id).await
    }

    /// `updatedAt` of the newest version of `metadata_id` this engine has
    /// brought to the Portal, if any.
    pub fn last_dispatched(&self, metadata_id: &MetadataId) -> Option<DateTime<Utc>> {
        self.dispatcher.last_dispatched(metadata_id)
    }

    pub async fn get_portal_token(&self) -> Result<PortalToken, PortalError> {
        self.tokens.get_portal_token().await
    }

    pub async fn check_stored_token(&self) -> Result<Value, PortalError> {
        self.tokens.check_stored_token().await
    }

    pub async fn reconcile(
        &self,
        metadata_id: &MetadataId,
        report_id: &ReportId,
        report: IntegrationReport,
    ) -> Result<ReconcileOutcome, PortalError> {
        self.reconciler
            .reconcile(metadata_id, report_id, report)
            .await
    }

    pub async fn fetch_portal_metadata(&self, metadata_id: &MetadataId) -> Result<Value, PortalError> {
        self.dispatcher.fetch_portal_metadata(metadata_id).await
    }

    pub async fn delete_portal_metadata(&self, metadata_id: &MetadataId) -> Result<Value, PortalError> {
        self.dispatcher.delete_portal_metadata(metadata_id).await
    }
}
