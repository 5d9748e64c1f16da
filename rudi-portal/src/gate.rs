//! Sendability gate: decides whether a metadata record may go to the Portal
//! now, and if so admits it to the waiting room.
//!
//! Checks run in order; the first one that fails decides:
//! 1. Portal connection configured
//! 2. record exists
//! 3. production collection
//! 4. every media confirmed stored
//! 5. no live waiting entry for this version or a newer one

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use rudi_core::config::PortalConfig;
use rudi_core::store::Store;
use rudi_core::types::{Metadata, MetadataId};

use crate::error::PortalError;
use crate::payload::portal_payload;
use crate::waiting_room::{Admission, WaitTicket, WaitingRoom};

/// Why a record was not sent. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PortalDisabled,
    TestCollection,
    MediaPending,
    AlreadyWaiting,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PortalDisabled => write!(f, "portal connection disabled"),
            SkipReason::TestCollection => write!(f, "record belongs to a test collection"),
            SkipReason::MediaPending => write!(f, "media not yet stored"),
            SkipReason::AlreadyWaiting => write!(f, "already waiting for a portal report"),
        }
    }
}

/// A record admitted for dispatch.
#[derive(Debug, Clone)]
pub struct SendableMetadata {
    /// Body to POST/PUT to the Portal.
    pub payload: Value,
    /// The record as stored after stamping `portal_sent_at`.
    pub metadata: Metadata,
    pub ticket: WaitTicket,
}

#[derive(Debug, Clone)]
pub enum Sendability {
    Sendable(Box<SendableMetadata>),
    NotSendable(SkipReason),
}

pub struct SendabilityGate {
    config: Arc<PortalConfig>,
    store: Arc<dyn Store>,
    waiting_room: Arc<WaitingRoom>,
}

impl SendabilityGate {
    pub fn new(config: Arc<PortalConfig>, store: Arc<dyn Store>, waiting_room: Arc<WaitingRoom>) -> Self {
        Self {
            config,
            store,
            waiting_room,
        }
    }

    pub async fn is_sendable(&self, metadata_id: &MetadataId) -> Result<Sendability, PortalError> {
        self.is_sendable_at(metadata_id, Utc::now()).await
    }

    /// [`is_sendable`](Self::is_sendable) with an explicit clock.
    pub async fn is_sendable_at(
        &self,
        metadata_id: &MetadataId,
        now: DateTime<Utc>,
    ) -> Result<Sendability, PortalError> {
        if self.config.is_connection_disabled() {
            return Ok(Sendability::NotSendable(SkipReason::PortalDisabled));
        }

        let metadata = self
            .store
            .get_metadata_by_id(metadata_id)
            .await?
            .ok_or_else(|| PortalError::not_found("metadata", metadata_id))?;

        if !metadata.collection.is_production() {
            return Ok(Sendability::NotSendable(SkipReason::TestCollection));
        }
        if metadata.is_awaiting_media() {
            return Ok(Sendability::NotSendable(SkipReason::MediaPending));
        }

        let ticket = match self.waiting_room.admit(*metadata_id, metadata.updated_at, now) {
            Admission::Admitted(ticket) => ticket,
            Admission::AlreadyWaiting(entry) => {
                tracing::debug!(
                    %metadata_id,
                    wait_since = %entry.wait_since,
                    "record already waiting for a portal report"
                );
                return Ok(Sendability::NotSendable(SkipReason::AlreadyWaiting));
            }
        };

        let mut stamped = metadata;
        stamped.portal_sent_at = Some(now);
        let stored = match self.store.save_metadata(&stamped).await {
            Ok(stored) => stored,
            Err(err) => {
                self.waiting_room.remove_if_matches(&ticket);
                return Err(err.into());
            }
        };
        let payload = match portal_payload(&stored, &self.config.api_version) {
            Ok(payload) => payload,
            Err(err) => {
                self.waiting_room.remove_if_matches(&ticket);
                return Err(err);
            }
        };

        Ok(Sendability::Sendable(Box::new(SendableMetadata {
            payload,
            metadata: stored,
            ticket,
        })))
    }
}
