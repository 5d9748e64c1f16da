//! Create-or-update dispatch of metadata records to the Portal.
//!
//! ## `send_metadata_to_portal`
//!
//! 1. Gate the record (skips are not errors).
//! 2. Get a Portal token.
//! 3. GET the Portal copy. 404 → POST the payload (create).
//! 4. Otherwise compare update dates: Portal copy strictly older → PUT;
//!    equal or newer → nothing to do, the waiting entry is released.
//!
//! A failed Portal call is recorded as an error report and leaves the
//! waiting entry in place, so the record is not re-sent before the timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use rudi_core::config::PortalConfig;
use rudi_core::error::ConfigError;
use rudi_core::types::{MetadataId, ReportId};

use crate::error::PortalError;
use crate::error_report::ErrorReporter;
use crate::gate::{SendabilityGate, Sendability, SendableMetadata, SkipReason};
use crate::http::{Method, PortalTransport};
use crate::payload::{portal_updated_date, report_id_from_answer};
use crate::token::TokenManager;
use crate::waiting_room::WaitingRoom;

const STEP_FETCH: &str = "fetching portal metadata";
const STEP_CREATE: &str = "creating portal metadata";
const STEP_UPDATE: &str = "updating portal metadata";
const STEP_DELETE: &str = "deleting portal metadata";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Skipped { reason: SkipReason },
    /// POSTed. `report_id` is set when the Portal's answer carried one.
    Created { report_id: Option<ReportId> },
    /// PUT over an older Portal copy.
    Updated { report_id: Option<ReportId> },
    /// The Portal copy is as recent as the local one.
    AlreadyCurrent,
}

/// The two ways a payload reaches the Portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submission {
    Create,
    Update,
}

impl Submission {
    fn method(self) -> Method {
        match self {
            Submission::Create => Method::Post,
            Submission::Update => Method::Put,
        }
    }

    fn step(self) -> &'static str {
        match self {
            Submission::Create => STEP_CREATE,
            Submission::Update => STEP_UPDATE,
        }
    }
}

pub struct SyncDispatcher {
    config: Arc<PortalConfig>,
    gate: SendabilityGate,
    tokens: Arc<TokenManager>,
    transport: Arc<dyn PortalTransport>,
    waiting_room: Arc<WaitingRoom>,
    reporter: ErrorReporter,
    dispatched_versions: Mutex<HashMap<MetadataId, DateTime<Utc>>>,
}

impl SyncDispatcher {
    pub fn new(
        config: Arc<PortalConfig>,
        gate: SendabilityGate,
        tokens: Arc<TokenManager>,
        transport: Arc<dyn PortalTransport>,
        waiting_room: Arc<WaitingRoom>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            config,
            gate,
            tokens,
            transport,
            waiting_room,
            reporter,
            dispatched_versions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn send_metadata_to_portal(
        &self,
        metadata_id: &MetadataId,
    ) -> Result<DispatchOutcome, PortalError> {
        let sendable = match self.gate.is_sendable(metadata_id).await? {
            Sendability::Sendable(sendable) => *sendable,
            Sendability::NotSendable(reason) => {
                tracing::info!(%metadata_id, %reason, "metadata not sent to portal");
                return Ok(DispatchOutcome::Skipped { reason });
            }
        };

        let outcome = self.exchange(metadata_id, &sendable).await?;
        self.dispatched()
            .entry(*metadata_id)
            .and_modify(|sent| *sent = (*sent).max(sendable.metadata.updated_at))
            .or_insert(sendable.metadata.updated_at);
        Ok(outcome)
    }

    /// `updatedAt` of the newest version of `metadata_id` that reached the
    /// Portal through this dispatcher (sent, or found already current).
    pub fn last_dispatched(&self, metadata_id: &MetadataId) -> Option<DateTime<Utc>> {
        self.dispatched().get(metadata_id).copied()
    }

    fn dispatched(&self) -> MutexGuard<'_, HashMap<MetadataId, DateTime<Utc>>> {
        self.dispatched_versions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// GET the Portal copy, then create, update or leave it.
    async fn exchange(
        &self,
        metadata_id: &MetadataId,
        sendable: &SendableMetadata,
    ) -> Result<DispatchOutcome, PortalError> {
        let token = self.tokens.get_portal_token().await?;
        let jwt = Some(token.jwt.as_str());

        let get_url = self.config.metadata_url(metadata_id);
        match self.transport.get(&get_url, jwt).await {
            Err(err) if err.is_not_found() => {
                tracing::debug!(%metadata_id, "metadata unknown to portal, creating");
                let report_id = self
                    .submit(metadata_id, sendable, Submission::Create, jwt)
                    .await?;
                Ok(DispatchOutcome::Created { report_id })
            }
            Err(err) => Err(self
                .reporter
                .communication(Some(metadata_id), STEP_FETCH, Method::Get, &get_url, err)
                .await),
            Ok(answer) => {
                let Some(portal_date) = portal_updated_date(&answer.body) else {
                    return Err(self
                        .reporter
                        .protocol_violation(
                            Some(metadata_id),
                            STEP_FETCH,
                            Method::Get,
                            &get_url,
                            format!("portal copy of {metadata_id} carries no update date"),
                        )
                        .await);
                };
                let local_date = sendable.metadata.updated_at;
                if portal_date < local_date {
                    tracing::debug!(%metadata_id, %portal_date, %local_date, "portal copy is older, updating");
                    let report_id = self
                        .submit(metadata_id, sendable, Submission::Update, jwt)
                        .await?;
                    Ok(DispatchOutcome::Updated { report_id })
                } else {
                    self.waiting_room.remove_if_matches(&sendable.ticket);
                    tracing::info!(%metadata_id, %portal_date, %local_date, "portal copy already current");
                    Ok(DispatchOutcome::AlreadyCurrent)
                }
            }
        }
    }

    /// POST or PUT the payload; record the returned report id on the entry.
    async fn submit(
        &self,
        metadata_id: &MetadataId,
        sendable: &SendableMetadata,
        submission: Submission,
        jwt: Option<&str>,
    ) -> Result<Option<ReportId>, PortalError> {
        let url = self.config.metadata_post_url();
        let (method, step) = (submission.method(), submission.step());
        let payload = sendable.payload.clone();
        let result = match submission {
            Submission::Create => self.transport.post(&url, jwt, payload).await,
            Submission::Update => self.transport.put(&url, jwt, payload).await,
        };
        let answer = match result {
            Ok(answer) => answer,
            Err(err) => {
                return Err(self
                    .reporter
                    .communication(Some(metadata_id), step, method, &url, err)
                    .await)
            }
        };

        let report_id = report_id_from_answer(&answer.body);
        match report_id {
            Some(report_id) => {
                self.waiting_room.attach_report(&sendable.ticket, report_id);
                tracing::info!(%metadata_id, %report_id, %method, "metadata sent to portal");
            }
            None => {
                tracing::info!(%metadata_id, %method, "metadata sent to portal, no report id returned");
            }
        }
        Ok(report_id)
    }

    /// The Portal's copy of a record.
    pub async fn fetch_portal_metadata(&self, metadata_id: &MetadataId) -> Result<Value, PortalError> {
        self.ensure_connected()?;
        let token = self.tokens.get_portal_token().await?;
        let url = self.config.metadata_url(metadata_id);
        match self.transport.get(&url, Some(&token.jwt)).await {
            Ok(answer) => Ok(answer.body),
            Err(err) if err.is_not_found() => Err(PortalError::not_found("portal metadata", metadata_id)),
            Err(err) => Err(self
                .reporter
                .communication(Some(metadata_id), STEP_FETCH, Method::Get, &url, err)
                .await),
        }
    }

    /// Withdraw a record from the Portal. Returns the Portal's answer.
    pub async fn delete_portal_metadata(&self, metadata_id: &MetadataId) -> Result<Value, PortalError> {
        self.ensure_connected()?;
        let token = self.tokens.get_portal_token().await?;
        let url = self.config.metadata_delete_url(metadata_id);
        match self.transport.delete(&url, Some(&token.jwt)).await {
            Ok(answer) => {
                tracing::info!(%metadata_id, "portal deletion requested");
                Ok(answer.body)
            }
            Err(err) if err.is_not_found() => Err(PortalError::not_found("portal metadata", metadata_id)),
            Err(err) => Err(self
                .reporter
                .communication(Some(metadata_id), STEP_DELETE, Method::Delete, &url, err)
                .await),
        }
    }

    fn ensure_connected(&self) -> Result<(), PortalError> {
        if self.config.is_connection_disabled() {
            return Err(ConfigError::PortalDisabled.into());
        }
        Ok(())
    }
}
