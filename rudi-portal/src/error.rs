//! Error types for rudi-portal.

use serde::Serialize;
use thiserror::Error;

use rudi_core::error::{ConfigError, StoreError};

use crate::http::{Method, TransportError};

/// All errors that can arise from Portal synchronization.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The Portal refused or failed an authentication step.
    #[error("portal authentication failed while {step}: {message}")]
    Auth { step: String, message: String },

    /// A JWT failed local signature or claim verification.
    #[error("portal token verification failed: {0}")]
    AuthVerification(String),

    /// The Portal answered 2xx with something the engine cannot interpret.
    #[error("portal protocol violation: {0}")]
    ProtocolViolation(String),

    /// An outbound Portal call failed (network error or non-2xx status).
    #[error("portal communication failed while {step} ({method} {url}): {source}")]
    Communication {
        step: String,
        method: Method,
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An inbound integration report does not match the resource it targets.
    #[error("invalid integration report: {0}")]
    InvalidReport(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Structured error body handed to daemon clients and Portal callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub kind: &'static str,
    pub message: String,
    pub origin: String,
}

impl PortalError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        PortalError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::Auth { .. } => "auth",
            PortalError::AuthVerification(_) => "auth_verification",
            PortalError::ProtocolViolation(_) => "protocol_violation",
            PortalError::Communication { .. } => "communication",
            PortalError::NotFound { .. } => "not_found",
            PortalError::InvalidReport(_) => "invalid_report",
            PortalError::Store(_) => "store",
            PortalError::Config(_) => "config",
        }
    }

    /// True when the caller supplied something wrong, as opposed to a
    /// failure of the node or of the Portal.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PortalError::InvalidReport(_) | PortalError::NotFound { .. }
        )
    }

    pub fn payload(&self, origin: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            origin: origin.into(),
        }
    }
}
