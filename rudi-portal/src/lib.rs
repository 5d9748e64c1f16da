//! # rudi-portal
//!
//! Keeps the Portal catalog consistent with the metadata stored on this node.
//!
//! Build a [`SyncEngine`] and call [`SyncEngine::send_metadata_to_portal`]
//! when a record changes, and [`SyncEngine::reconcile`] when the Portal
//! posts back its integration report.

pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod error_report;
pub mod gate;
pub mod http;
pub mod payload;
pub mod reconciler;
pub mod token;
pub mod waiting_room;

pub use dispatcher::DispatchOutcome;
pub use engine::SyncEngine;
pub use error::{ErrorPayload, PortalError};
pub use gate::SkipReason;
pub use http::{PortalTransport, UreqTransport};
pub use reconciler::{ReconcileOutcome, ReconcileState};
pub use waiting_room::{WaitingEntry, WaitingRoom};
