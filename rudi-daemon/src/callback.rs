//! HTTP endpoint on which the Portal posts integration reports.
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/resources/:id/report` | PUT | Reconcile an integration report for metadata `id` |
//!
//! Answers 200 with the stored report, 400 with a structured error when
//! the request or the report is malformed, 500 for node-side failures.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rudi_core::types::{IntegrationReport, MetadataId};
use rudi_portal::SyncEngine;

use crate::error::{io_err, DaemonError};
use crate::protocol::ResponseError;

const ORIGIN: &str = "report callback";

pub fn router(engine: Arc<SyncEngine>) -> Router {
    Router::new()
        .route("/resources/:id/report", put(receive_report))
        .with_state(engine)
}

async fn receive_report(
    State(engine): State<Arc<SyncEngine>>,
    Path(id): Path<String>,
    body: Result<Json<IntegrationReport>, JsonRejection>,
) -> Response {
    let metadata_id: MetadataId = match id.parse() {
        Ok(metadata_id) => metadata_id,
        Err(err) => {
            return reject(
                StatusCode::BAD_REQUEST,
                ResponseError::new("invalid_request", format!("bad metadata id '{id}': {err}"), ORIGIN),
            )
        }
    };
    let Json(report) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return reject(
                StatusCode::BAD_REQUEST,
                ResponseError::new("invalid_report", rejection.body_text(), ORIGIN),
            )
        }
    };

    let report_id = report.report_id;
    match engine.reconcile(&metadata_id, &report_id, report).await {
        Ok(outcome) => {
            tracing::info!(
                metadata_id = %metadata_id,
                report_id = %report_id,
                state = ?outcome.state,
                "integration report reconciled",
            );
            (StatusCode::OK, Json(outcome.report)).into_response()
        }
        Err(err) => {
            let status = if err.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            tracing::warn!(
                metadata_id = %metadata_id,
                report_id = %report_id,
                error = %err,
                "integration report rejected",
            );
            reject(status, err.payload(ORIGIN).into())
        }
    }
}

fn reject(status: StatusCode, error: ResponseError) -> Response {
    (status, Json(error)).into_response()
}

/// Bind the callback listener. Kept apart from [`serve`] so bind failures
/// surface before the daemon reports itself running.
pub async fn bind(addr: &str) -> Result<TcpListener, DaemonError> {
    TcpListener::bind(addr).await.map_err(|source| DaemonError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve the callback router until a shutdown broadcast is received.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<SyncEngine>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(addr = ?local, "listening for portal reports");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            tracing::info!("report callback shutting down");
        })
        .await
        .map_err(|e| io_err("report callback", e))
}
