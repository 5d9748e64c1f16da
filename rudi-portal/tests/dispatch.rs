mod common;

use std::time::Duration;

use chrono::Utc;
use rstest::rstest;
use serde_json::json;

use common::*;
use rudi_core::config::PortalConfig;
use rudi_core::store::Store;
use rudi_core::types::{Collection, MediaStatus, MetadataId, ReportId, StorageStatus};
use rudi_portal::http::{Method, RequestAuth, RequestBody};
use rudi_portal::{DispatchOutcome, PortalError, SkipReason};

fn posted_body(h: &Harness, method: Method) -> serde_json::Value {
    match h.transport.last(method, SUBMIT_URL).expect("submission").body {
        RequestBody::Json(body) => body,
        other => panic!("unexpected body {other:?}"),
    }
}

#[tokio::test]
async fn unknown_record_is_created_with_a_clean_payload() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    let report_id = ReportId::new_v4();
    h.transport
        .on(Method::Post, SUBMIT_URL, Reply::Ok(json!(report_id.to_string())));

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Created { report_id: Some(report_id) });

    let get = h.transport.last(Method::Get, &metadata_url(&meta.global_id)).unwrap();
    assert!(matches!(get.auth, RequestAuth::Bearer(_)));

    let body = posted_body(&h, Method::Post);
    assert_eq!(body["global_id"], json!(meta.global_id.to_string()));
    assert!(body.get("updatedAt").is_none());
    assert!(body.get("storage_status").is_none());
    assert!(body["available_formats"][0].get("file_storage_status").is_none());
    assert_eq!(body["metadata_info"]["api_version"], json!("1.3.0"));
    assert!(body["metadata_info"].get("source").is_none());

    let entry = h.engine.waiting_room().get(&meta.global_id, Utc::now()).unwrap();
    assert_eq!(entry.report_id, Some(report_id));
    assert_eq!(entry.updated_at, meta.updated_at);
    assert!(h.load(&meta.global_id).await.portal_sent_at.is_some());
}

#[tokio::test]
async fn report_id_may_be_wrapped_in_data() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    let report_id = ReportId::new_v4();
    h.transport.on(
        Method::Post,
        SUBMIT_URL,
        Reply::Ok(json!({ "data": report_id.to_string() })),
    );

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Created { report_id: Some(report_id) });
}

#[tokio::test]
async fn resending_an_unchanged_record_is_idempotent() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));

    let first = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(first, DispatchOutcome::Created { report_id: None });

    let second = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(
        second,
        DispatchOutcome::Skipped {
            reason: SkipReason::AlreadyWaiting
        }
    );
    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sends_of_one_version_submit_once() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));

    let (first, second) = tokio::join!(
        h.engine.send_metadata_to_portal(&meta.global_id),
        h.engine.send_metadata_to_portal(&meta.global_id),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 1);
    let waiting = outcomes
        .iter()
        .filter(|o| {
            **o == DispatchOutcome::Skipped {
                reason: SkipReason::AlreadyWaiting,
            }
        })
        .count();
    assert_eq!(waiting, 1, "outcomes: {outcomes:?}");
    assert!(outcomes.contains(&DispatchOutcome::Created { report_id: None }));
}

#[tokio::test]
async fn dispatched_version_is_remembered_only_once_it_reaches_the_portal() {
    let h = Harness::authenticated();
    let mut meta = metadata(at(10, 0));
    meta.media[0].file_storage_status = MediaStatus::Missing;
    let meta = h.insert(&meta).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));

    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(h.engine.last_dispatched(&meta.global_id), None);

    let mut stored = h.load(&meta.global_id).await;
    stored.media[0].file_storage_status = MediaStatus::Available;
    h.insert(&stored).await;
    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(h.engine.last_dispatched(&meta.global_id), Some(at(10, 0)));
}

#[tokio::test]
async fn newer_local_edit_is_sent_while_older_version_waits() {
    let h = Harness::authenticated();
    let mut meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));
    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();

    meta.updated_at = at(11, 0);
    h.insert(&meta).await;
    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Created { .. }));
    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 2);
}

#[rstest]
#[case::portal_older(at(9, 0), Some(Method::Put))]
#[case::same_date(at(10, 0), None)]
#[case::portal_newer(at(11, 0), None)]
#[tokio::test]
async fn update_decision_follows_portal_date(
    #[case] portal_date: chrono::DateTime<Utc>,
    #[case] expected_submit: Option<Method>,
) {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    let report_id = ReportId::new_v4();
    h.transport
        .on(
            Method::Get,
            &metadata_url(&meta.global_id),
            Reply::Ok(json!({
                "global_id": meta.global_id.to_string(),
                "metadata_info": { "metadata_dates": { "updated": portal_date.to_rfc3339() } }
            })),
        )
        .on(Method::Put, SUBMIT_URL, Reply::Ok(json!({ "report_id": report_id.to_string() })));

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();

    match expected_submit {
        Some(_) => {
            assert_eq!(outcome, DispatchOutcome::Updated { report_id: Some(report_id) });
            assert_eq!(h.transport.count(Method::Put, SUBMIT_URL), 1);
            assert!(h.engine.waiting_room().get(&meta.global_id, Utc::now()).is_some());
        }
        None => {
            assert_eq!(outcome, DispatchOutcome::AlreadyCurrent);
            assert_eq!(h.transport.count(Method::Put, SUBMIT_URL), 0);
            assert!(h.engine.waiting_room().is_empty(), "entry must be released");
        }
    }
    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 0);
}

#[tokio::test]
async fn portal_date_arrays_are_understood() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(
        Method::Get,
        &metadata_url(&meta.global_id),
        Reply::Ok(json!({ "updatedAt": [2024, 3, 1, 10, 0, 0, 0] })),
    );

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::AlreadyCurrent);
}

#[tokio::test]
async fn portal_copy_without_date_is_a_protocol_violation() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(
        Method::Get,
        &metadata_url(&meta.global_id),
        Reply::Ok(json!({ "resource_title": "Air quality" })),
    );

    let err = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap_err();
    assert!(matches!(err, PortalError::ProtocolViolation(_)), "got: {err}");

    let reports = h.store.all_reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].resource_id, meta.global_id);
    assert_eq!(reports[0].errors[0].error_code, "protocol");
    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 0);
}

#[tokio::test]
async fn media_gate_blocks_until_every_media_is_stored() {
    let h = Harness::authenticated();
    let mut meta = metadata(at(10, 0));
    meta.media.push(media(MediaStatus::Missing));
    let meta = h.insert(&meta).await;
    assert_eq!(meta.storage_status, StorageStatus::Pending);

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::MediaPending
        }
    );
    assert!(h.transport.requests().is_empty(), "no portal call while media pending");
    assert!(h.engine.waiting_room().is_empty());

    let mut ready = h.load(&meta.global_id).await;
    for m in &mut ready.media {
        m.file_storage_status = MediaStatus::Available;
    }
    h.insert(&ready).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));
    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Created { .. }));
}

#[tokio::test]
async fn test_collections_never_reach_the_portal() {
    let h = Harness::authenticated();
    let mut meta = metadata(at(10, 0));
    meta.collection = Collection::Test {
        tag: "integration".into(),
    };
    let meta = h.insert(&meta).await;

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::TestCollection
        }
    );
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn disabled_portal_connection_skips_everything() {
    let h = Harness::with_config(PortalConfig::default());
    let meta = h.insert(&metadata(at(10, 0))).await;

    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::PortalDisabled
        }
    );
    assert!(h.transport.requests().is_empty());
    assert!(matches!(
        h.engine.fetch_portal_metadata(&meta.global_id).await,
        Err(PortalError::Config(_))
    ));
}

#[tokio::test]
async fn unknown_metadata_is_not_found() {
    let h = Harness::authenticated();
    let err = h
        .engine
        .send_metadata_to_portal(&MetadataId::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::NotFound { kind: "metadata", .. }), "got: {err}");
}

#[tokio::test]
async fn failed_submission_is_reported_and_keeps_the_entry() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(
        Method::Post,
        SUBMIT_URL,
        Reply::Status(500, "internal error".into()),
    );

    let err = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap_err();
    assert!(
        matches!(err, PortalError::Communication { method: Method::Post, .. }),
        "got: {err}"
    );

    let reports = h.store.list_reports_for(&meta.global_id).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].errors[0].error_code, "500");
    let local = reports[0].local_error.as_ref().unwrap();
    assert_eq!(local.message, format!("POST {SUBMIT_URL}: HTTP 500: internal error"));

    assert!(h.engine.waiting_room().get(&meta.global_id, Utc::now()).is_some());
    let retry = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(
        retry,
        DispatchOutcome::Skipped {
            reason: SkipReason::AlreadyWaiting
        }
    );
}

#[tokio::test]
async fn network_failure_on_lookup_uses_communication_code() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(
        Method::Get,
        &metadata_url(&meta.global_id),
        Reply::Network("connection reset".into()),
    );

    let err = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap_err();
    assert!(matches!(err, PortalError::Communication { method: Method::Get, .. }));
    let reports = h.store.list_reports_for(&meta.global_id).await.unwrap();
    assert_eq!(reports[0].errors[0].error_code, "communication");
}

#[tokio::test]
async fn expired_entry_allows_a_resend() {
    let h = Harness::authenticated();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));
    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();

    let entry = h.engine.waiting_room().get(&meta.global_id, Utc::now()).unwrap();
    let timeout = h.engine.waiting_room().timeout();
    assert!(h
        .engine
        .waiting_room()
        .purge_expired(entry.wait_since + timeout)
        .is_empty());
    let purged = h
        .engine
        .waiting_room()
        .purge_expired(entry.wait_since + timeout + chrono::Duration::seconds(1));
    assert_eq!(purged.len(), 1);

    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert_eq!(h.transport.count(Method::Post, SUBMIT_URL), 2);
}

#[tokio::test]
async fn short_timeout_expires_entries_without_a_sweep() {
    let config = PortalConfig {
        waiting_room_timeout_secs: 1,
        ..portal_config()
    };
    let h = Harness::with_config(config);
    h.transport.with_valid_auth();
    let meta = h.insert(&metadata(at(10, 0))).await;
    h.transport.on(Method::Post, SUBMIT_URL, Reply::Ok(json!(null)));

    h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let outcome = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Created { .. }));
}

#[tokio::test]
async fn fetch_and_delete_portal_copies() {
    let h = Harness::authenticated();
    let id = MetadataId::new_v4();
    h.transport
        .on(Method::Get, &metadata_url(&id), Reply::Ok(json!({ "resource_title": "x" })))
        .on(Method::Delete, &metadata_url(&id), Reply::Ok(json!({ "status": "deleted" })));

    assert_eq!(
        h.engine.fetch_portal_metadata(&id).await.unwrap()["resource_title"],
        json!("x")
    );
    h.engine.delete_portal_metadata(&id).await.unwrap();
    assert_eq!(h.transport.count(Method::Delete, &metadata_url(&id)), 1);

    let missing = MetadataId::new_v4();
    assert!(matches!(
        h.engine.fetch_portal_metadata(&missing).await,
        Err(PortalError::NotFound { .. })
    ));
}

#[tokio::test]
async fn auth_failure_aborts_dispatch_before_any_portal_call() {
    let h = Harness::new();
    h.transport
        .on(Method::Post, TOKEN_URL, Reply::Network("refused".into()));
    let meta = h.insert(&metadata(at(10, 0))).await;

    let err = h.engine.send_metadata_to_portal(&meta.global_id).await.unwrap_err();
    assert!(matches!(err, PortalError::Auth { .. }), "got: {err}");
    assert_eq!(h.transport.count(Method::Get, &metadata_url(&meta.global_id)), 0);
}
