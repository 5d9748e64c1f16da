//! Translation between local metadata documents and Portal JSON.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use rudi_core::types::{portal_date, Metadata, ReportId};

use crate::error::PortalError;

/// Top-level fields that only make sense on this node.
const LOCAL_ONLY_FIELDS: &[&str] = &[
    "updatedAt",
    "publishedAt",
    "portal_sent_at",
    "storage_status",
    "integration_error_id",
    "collection_tag",
];

/// Per-media fields that only make sense on this node.
const LOCAL_ONLY_MEDIA_FIELDS: &[&str] = &["file_storage_status", "file_status_update"];

/// Build the JSON body sent to the Portal for `metadata`.
pub fn portal_payload(metadata: &Metadata, api_version: &str) -> Result<Value, PortalError> {
    let mut value = serde_json::to_value(metadata).map_err(|e| PortalError::Store(e.into()))?;
    let Some(doc) = value.as_object_mut() else {
        return Err(PortalError::ProtocolViolation(
            "metadata did not serialize to a JSON object".into(),
        ));
    };

    for field in LOCAL_ONLY_FIELDS {
        doc.remove(*field);
    }

    if let Some(Value::Array(media)) = doc.get_mut("available_formats") {
        for item in media.iter_mut().filter_map(Value::as_object_mut) {
            for field in LOCAL_ONLY_MEDIA_FIELDS {
                item.remove(*field);
            }
        }
    }

    let mut info = take_object(doc, "metadata_info");
    info.insert("api_version".into(), Value::String(api_version.to_string()));
    info.remove("source");
    let mut dates = take_object(&mut info, "metadata_dates");
    dates.insert(
        "updated".into(),
        Value::String(metadata.updated_at.to_rfc3339()),
    );
    info.insert("metadata_dates".into(), Value::Object(dates));
    doc.insert("metadata_info".into(), Value::Object(info));

    Ok(value)
}

/// Remove `map[key]`, yielding it as an object (empty if absent or not one).
fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

/// Last-modification date of a Portal copy: `updatedAt`, else
/// `metadata_info.metadata_dates.updated`.
pub fn portal_updated_date(portal_copy: &Value) -> Option<DateTime<Utc>> {
    portal_copy
        .get("updatedAt")
        .and_then(parse_date)
        .or_else(|| {
            portal_copy
                .pointer("/metadata_info/metadata_dates/updated")
                .and_then(parse_date)
        })
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Array(items) => {
            let parts: Option<Vec<i64>> = items.iter().map(Value::as_i64).collect();
            portal_date::from_parts(&parts?).ok()
        }
        _ => None,
    }
}

/// The report id the Portal returns from a POST/PUT: a bare UUID string, or
/// a `data` / `report_id` field.
pub fn report_id_from_answer(answer: &Value) -> Option<ReportId> {
    let parse = |v: &Value| v.as_str().and_then(|s| s.trim_matches('"').parse::<ReportId>().ok());
    parse(answer)
        .or_else(|| answer.get("data").and_then(parse))
        .or_else(|| answer.get("report_id").and_then(parse))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rudi_core::types::{Collection, Media, MediaStatus, MetadataId, StorageStatus};
    use serde_json::json;
    use uuid::Uuid;

    fn sample() -> Metadata {
        let mut meta = Metadata::new(
            MetadataId::new_v4(),
            "Air quality",
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        );
        meta.storage_status = StorageStatus::Online;
        meta.published_at = Some(Utc::now());
        meta.portal_sent_at = Some(Utc::now());
        meta.integration_error_id = Some(ReportId::new_v4());
        meta.collection = Collection::Test { tag: "t".into() };
        meta.media.push(Media {
            media_id: Uuid::new_v4(),
            media_name: Some("data.csv".into()),
            file_storage_status: MediaStatus::Available,
            file_status_update: Some(Utc::now()),
            extra: Map::new(),
        });
        meta.extra.insert(
            "metadata_info".into(),
            json!({"api_version": "1.0.0", "source": "local", "metadata_provider": {"organization_name": "x"}}),
        );
        meta
    }

    #[test]
    fn payload_strips_local_fields_and_stamps_version() {
        let payload = portal_payload(&sample(), "1.3.0").unwrap();
        for field in LOCAL_ONLY_FIELDS {
            assert!(payload.get(*field).is_none(), "{field} leaked");
        }
        let media = &payload["available_formats"][0];
        assert!(media.get("file_storage_status").is_none());
        assert!(media.get("file_status_update").is_none());
        assert_eq!(media["media_name"], json!("data.csv"));

        let info = &payload["metadata_info"];
        assert_eq!(info["api_version"], json!("1.3.0"));
        assert!(info.get("source").is_none());
        assert_eq!(info["metadata_provider"]["organization_name"], json!("x"));
        assert_eq!(
            portal_updated_date(&payload),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn payload_creates_missing_metadata_info() {
        let meta = Metadata::new(MetadataId::new_v4(), "t", Utc::now());
        let payload = portal_payload(&meta, "1.3.0").unwrap();
        assert_eq!(payload["metadata_info"]["api_version"], json!("1.3.0"));
    }

    #[test]
    fn updated_date_prefers_top_level_and_accepts_arrays() {
        let copy = json!({
            "updatedAt": "2024-01-01T00:00:00Z",
            "metadata_info": {"metadata_dates": {"updated": "2023-01-01T00:00:00Z"}}
        });
        assert_eq!(
            portal_updated_date(&copy),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        let nested = json!({"metadata_info": {"metadata_dates": {"updated": [2023, 2, 3, 4, 5, 6]}}});
        assert_eq!(
            portal_updated_date(&nested),
            Some(Utc.with_ymd_and_hms(2023, 2, 3, 4, 5, 6).unwrap())
        );
        assert_eq!(portal_updated_date(&json!({"resource_title": "x"})), None);
    }

    #[test]
    fn report_id_from_bare_or_wrapped_answer() {
        let id = ReportId::new_v4();
        assert_eq!(report_id_from_answer(&json!(id.to_string())), Some(id));
        assert_eq!(report_id_from_answer(&json!({"data": id.to_string()})), Some(id));
        assert_eq!(report_id_from_answer(&json!({"report_id": id.to_string()})), Some(id));
        assert_eq!(report_id_from_answer(&json!({"data": "accepted"})), None);
        assert_eq!(report_id_from_answer(&Value::Null), None);
    }
}
