//! Domain types for the RUDI producer node.
//!
//! Only the fields the Portal synchronization engine reads or writes are
//! modelled; every other metadata property is carried through untouched in
//! the `extra` maps. All types are serializable/deserializable via serde.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The `global_id` of a metadata record (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataId(pub Uuid);

impl MetadataId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for MetadataId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for MetadataId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identifier of an integration report (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportId(pub Uuid);

impl ReportId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ReportId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ReportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Storage status of a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    /// At least one attached media is not yet confirmed stored.
    Pending,
    #[default]
    Online,
    Archived,
    Unavailable,
}

impl fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageStatus::Pending => write!(f, "pending"),
            StorageStatus::Online => write!(f, "online"),
            StorageStatus::Archived => write!(f, "archived"),
            StorageStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Storage status of a single media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Available,
    #[default]
    Missing,
    Removed,
    Archived,
}

/// Verdict of the Portal on a submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Ok,
    Ko,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Ok => write!(f, "OK"),
            ReportStatus::Ko => write!(f, "KO"),
        }
    }
}

/// Whether a record belongs to production data or to a test collection.
///
/// Serialized as the `collection_tag` string: absent for production.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Collection {
    #[default]
    Production,
    Test { tag: String },
}

impl Collection {
    pub fn is_production(&self) -> bool {
        matches!(self, Collection::Production)
    }
}

mod collection_tag {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Collection;

    pub fn serialize<S: Serializer>(value: &Collection, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Collection::Production => serializer.serialize_none(),
            Collection::Test { tag } => serializer.serialize_str(tag),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Collection, D::Error> {
        let tag = Option::<String>::deserialize(deserializer)?;
        Ok(match tag {
            Some(tag) if !tag.trim().is_empty() => Collection::Test { tag },
            _ => Collection::Production,
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// A media file attached to a metadata record (`available_formats` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub media_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_name: Option<String>,
    #[serde(default)]
    pub file_storage_status: MediaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_status_update: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A dataset metadata record as stored by this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub global_id: MetadataId,
    #[serde(default)]
    pub resource_title: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub storage_status: StorageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_error_id: Option<ReportId>,
    /// First successful Portal integration. Set once, never overwritten.
    #[serde(rename = "publishedAt", default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Last time the record was handed to the Portal dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "available_formats", default)]
    pub media: Vec<Media>,
    #[serde(
        rename = "collection_tag",
        default,
        skip_serializing_if = "Collection::is_production",
        with = "collection_tag"
    )]
    pub collection: Collection,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// A production record with no media, `Online`, last edited at `updated_at`.
    pub fn new(global_id: MetadataId, resource_title: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            global_id,
            resource_title: resource_title.into(),
            updated_at,
            storage_status: StorageStatus::Online,
            integration_error_id: None,
            published_at: None,
            portal_sent_at: None,
            media: Vec::new(),
            collection: Collection::Production,
            extra: Map::new(),
        }
    }

    pub fn is_every_media_available(&self) -> bool {
        self.media
            .iter()
            .all(|m| m.file_storage_status == MediaStatus::Available)
    }

    /// True while the record must not be exposed: pending storage or any
    /// media not confirmed stored.
    pub fn is_awaiting_media(&self) -> bool {
        self.storage_status == StorageStatus::Pending || !self.is_every_media_available()
    }

    /// Recompute `storage_status` from the media states.
    ///
    /// `Pending` while any media is not `Available`; otherwise the requested
    /// status, where a previous `Pending` resolves to `Online`.
    pub fn normalize_storage_status(&mut self) {
        let requested = match self.storage_status {
            StorageStatus::Pending => StorageStatus::Online,
            other => other,
        };
        self.storage_status = if self.is_every_media_available() {
            requested
        } else {
            StorageStatus::Pending
        };
    }

    /// Set `published_at` if it was never set. Returns whether it changed.
    pub fn mark_published(&mut self, now: DateTime<Utc>) -> bool {
        if self.published_at.is_some() {
            return false;
        }
        self.published_at = Some(now);
        true
    }
}

// ---------------------------------------------------------------------------
// Portal token
// ---------------------------------------------------------------------------

/// Access token obtained from the Portal auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalToken {
    #[serde(rename = "access_token")]
    pub jwt: String,
    /// Expiration, epoch seconds.
    pub exp: i64,
    /// Issue time, epoch seconds.
    #[serde(default)]
    pub issued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl PortalToken {
    pub fn is_expired(&self, now_epoch_s: i64) -> bool {
        self.exp < now_epoch_s
    }
}

// ---------------------------------------------------------------------------
// Integration report
// ---------------------------------------------------------------------------

/// One error raised by the Portal while integrating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(deserialize_with = "string_or_number")]
    pub error_code: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

/// Local annotation attached to a report by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReportError {
    #[serde(rename = "error_type")]
    pub kind: String,
    #[serde(rename = "error_message")]
    pub message: String,
}

/// The Portal's verdict on a submission, or a local diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub report_id: ReportId,
    pub resource_id: MetadataId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_title: Option<String>,
    #[serde(alias = "integration_status")]
    pub status: ReportStatus,
    #[serde(deserialize_with = "portal_date::deserialize")]
    pub submission_date: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "portal_date::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub treatment_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, alias = "integration_errors")]
    pub errors: Vec<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_error: Option<LocalReportError>,
}

impl IntegrationReport {
    /// The only local edit permitted on a report.
    pub fn attach_treatment_date(&mut self, date: DateTime<Utc>) {
        self.treatment_date = Some(date);
    }

    pub fn is_deletion(&self) -> bool {
        self.method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("DELETE"))
            .unwrap_or(false)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or a number, got {other}"
        ))),
    }
}

/// Portal dates arrive either as RFC 3339 strings or as
/// `[year, month, day, hour, minute, second, nanos]` arrays.
pub mod portal_date {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(DateTime<Utc>),
        Parts(Vec<i64>),
    }

    fn from_raw(raw: Raw) -> Result<DateTime<Utc>, String> {
        match raw {
            Raw::Text(date) => Ok(date),
            Raw::Parts(parts) => from_parts(&parts),
        }
    }

    /// Build a UTC date from a 6- or 7-element Portal date array.
    pub fn from_parts(parts: &[i64]) -> Result<DateTime<Utc>, String> {
        if parts.len() != 6 && parts.len() != 7 {
            return Err(format!("date array must have 6 or 7 elements, got {}", parts.len()));
        }
        let field = |i: usize| u32::try_from(parts[i]).map_err(|_| format!("invalid date component {}", parts[i]));
        let year = i32::try_from(parts[0]).map_err(|_| format!("invalid year {}", parts[0]))?;
        let nanos = if parts.len() == 7 { field(6)? } else { 0 };
        let (month, day) = (field(1)?, field(2)?);
        let (hour, minute, second) = (field(3)?, field(4)?, field(5)?);
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_nano_opt(hour, minute, second, nanos))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("out-of-range date array {parts:?}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        from_raw(Raw::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            Some(raw) => from_raw(raw).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
