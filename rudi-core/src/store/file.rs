//! JSON document store rooted at a home directory.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rudi/
//!   metadata/<global_id>.json   (one document per metadata record)
//!   reports/<report_id>.json    (integration reports, permanent audit trail)
//!   tokens/portal_token.json    (latest Portal access token: mode 0600)
//! ```
//!
//! # API pattern
//!
//! The blocking functions take an explicit `home` (`*_at`) so tests can use
//! a `TempDir`. [`FileStore`] implements the async [`Store`] trait on top of
//! them, moving the I/O to the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};
use crate::store::{ReportWrite, Store};
use crate::types::{IntegrationReport, Metadata, MetadataId, PortalToken, ReportId};

const TOKEN_FILE: &str = "portal_token.json";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.rudi/`
pub fn rudi_root(home: &Path) -> PathBuf {
    home.join(".rudi")
}

/// `<home>/.rudi/metadata/`
pub fn metadata_dir(home: &Path) -> PathBuf {
    rudi_root(home).join("metadata")
}

/// `<home>/.rudi/metadata/<id>.json` (pure, no I/O).
pub fn metadata_path_at(home: &Path, id: &MetadataId) -> PathBuf {
    metadata_dir(home).join(format!("{id}.json"))
}

/// `<home>/.rudi/reports/`
pub fn reports_dir(home: &Path) -> PathBuf {
    rudi_root(home).join("reports")
}

/// `<home>/.rudi/reports/<id>.json` (pure, no I/O).
pub fn report_path_at(home: &Path, id: &ReportId) -> PathBuf {
    reports_dir(home).join(format!("{id}.json"))
}

/// `<home>/.rudi/tokens/portal_token.json` (pure, no I/O).
pub fn token_path_at(home: &Path) -> PathBuf {
    rudi_root(home).join("tokens").join(TOKEN_FILE)
}

// ---------------------------------------------------------------------------
// 2. Generic document I/O
// ---------------------------------------------------------------------------

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Atomically write a JSON document.
///
/// Write flow: serialize → `.json.tmp` sibling → `rename`.
/// The `.tmp` file lives in the target directory (same filesystem).
fn write_document<T: Serialize>(path: &Path, value: &T, private: bool) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid document path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if private {
        set_file_permissions(&tmp)?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Blocking operations
// ---------------------------------------------------------------------------

pub fn load_metadata_at(home: &Path, id: &MetadataId) -> Result<Option<Metadata>, StoreError> {
    read_document(&metadata_path_at(home, id))
}

/// Normalise the storage status, then write `<home>/.rudi/metadata/<id>.json`.
pub fn save_metadata_at(home: &Path, metadata: &Metadata) -> Result<Metadata, StoreError> {
    let mut stored = metadata.clone();
    stored.normalize_storage_status();
    write_document(&metadata_path_at(home, &stored.global_id), &stored, false)?;
    Ok(stored)
}

pub fn load_token_at(home: &Path) -> Result<Option<PortalToken>, StoreError> {
    read_document(&token_path_at(home))
}

pub fn save_token_at(home: &Path, token: &PortalToken) -> Result<(), StoreError> {
    write_document(&token_path_at(home), token, true)
}

pub fn load_report_at(home: &Path, id: &ReportId) -> Result<Option<IntegrationReport>, StoreError> {
    read_document(&report_path_at(home, id))
}

pub fn save_report_at(home: &Path, report: &IntegrationReport) -> Result<ReportWrite, StoreError> {
    let path = report_path_at(home, &report.report_id);
    let write = if path.exists() {
        ReportWrite::Updated
    } else {
        ReportWrite::Created
    };
    write_document(&path, report, false)?;
    Ok(write)
}

/// Scan `<home>/.rudi/reports/*.json` for reports about `resource_id`.
///
/// Results are sorted deterministically (submission date, then report id).
pub fn list_reports_at(
    home: &Path,
    resource_id: &MetadataId,
) -> Result<Vec<IntegrationReport>, StoreError> {
    let dir = reports_dir(home);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(report) = read_document::<IntegrationReport>(&path)? {
            if report.resource_id == *resource_id {
                reports.push(report);
            }
        }
    }
    reports.sort_by(|a, b| {
        a.submission_date
            .cmp(&b.submission_date)
            .then_with(|| a.report_id.cmp(&b.report_id))
    });
    Ok(reports)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Async store
// ---------------------------------------------------------------------------

/// [`Store`] backed by JSON documents under `<home>/.rudi/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    home: PathBuf,
}

impl FileStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
    {
        let home = self.home.clone();
        tokio::task::spawn_blocking(move || op(&home))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_metadata_by_id(&self, id: &MetadataId) -> Result<Option<Metadata>, StoreError> {
        let id = *id;
        self.blocking(move |home| load_metadata_at(home, &id)).await
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<Metadata, StoreError> {
        let metadata = metadata.clone();
        self.blocking(move |home| save_metadata_at(home, &metadata))
            .await
    }

    async fn store_token(&self, token: &PortalToken) -> Result<(), StoreError> {
        let token = token.clone();
        self.blocking(move |home| save_token_at(home, &token)).await
    }

    async fn get_latest_token(&self) -> Result<Option<PortalToken>, StoreError> {
        self.blocking(load_token_at).await
    }

    async fn save_report(&self, report: &IntegrationReport) -> Result<ReportWrite, StoreError> {
        let report = report.clone();
        self.blocking(move |home| save_report_at(home, &report)).await
    }

    async fn get_report_by_id(&self, id: &ReportId) -> Result<Option<IntegrationReport>, StoreError> {
        let id = *id;
        self.blocking(move |home| load_report_at(home, &id)).await
    }

    async fn list_reports_for(
        &self,
        resource_id: &MetadataId,
    ) -> Result<Vec<IntegrationReport>, StoreError> {
        let resource_id = *resource_id;
        self.blocking(move |home| list_reports_at(home, &resource_id))
            .await
    }
}
