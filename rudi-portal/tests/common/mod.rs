//! Shared fixtures: a scripted Portal, signed tokens, sample records.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use rudi_core::config::PortalConfig;
use rudi_core::store::{MemoryStore, Store};
use rudi_core::types::{Media, MediaStatus, Metadata, MetadataId};
use rudi_portal::http::{Method, PortalRequest, PortalResponse, PortalTransport, TransportError};
use rudi_portal::SyncEngine;

pub const SIGNING_KEY: &str = include_str!("../fixtures/portal_signing_key.pem");
pub const FOREIGN_KEY: &str = include_str!("../fixtures/foreign_signing_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/portal_public_key.pem");

pub const TOKEN_URL: &str = "https://portal.test/oauth/token";
pub const CHECK_URL: &str = "https://portal.test/oauth/check_token";
pub const PUB_URL: &str = "https://portal.test/oauth/public_key";
pub const SUBMIT_URL: &str = "https://portal.test/api/konsult/v1/datasets";

pub fn metadata_url(id: &MetadataId) -> String {
    format!("{SUBMIT_URL}/{id}")
}

pub fn portal_config() -> PortalConfig {
    PortalConfig {
        portal_url: Some("https://portal.test/api".into()),
        auth_url: "https://portal.test/oauth".into(),
        auth_get: "token".into(),
        auth_chk: "check_token".into(),
        auth_pub: "public_key".into(),
        login: "node".into(),
        passw: "c2VjcmV0".into(),
        ..PortalConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// A canned answer. Replies are served in order; the last one is replayed.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Status(u16, String),
    Network(String),
}

impl Reply {
    fn into_result(self) -> Result<PortalResponse, TransportError> {
        match self {
            Reply::Ok(body) => Ok(PortalResponse::new(200, body)),
            Reply::Status(status, body) => Err(TransportError::Status { status, body }),
            Reply::Network(msg) => Err(TransportError::Network(msg)),
        }
    }
}

#[derive(Default)]
struct Script {
    pending: VecDeque<Reply>,
    last: Option<Reply>,
}

/// Unscripted routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Script>>,
    requests: Mutex<Vec<PortalRequest>>,
}

impl MockTransport {
    pub fn on(&self, method: Method, url: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .pending
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<PortalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    pub fn last(&self, method: Method, url: &str) -> Option<PortalRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method && r.url == url)
            .cloned()
    }

    /// Script the three auth endpoints with a valid token.
    pub fn with_valid_auth(&self) -> &Self {
        self.on(Method::Post, TOKEN_URL, Reply::Ok(token_answer(&portal_jwt(3600))))
            .on(Method::Get, PUB_URL, Reply::Ok(json!({ "value": PUBLIC_KEY })))
            .on(Method::Post, CHECK_URL, Reply::Ok(json!({ "active": true })))
    }
}

#[async_trait]
impl PortalTransport for MockTransport {
    async fn send(&self, request: PortalRequest) -> Result<PortalResponse, TransportError> {
        let key = (request.method, request.url.clone());
        self.requests.lock().unwrap().push(request);
        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes.get_mut(&key).and_then(|script| {
                if let Some(next) = script.pending.pop_front() {
                    script.last = Some(next);
                }
                script.last.clone()
            })
        };
        // Yield so concurrent callers interleave like real I/O.
        tokio::task::yield_now().await;
        reply
            .unwrap_or_else(|| Reply::Status(404, "no such route".into()))
            .into_result()
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub fn sign(key_pem: &str, claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(key_pem.as_bytes()).expect("signing key");
    jsonwebtoken::encode(&Header::new(Algorithm::RS512), claims, &key).expect("sign")
}

/// A Portal-signed user token expiring `ttl_secs` from now.
pub fn portal_jwt(ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    sign(
        SIGNING_KEY,
        &json!({
            "exp": now + ttl_secs,
            "iat": now,
            "user_name": "node",
            "jti": Uuid::new_v4().to_string(),
            "authorities": ["rudi-prod-admin"],
        }),
    )
}

pub fn token_answer(jwt: &str) -> Value {
    json!({
        "access_token": jwt,
        "token_type": "bearer",
        "scope": "read",
        "expires_in": 3599,
    })
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

pub fn media(status: MediaStatus) -> Media {
    Media {
        media_id: Uuid::new_v4(),
        media_name: Some("data.csv".into()),
        file_storage_status: status,
        file_status_update: Some(at(8, 0)),
        extra: Map::new(),
    }
}

/// A production record with one stored media, last edited at `updated_at`.
pub fn metadata(updated_at: DateTime<Utc>) -> Metadata {
    let mut meta = Metadata::new(MetadataId::new_v4(), "Air quality", updated_at);
    meta.media.push(media(MediaStatus::Available));
    meta.extra.insert(
        "metadata_info".into(),
        json!({ "api_version": "1.2.0", "source": "console" }),
    );
    meta
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MockTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(portal_config())
    }

    pub fn with_config(config: PortalConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::default());
        let engine = SyncEngine::new(config, store.clone(), transport.clone());
        Self {
            engine,
            store,
            transport,
        }
    }

    /// Harness whose auth endpoints hand out a valid token.
    pub fn authenticated() -> Self {
        let harness = Self::new();
        harness.transport.with_valid_auth();
        harness
    }

    pub async fn insert(&self, meta: &Metadata) -> Metadata {
        self.store.save_metadata(meta).await.expect("save metadata")
    }

    pub async fn load(&self, id: &MetadataId) -> Metadata {
        self.store
            .get_metadata_by_id(id)
            .await
            .expect("load metadata")
            .expect("metadata present")
    }
}
