//! Outbound HTTP to the Portal.
//!
//! The engine only talks to [`PortalTransport`]; [`UreqTransport`] is the
//! production implementation and tests script their own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

/// HTTP verbs used against the Portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAuth {
    None,
    Basic { user: String, password: String },
    Bearer(String),
}

impl RequestAuth {
    /// Value of the `Authorization` header, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            RequestAuth::None => None,
            RequestAuth::Basic { user, password } => {
                let raw = format!("{user}:{password}");
                Some(format!(
                    "Basic {}",
                    base64::engine::general_purpose::STANDARD.encode(raw)
                ))
            }
            RequestAuth::Bearer(token) => Some(format!("Bearer {token}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalRequest {
    pub method: Method,
    pub url: String,
    pub auth: RequestAuth,
    pub body: RequestBody,
}

impl PortalRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            auth: RequestAuth::None,
            body: RequestBody::Empty,
        }
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.auth = match token {
            Some(token) => RequestAuth::Bearer(token.to_string()),
            None => RequestAuth::None,
        };
        self
    }

    pub fn basic(mut self, user: &str, password: &str) -> Self {
        self.auth = RequestAuth::Basic {
            user: user.to_string(),
            password: password.to_string(),
        };
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Look up a form field. `None` for non-form bodies.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// A 2xx answer. Non-JSON bodies surface as `Value::String`, empty ones as
/// `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: Value,
}

impl PortalResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn from_text(status: u16, text: &str) -> Self {
        Self::new(status, parse_body(text))
    }
}

pub(crate) fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The Portal answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS, or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// The blocking worker running the request died.
    #[error("transport task failed: {0}")]
    Task(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn send(&self, request: PortalRequest) -> Result<PortalResponse, TransportError>;

    async fn get(&self, url: &str, token: Option<&str>) -> Result<PortalResponse, TransportError> {
        self.send(PortalRequest::new(Method::Get, url).bearer(token))
            .await
    }

    async fn post(&self, url: &str, token: Option<&str>, body: Value) -> Result<PortalResponse, TransportError> {
        self.send(PortalRequest::new(Method::Post, url).bearer(token).json(body))
            .await
    }

    async fn put(&self, url: &str, token: Option<&str>, body: Value) -> Result<PortalResponse, TransportError> {
        self.send(PortalRequest::new(Method::Put, url).bearer(token).json(body))
            .await
    }

    async fn delete(&self, url: &str, token: Option<&str>) -> Result<PortalResponse, TransportError> {
        self.send(PortalRequest::new(Method::Delete, url).bearer(token))
            .await
    }
}

// ---------------------------------------------------------------------------
// ureq implementation
// ---------------------------------------------------------------------------

/// [`PortalTransport`] over a blocking `ureq` agent, run on the blocking pool.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent }
    }

    fn call(agent: &ureq::Agent, request: PortalRequest) -> Result<PortalResponse, TransportError> {
        let mut call = agent.request(request.method.as_str(), &request.url);
        if let Some(header) = request.auth.header_value() {
            call = call.set("Authorization", &header);
        }
        let result = match &request.body {
            RequestBody::Empty => call.call(),
            RequestBody::Json(body) => call.send_json(body),
            RequestBody::Form(pairs) => {
                let pairs: Vec<(&str, &str)> = pairs
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                call.send_form(&pairs)
            }
        };
        match result {
            Ok(response) => {
                let status = response.status();
                let text = response
                    .into_string()
                    .map_err(|e| TransportError::Network(format!("reading response body: {e}")))?;
                Ok(PortalResponse::from_text(status, &text))
            }
            Err(ureq::Error::Status(status, response)) => Err(TransportError::Status {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(err)) => Err(TransportError::Network(err.to_string())),
        }
    }
}

#[async_trait]
impl PortalTransport for UreqTransport {
    async fn send(&self, request: PortalRequest) -> Result<PortalResponse, TransportError> {
        let agent = self.agent.clone();
        tracing::debug!(method = %request.method, url = %request.url, "portal request");
        tokio::task::spawn_blocking(move || Self::call(&agent, request))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
    }
}
