//! Portal access-token lifecycle.
//!
//! ## Renewal flow
//!
//! 1. POST the node credentials to the auth endpoint (form body + Basic auth).
//! 2. Verify the returned JWT with the Portal public key (fetched once).
//! 3. Have the Portal confirm the token on its check endpoint.
//! 4. Persist the token, then hand it out.
//!
//! A failed step aborts the renewal; nothing is stored. Concurrent callers
//! that all see an expired token share one renewal: the renewal lock is
//! followed by a re-read of the store.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::DecodingKey;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use rudi_core::config::PortalConfig;
use rudi_core::store::Store;
use rudi_core::types::PortalToken;

use crate::crypto::{self, VerifiedToken};
use crate::error::PortalError;
use crate::error_report::ErrorReporter;
use crate::http::{Method, PortalRequest, PortalTransport};

/// JSON field carrying the JWT in the auth endpoint's answer.
const FIELD_TOKEN: &str = "access_token";

const STEP_CREDENTIALS: &str = "posting node credentials";
const STEP_PUBLIC_KEY: &str = "fetching portal public key";
const STEP_CHECK: &str = "checking token with portal";
const STEP_VERIFY: &str = "verifying portal token";

pub struct TokenManager {
    config: Arc<PortalConfig>,
    store: Arc<dyn Store>,
    transport: Arc<dyn PortalTransport>,
    reporter: ErrorReporter,
    public_key: OnceCell<DecodingKey>,
    renewal: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        config: Arc<PortalConfig>,
        store: Arc<dyn Store>,
        transport: Arc<dyn PortalTransport>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            reporter,
            public_key: OnceCell::new(),
            renewal: Mutex::new(()),
        }
    }

    /// A verified, unexpired token: the stored one if still valid, otherwise
    /// a freshly renewed one.
    pub async fn get_portal_token(&self) -> Result<PortalToken, PortalError> {
        if let Some(token) = self.usable_stored_token().await? {
            return Ok(token);
        }

        let _guard = self.renewal.lock().await;
        // Another caller may have renewed while we waited for the lock.
        if let Some(token) = self.usable_stored_token().await? {
            return Ok(token);
        }
        tracing::debug!("portal token missing or expired, renewing");
        self.renew_locked().await
    }

    /// Obtain a new token from the Portal unconditionally.
    pub async fn renew(&self) -> Result<PortalToken, PortalError> {
        let _guard = self.renewal.lock().await;
        self.renew_locked().await
    }

    /// Ask the Portal to validate the latest stored token. Returns the
    /// Portal's answer.
    pub async fn check_stored_token(&self) -> Result<Value, PortalError> {
        let token = self
            .store
            .get_latest_token()
            .await?
            .ok_or_else(|| PortalError::not_found("portal token", "latest"))?;
        self.check_with_portal(&token.jwt).await
    }

    /// Verify `jwt` locally: signature, expiry, and that it was issued to a
    /// user rather than minted internally.
    pub async fn verify(&self, jwt: &str) -> Result<VerifiedToken, PortalError> {
        let key = self.public_key().await?;
        let verified = crypto::verify_token(key, jwt)?;
        if verified.claims.is_node_internal() {
            return Err(PortalError::Auth {
                step: STEP_VERIFY.into(),
                message: "token was issued by this node, not by the portal".into(),
            });
        }
        Ok(verified)
    }

    async fn usable_stored_token(&self) -> Result<Option<PortalToken>, PortalError> {
        let now = Utc::now().timestamp();
        match self.store.get_latest_token().await? {
            Some(token) if !token.is_expired(now) => {
                self.verify(&token.jwt).await?;
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    async fn renew_locked(&self) -> Result<PortalToken, PortalError> {
        let (login, password) = self.config.credentials()?;
        let url = self.config.auth_token_url();
        let request = PortalRequest::new(Method::Post, &url)
            .basic(&login, &password)
            .form([
                ("grant_type", "password"),
                ("scope", "read"),
                ("username", login.as_str()),
                ("password", password.as_str()),
            ]);

        let answer = match self.transport.send(request).await {
            Ok(answer) => answer,
            Err(err) => {
                self.reporter
                    .report_failure(None, STEP_CREDENTIALS, Method::Post, &url, &err)
                    .await;
                return Err(PortalError::Auth {
                    step: STEP_CREDENTIALS.into(),
                    message: err.to_string(),
                });
            }
        };

        let Some(jwt) = answer.body.get(FIELD_TOKEN).and_then(Value::as_str) else {
            return Err(self
                .reporter
                .protocol_violation(
                    None,
                    STEP_CREDENTIALS,
                    Method::Post,
                    &url,
                    format!("auth endpoint answered without a string `{FIELD_TOKEN}`"),
                )
                .await);
        };
        let jwt = jwt.to_string();

        let verified = self.verify(&jwt).await?;
        self.check_with_portal(&jwt).await?;

        let token = PortalToken {
            exp: verified.claims.exp,
            issued_at: verified
                .claims
                .iat
                .unwrap_or_else(|| Utc::now().timestamp()),
            token_type: answer
                .body
                .get("token_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            scope: answer
                .body
                .get("scope")
                .and_then(Value::as_str)
                .map(str::to_string),
            jti: verified.claims.jti.clone(),
            jwt,
        };
        self.store.store_token(&token).await?;
        tracing::info!(exp = token.exp, jti = ?token.jti, "new portal token stored");
        Ok(token)
    }

    async fn check_with_portal(&self, jwt: &str) -> Result<Value, PortalError> {
        let url = self.config.auth_check_url();
        let request = PortalRequest::new(Method::Post, &url).form([("token", jwt)]);
        match self.transport.send(request).await {
            Ok(answer) => {
                tracing::debug!("portal validated the token");
                Ok(answer.body)
            }
            Err(err) => {
                self.reporter
                    .report_failure(None, STEP_CHECK, Method::Post, &url, &err)
                    .await;
                Err(PortalError::Auth {
                    step: STEP_CHECK.into(),
                    message: err.to_string(),
                })
            }
        }
    }

    async fn public_key(&self) -> Result<&DecodingKey, PortalError> {
        self.public_key
            .get_or_try_init(|| self.fetch_public_key())
            .await
    }

    async fn fetch_public_key(&self) -> Result<DecodingKey, PortalError> {
        let (login, password) = self.config.credentials()?;
        let url = self.config.auth_public_key_url();
        let request = PortalRequest::new(Method::Get, &url).basic(&login, &password);
        let answer = match self.transport.send(request).await {
            Ok(answer) => answer,
            Err(err) => {
                self.reporter
                    .report_failure(None, STEP_PUBLIC_KEY, Method::Get, &url, &err)
                    .await;
                return Err(PortalError::Auth {
                    step: STEP_PUBLIC_KEY.into(),
                    message: err.to_string(),
                });
            }
        };

        let pem = match &answer.body {
            Value::String(pem) => Some(pem.as_str()),
            other => other.get("value").and_then(Value::as_str),
        };
        let Some(pem) = pem else {
            return Err(self
                .reporter
                .protocol_violation(
                    None,
                    STEP_PUBLIC_KEY,
                    Method::Get,
                    &url,
                    "public key answer has no `value` field".into(),
                )
                .await);
        };
        let key = crypto::read_public_key_pem(pem)?;
        tracing::debug!(url, "portal public key cached");
        Ok(key)
    }
}
