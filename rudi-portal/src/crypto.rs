//! JWT verification against the Portal's RSA public key.

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PortalError;

/// Claims the engine reads from a Portal-issued JWT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalClaims {
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Present on tokens minted by the node for itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_mtd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortalClaims {
    /// A node-internal token: no `user_name`, but a `req_mtd` claim.
    pub fn is_node_internal(&self) -> bool {
        self.user_name.is_none() && self.req_mtd.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub header: Header,
    pub claims: PortalClaims,
}

/// Parse a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`).
pub fn read_public_key_pem(pem: &str) -> Result<DecodingKey, PortalError> {
    DecodingKey::from_rsa_pem(pem.trim().as_bytes())
        .map_err(|e| PortalError::AuthVerification(format!("unreadable portal public key: {e}")))
}

/// Check the signature and expiry of `jwt`.
pub fn verify_token(key: &DecodingKey, jwt: &str) -> Result<VerifiedToken, PortalError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.algorithms = vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<PortalClaims>(jwt, key, &validation)
        .map_err(|e| PortalError::AuthVerification(e.to_string()))?;
    Ok(VerifiedToken {
        header: data.header,
        claims: data.claims,
    })
}
