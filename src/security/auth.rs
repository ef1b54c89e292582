/// Request-scoped identity and authorization context
///
/// Every HTTP entry point produces a RequestContext carrying the trace id,
/// the authenticated caller (bearer user or API key), the workspace the
/// caller acts in and the client IP. The context flows to components as an
/// explicit parameter; nothing here is thread-local.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Bearer-token user
    User { user_id: String },
    /// Workspace-scoped API key; bypasses bearer when both are present
    ApiKey { key_id: String, workspace_id: String },
}

impl Caller {
    /// Rate-limit subject in precedence order: key id, then user id
    pub fn subject(&self) -> &str {
        match self {
            Caller::ApiKey { key_id, .. } => key_id,
            Caller::User { user_id } => user_id,
        }
    }
}

/// Per-request identity context, built by the API middleware
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Propagated through logs and the X-Request-Id response header
    pub trace_id: String,
    /// None on unauthenticated surfaces (health check)
    pub caller: Option<Caller>,
    /// Workspace the caller acts in, when one is bound
    pub workspace_id: Option<String>,
    /// Client IP, the rate-limit subject of last resort
    pub ip: String,
}

impl RequestContext {
    /// Anonymous context for internal callers (loops, CLI, tests)
    pub fn internal() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            caller: None,
            workspace_id: None,
            ip: "127.0.0.1".to_string(),
        }
    }

    /// Rate-limit subject: API key id, else user id, else client IP
    pub fn rate_subject(&self) -> String {
        match &self.caller {
            Some(caller) => caller.subject().to_string(),
            None => format!("ip:{}", self.ip),
        }
    }
}

/// Bearer-token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id (USR-…)
    pub sub: String,
    /// Workspace the token is scoped to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wsp: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies bearer tokens per the configured HMAC key
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_minutes: i64,
}

impl TokenAuthority {
    pub fn new(auth: &AuthConfig) -> Result<Self> {
        let algorithm = match auth.jwt_algorithm.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unsupported JWT_ALGORITHM '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            encoding: EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
            algorithm,
            access_minutes: auth.access_token_minutes,
        })
    }

    /// Issue an access token for a user, optionally bound to a workspace
    pub fn issue(&self, user_id: &str, workspace_id: Option<&str>) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            wsp: workspace_id.map(|w| w.to_string()),
            iat: now,
            exp: now + self.access_minutes * 60,
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| Error::TokenInvalid(e.to_string()))
    }

    /// Verify a bearer token and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(self.algorithm);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::TokenInvalid(e.to_string()))
    }
}

/// Freshly generated API key material; the raw key is shown exactly once
#[derive(Debug)]
pub struct GeneratedApiKey {
    /// Full opaque key handed to the caller (never stored)
    pub raw: String,
    /// Public prefix kept for display ("mfk_1A2B3C4D")
    pub prefix: String,
    /// Last four characters kept for display
    pub last_four: String,
    /// SHA-256 hex digest, the only stored form
    pub hash: String,
}

/// Generate a new opaque API key plus its display/storage derivatives
pub fn generate_api_key() -> GeneratedApiKey {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    let raw = format!("mfk_{}", hex::encode_upper(bytes));
    GeneratedApiKey {
        prefix: raw[..12].to_string(),
        last_four: raw[raw.len() - 4..].to_string(),
        hash: hash_api_key(&raw),
        raw,
    }
}

/// Storage/lookup digest of a raw API key
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Check a client IP against an API key's allow-list (empty allows all)
pub fn ip_allowed(allowed_ips: &[String], ip: &str) -> bool {
    allowed_ips.is_empty() || allowed_ips.iter().any(|a| a == ip)
}
