/// Error taxonomy shared by every layer
///
/// Each variant maps to a stable wire-level `error_code` and an HTTP status.
/// Node-level failures (reference resolution, script lookup) never fail the
/// whole request; they are recorded on the node's ExecutionOutput instead and
/// only reach this type when raised outside the execution loops.

use axum::http::StatusCode;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All failure modes the service can surface
#[derive(Debug, Error)]
pub enum Error {
    /// Request body or parameter failed decoding (HTTP 422)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Business-rule input violation in a create/update (HTTP 400)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup failure for any entity (HTTP 404)
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Unique-constraint collision (HTTP 409)
    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: &'static str, id: String },

    /// State-machine or invariant violation (HTTP 400)
    #[error("business rule violation: {0}")]
    BusinessRule(String),

    /// Plan limit reached for a workspace-scoped resource (HTTP 400)
    #[error("quota exceeded for {resource}: {current}/{limit}")]
    QuotaExceeded {
        resource: &'static str,
        current: i64,
        limit: i64,
    },

    /// Sliding-window threshold exceeded (HTTP 429)
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Caller authenticated but not allowed (HTTP 403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Bearer token missing, malformed or expired (HTTP 401)
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// API key unknown, inactive, expired or IP-restricted (HTTP 401)
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Trigger exists but is disabled or its workflow is not ACTIVE (HTTP 400)
    #[error("trigger disabled: {0}")]
    TriggerDisabled(String),

    /// A node's parameter templates could not be resolved (node-level)
    #[error("reference resolution failed: {0}")]
    ReferenceResolution(String),

    /// A resolved value is not assignable to the declared parameter type
    #[error("type mismatch for '{param}': expected {expected}, got {actual}")]
    TypeMismatch {
        param: String,
        expected: &'static str,
        actual: String,
    },

    /// An upstream node referenced by `${node:…}` has no SUCCESS output yet
    #[error("no successful output for upstream node {0}")]
    NodeOutputMissing(String),

    /// Dispatched script artifact is gone or its process type is unknown
    #[error("script missing: {0}")]
    ScriptMissing(String),

    /// Authentication tag did not verify when opening a sealed secret
    #[error("secret integrity check failed")]
    SecretIntegrity,

    /// Anything unexpected; details stay in the logs (HTTP 500)
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl Error {
    /// Stable wire-level code, never renamed once shipped
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::NotFound { .. } => "RESOURCE_NOT_FOUND",
            Error::AlreadyExists { .. } => "RESOURCE_ALREADY_EXISTS",
            Error::BusinessRule(_) => "BUSINESS_RULE_VIOLATION",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::TokenInvalid(_) => "TOKEN_INVALID",
            Error::InvalidCredentials => "INVALID_CREDENTIALS",
            Error::TriggerDisabled(_) => "TRIGGER_DISABLED",
            Error::ReferenceResolution(_) => "REFERENCE_RESOLUTION",
            Error::TypeMismatch { .. } => "TYPE_MISMATCH",
            Error::NodeOutputMissing(_) => "NODE_OUTPUT_MISSING",
            Error::ScriptMissing(_) => "SCRIPT_MISSING",
            Error::SecretIntegrity => "SECRET_INTEGRITY",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for request-level surfacing
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidInput(_)
            | Error::BusinessRule(_)
            | Error::QuotaExceeded { .. }
            | Error::TriggerDisabled(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyExists { .. } => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::TokenInvalid(_) | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            // Node-level kinds only reach the request path when something is
            // genuinely wrong outside the loops; surface them as 400.
            Error::ReferenceResolution(_)
            | Error::TypeMismatch { .. }
            | Error::NodeOutputMissing(_)
            | Error::ScriptMissing(_) => StatusCode::BAD_REQUEST,
            Error::SecretIntegrity | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message; internal errors never leak their source chain
    pub fn public_message(&self) -> String {
        match self {
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Internal(anyhow::Error::new(err).context("database error"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(anyhow::Error::new(err).context("json error"))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err)
    }
}
