/// Request middleware: trace context, authentication, rate limiting
///
/// The trace layer builds the RequestContext every other layer and handler
/// reads from request extensions, and echoes the trace id back in
/// X-Request-Id. The auth layer accepts either an API key (X-API-KEY, takes
/// precedence) or a bearer token, applies the plan-driven rate limits and
/// enriches the context with the caller. Public surfaces (webhooks) skip
/// auth but still pay the per-IP rate limit.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

use crate::api::envelope::failure;
use crate::api::AppState;
use crate::error::Error;
use crate::security::auth::{hash_api_key, ip_allowed, Caller};
use crate::security::RequestContext;
use crate::workspace::ratelimit::RateThresholds;
use crate::workspace::types::Feature;

/// Build the RequestContext and propagate the trace id
pub async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ip = client_ip(&request);

    let ctx = RequestContext { trace_id: trace_id.clone(), caller: None, workspace_id: None, ip };
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Ok(value) = header::HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Authenticate the request and apply the caller's rate limits
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(RequestContext::internal);

    // API key bypasses bearer when both are present
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string());

    let outcome = if let Some(raw_key) = api_key {
        authenticate_api_key(&state, &mut ctx, &raw_key).await
    } else if let Some(token) = bearer {
        authenticate_bearer(&state, &mut ctx, &token).await
    } else {
        Err(Error::TokenInvalid("missing credentials".to_string()))
    };
    if let Err(err) = outcome {
        return failure(&ctx, &err);
    }

    request.extensions_mut().insert(ctx);
    next.run(request).await
}

/// Per-IP rate limiting for unauthenticated surfaces
pub async fn public_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(RequestContext::internal);
    if let Err(err) = state.rate_limiter.check(&ctx.rate_subject(), RateThresholds::fallback()) {
        return failure(&ctx, &err);
    }
    next.run(request).await
}

async fn authenticate_api_key(
    state: &AppState,
    ctx: &mut RequestContext,
    raw_key: &str,
) -> crate::error::Result<()> {
    let key = state
        .workspaces
        .find_api_key_by_hash(&hash_api_key(raw_key))
        .await?
        .ok_or(Error::InvalidCredentials)?;
    if !key.is_active {
        return Err(Error::InvalidCredentials);
    }
    if let Some(expires_at) = &key.expires_at {
        if expires_at.as_str() < crate::workspace::storage::now_rfc3339().as_str() {
            return Err(Error::InvalidCredentials);
        }
    }
    if !ip_allowed(&key.allowed_ips, &ctx.ip) {
        return Err(Error::InvalidCredentials);
    }
    if !state.quota.feature_enabled(&key.workspace_id, Feature::ApiAccess).await? {
        return Err(Error::Forbidden(
            "the workspace plan does not include can_use_api_access".to_string(),
        ));
    }

    // Thresholds for API-key subjects come from the workspace plan
    let limits = state.quota.limits_for(&key.workspace_id).await?;
    state.rate_limiter.check(&key.id, RateThresholds::from_plan(&limits))?;

    state.workspaces.touch_api_key(&key.id).await?;
    ctx.caller = Some(Caller::ApiKey { key_id: key.id, workspace_id: key.workspace_id.clone() });
    ctx.workspace_id = Some(key.workspace_id);
    Ok(())
}

async fn authenticate_bearer(
    state: &AppState,
    ctx: &mut RequestContext,
    token: &str,
) -> crate::error::Result<()> {
    let claims = state.tokens.verify(token)?;
    state.rate_limiter.check(&claims.sub, RateThresholds::fallback())?;
    ctx.caller = Some(Caller::User { user_id: claims.sub });
    ctx.workspace_id = claims.wsp;
    Ok(())
}

fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return forwarded.trim().to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
