/// Wire-level response envelopes
///
/// Every success is `{status, code, message, traceId, timestamp, data}` and
/// every failure `{status: "error", code, traceId, timestamp, error_message,
/// error_code}`. The trace id comes from the request context and is echoed
/// in the X-Request-Id header by the trace middleware.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::Error;
use crate::security::RequestContext;
use crate::workspace::storage::now_rfc3339;

/// Wrap a payload in the success envelope
pub fn success<T: Serialize>(
    ctx: &RequestContext,
    code: StatusCode,
    message: &str,
    data: T,
) -> Response {
    let body = json!({
        "status": "success",
        "code": code.as_u16(),
        "message": message,
        "traceId": ctx.trace_id,
        "timestamp": now_rfc3339(),
        "data": data,
    });
    (code, Json(body)).into_response()
}

/// Wrap an error in the failure envelope; rate limits add Retry-After
pub fn failure(ctx: &RequestContext, err: &Error) -> Response {
    let status = err.status();
    let body = json!({
        "status": "error",
        "code": status.as_u16(),
        "traceId": ctx.trace_id,
        "timestamp": now_rfc3339(),
        "error_message": err.public_message(),
        "error_code": err.code(),
    });
    let mut response = (status, Json(body)).into_response();
    if let Error::RateLimited { retry_after } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Collapse a handler result into the right envelope
pub fn respond<T: Serialize>(
    ctx: &RequestContext,
    message: &str,
    result: crate::error::Result<T>,
) -> Response {
    match result {
        Ok(data) => success(ctx, StatusCode::OK, message, data),
        Err(err) => {
            if matches!(err, Error::Internal(_)) {
                tracing::error!("❌ Request {} failed internally: {:?}", ctx.trace_id, err);
            }
            failure(ctx, &err)
        }
    }
}
