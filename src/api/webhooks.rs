/// Webhook trigger endpoints
///
/// One stable route per trigger id. The trigger validator applies the run
/// gate, payload validation and quota admission, so this handler only
/// parses the body and reports the admitted execution.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::any;
use axum::{Extension, Router};
use serde_json::{json, Value};

use crate::api::envelope::respond;
use crate::api::AppState;
use crate::error::Error;
use crate::security::RequestContext;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/{trigger_id}", any(fire_webhook))
}

async fn fire_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(trigger_id): Path<String>,
    body: String,
) -> Response {
    let result = async {
        let payload: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| Error::Validation(format!("invalid JSON payload: {}", e)))?
        };
        let execution = state.validator.start(&ctx, &trigger_id, payload).await?;
        tracing::info!(
            "📥 Webhook {} started execution {} (trace {})",
            trigger_id,
            execution.id,
            ctx.trace_id
        );
        Ok(json!({
            "execution_id": execution.id,
            "workflow_id": execution.workflow_id,
            "status": execution.status.as_str(),
        }))
    }
    .await;
    respond(&ctx, "webhook accepted", result)
}
