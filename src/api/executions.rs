/// Execution inspection and cancellation endpoints

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};

use crate::api::envelope::respond;
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::execution::types::Execution;
use crate::security::RequestContext;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
}

fn ensure_workspace(ctx: &RequestContext, execution: &Execution) -> Result<()> {
    match &ctx.workspace_id {
        Some(bound) if bound != &execution.workspace_id => {
            Err(Error::Forbidden("execution belongs to another workspace".to_string()))
        }
        _ => Ok(()),
    }
}

async fn get_execution(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let execution = state.executions.get_execution(&id).await?;
        ensure_workspace(&ctx, &execution)?;
        Ok(execution)
    }
    .await;
    respond(&ctx, "execution", result)
}

/// Set the cancel marker; in-flight dispatches are allowed to finish and
/// the finalizer closes the run as CANCELLED on its next pass
async fn cancel_execution(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let execution = state.executions.get_execution(&id).await?;
        ensure_workspace(&ctx, &execution)?;
        state.executions.request_cancel(&id).await?;
        tracing::info!("🛑 Cancellation requested for execution {} (trace {})", id, ctx.trace_id);
        state.executions.get_execution(&id).await
    }
    .await;
    respond(&ctx, "cancellation requested", result)
}
