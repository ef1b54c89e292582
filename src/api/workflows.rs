/// Workflow state transitions, manual runs and the capability probe
///
/// State transitions cascade to the cron service so SCHEDULED triggers are
/// registered and removed in step with the run gate.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde_json::{json, Value};

use crate::api::envelope::respond;
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::security::RequestContext;
use crate::workflow::types::Workflow;
use crate::workspace::types::Feature;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/deactivate", post(deactivate_workflow))
        .route("/api/workflows/{id}/archive", post(archive_workflow))
        .route("/api/workflows/{id}/draft", post(draft_workflow))
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/triggers/{id}/run", post(run_trigger))
        .route("/api/workspaces/{id}/features/{feature}", get(feature_probe))
}

/// Reject callers bound to a different workspace
fn ensure_workspace(ctx: &RequestContext, workspace_id: &str) -> Result<()> {
    match &ctx.workspace_id {
        Some(bound) if bound != workspace_id => {
            Err(Error::Forbidden("resource belongs to another workspace".to_string()))
        }
        _ => Ok(()),
    }
}

async fn transition(
    state: &AppState,
    ctx: &RequestContext,
    workflow_id: &str,
    apply: impl std::future::Future<Output = Result<Workflow>>,
) -> Result<Workflow> {
    let workflow = state.workflows.get_workflow(workflow_id).await?;
    ensure_workspace(ctx, &workflow.workspace_id)?;
    let workflow = apply.await?;
    // Keep scheduled-trigger jobs in step with the run gate
    if let Err(e) = state.cron.reload_workflow(workflow_id).await {
        tracing::error!("❌ Cron reload after transition of {} failed: {}", workflow_id, e);
    }
    Ok(workflow)
}

async fn activate_workflow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = transition(&state, &ctx, &id, state.state_machine.activate(&id)).await;
    respond(&ctx, "workflow activated", result)
}

async fn deactivate_workflow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = transition(&state, &ctx, &id, state.state_machine.deactivate(&id)).await;
    respond(&ctx, "workflow deactivated", result)
}

async fn archive_workflow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = transition(&state, &ctx, &id, state.state_machine.archive(&id)).await;
    respond(&ctx, "workflow archived", result)
}

async fn draft_workflow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    let result = transition(&state, &ctx, &id, state.state_machine.set_draft(&id)).await;
    respond(&ctx, "workflow set to draft", result)
}

/// Manual start through the workflow's DEFAULT trigger
async fn run_workflow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let result = async {
        let payload: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| Error::Validation(format!("invalid JSON payload: {}", e)))?
        };
        let workflow = state.workflows.get_workflow(&id).await?;
        ensure_workspace(&ctx, &workflow.workspace_id)?;
        state.validator.start_default(&ctx, &id, payload).await
    }
    .await;
    respond(&ctx, "execution started", result)
}

/// Start through a specific named trigger
async fn run_trigger(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let result = async {
        let payload: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| Error::Validation(format!("invalid JSON payload: {}", e)))?
        };
        let trigger = state.workflows.get_trigger(&id).await?;
        let workflow = state.workflows.get_workflow(&trigger.workflow_id).await?;
        ensure_workspace(&ctx, &workflow.workspace_id)?;
        state.validator.start(&ctx, &id, payload).await
    }
    .await;
    respond(&ctx, "execution started", result)
}

/// Capability probe: answers yes/no for a (workspace, feature) pair.
/// `can_export_data` is probe-only; no export pipeline is attached.
async fn feature_probe(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((workspace_id, feature)): Path<(String, String)>,
) -> Response {
    let result = async {
        ensure_workspace(&ctx, &workspace_id)?;
        let feature = Feature::parse(&feature)
            .ok_or_else(|| Error::InvalidInput(format!("unknown feature '{}'", feature)))?;
        let enabled = state.quota.feature_enabled(&workspace_id, feature).await?;
        Ok(json!({ "feature": feature.as_str(), "enabled": enabled }))
    }
    .await;
    respond(&ctx, "feature probe", result)
}
