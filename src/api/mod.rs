/// HTTP API layer
///
/// The execution core's surface: workflow state transitions, execution
/// start/inspect/cancel, webhook trigger endpoints and the plan capability
/// probe. Resource CRUD lives in external surfaces; this router only
/// carries what the core itself exposes.

pub mod envelope;
pub mod executions;
pub mod middleware;
pub mod webhooks;
pub mod workflows;

use axum::Router;
use std::sync::Arc;

use crate::security::auth::TokenAuthority;
use crate::workflow::cron::CronSchedulerService;
use crate::workflow::state::WorkflowStateMachine;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::trigger::TriggerValidator;
use crate::workspace::quota::QuotaAccountant;
use crate::workspace::ratelimit::RateLimiter;
use crate::workspace::storage::WorkspaceStorage;

/// Shared application state for all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub workspaces: WorkspaceStorage,
    pub workflows: WorkflowStorage,
    pub executions: crate::execution::storage::ExecutionStorage,
    pub state_machine: WorkflowStateMachine,
    pub validator: Arc<TriggerValidator>,
    pub quota: QuotaAccountant,
    pub rate_limiter: Arc<RateLimiter>,
    pub tokens: TokenAuthority,
    pub cron: Arc<CronSchedulerService>,
}

/// Authenticated API routes (bearer or API key, rate limited)
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .merge(workflows::routes())
        .merge(executions::routes())
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state)
}

/// Public webhook routes (per-IP rate limited, no auth)
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .merge(webhooks::routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::public_rate_limit_middleware,
        ))
        .with_state(state)
}
