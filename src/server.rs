/// Server setup and initialization
///
/// Wires together all components: storages, accountants, the planner, the
/// trigger validator, the scheduler/collector/finalizer loops and the HTTP
/// routes. The loops coordinate only through the store, so this is also the
/// single place where the worker-result channel is strung between the
/// runtime and the collector.

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::execution::collector::OutputCollector;
use crate::execution::finalizer::ExecutionFinalizer;
use crate::execution::planner::ExecutionPlanner;
use crate::execution::reference::ReferenceResolver;
use crate::execution::runtime::LuaWorkerRuntime;
use crate::execution::scheduler::InputScheduler;
use crate::execution::storage::ExecutionStorage;
use crate::security::auth::TokenAuthority;
use crate::security::SecretBox;
use crate::workflow::cron::CronSchedulerService;
use crate::workflow::state::WorkflowStateMachine;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::trigger::TriggerValidator;
use crate::workspace::plans::PlanCatalog;
use crate::workspace::quota::QuotaAccountant;
use crate::workspace::ratelimit::RateLimiter;
use crate::workspace::storage::WorkspaceStorage;

/// Worker-result channel depth between runtime and collector
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Finalizer sweep cadence for deadlines and cancellations
const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Open the configured SQLite database, creating the file if needed
pub async fn connect_pool(config: &Config) -> Result<SqlitePool> {
    let dsn = &config.database.dsn;
    if dsn == ":memory:" {
        return Ok(SqlitePool::connect(":memory:").await?);
    }
    if let Some(parent) = std::path::Path::new(dsn).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let options = SqliteConnectOptions::new().filename(dsn).create_if_missing(true);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Fully wired service: HTTP state plus the spawned background loops
pub struct Service {
    pub state: AppState,
    pub finalizer: Arc<ExecutionFinalizer>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Service {
    /// Abort the background loops (tests and shutdown paths)
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Build every component and start the background loops
pub async fn build_service(config: Config, pool: SqlitePool) -> Result<Service> {
    tracing::info!("🏗️ Initializing storages");
    let secrets = Arc::new(SecretBox::new(&config.encryption_key));
    let workspaces = WorkspaceStorage::new(pool.clone(), Arc::clone(&secrets));
    workspaces.init_schema().await?;
    let workflows = WorkflowStorage::new(pool.clone());
    workflows.init_schema().await?;
    let executions = ExecutionStorage::new(pool.clone());
    executions.init_schema().await?;

    tracing::info!("📊 Loading plan catalog");
    let plans = Arc::new(PlanCatalog::with_defaults());
    plans.reload(&pool).await?;
    let quota = QuotaAccountant::new(pool.clone(), Arc::clone(&plans));
    let rate_limiter = Arc::new(RateLimiter::new());
    if config.redis.is_some() {
        tracing::warn!("⚠️ REDIS_HOST is set but this build keeps rate-limit counters in process memory");
    }
    let tokens = TokenAuthority::new(&config.auth)?;

    tracing::info!("⚙️ Wiring execution pipeline");
    let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    let runtime = Arc::new(LuaWorkerRuntime::new(results_tx.clone()));
    let resolver = ReferenceResolver::new(workspaces.clone(), executions.clone());
    let planner = ExecutionPlanner::new(
        workflows.clone(),
        executions.clone(),
        config.scheduler.execution_deadline_seconds,
    );
    let validator = Arc::new(TriggerValidator::new(
        workflows.clone(),
        executions.clone(),
        planner,
        quota.clone(),
    ));
    let finalizer = Arc::new(ExecutionFinalizer::new(executions.clone()));
    let scheduler = Arc::new(InputScheduler::new(
        executions.clone(),
        resolver,
        runtime,
        results_tx,
        config.scheduler.clone(),
    ));
    let collector = Arc::new(OutputCollector::new(
        executions.clone(),
        results_rx,
        Arc::clone(&finalizer),
        config.scheduler.output_batch_size,
    ));

    tracing::info!("⏰ Initializing cron scheduler service");
    let cron = Arc::new(CronSchedulerService::new(workflows.clone(), Arc::clone(&validator)).await?);
    cron.start().await?;

    tracing::info!("🚀 Spawning scheduler and collector loops");
    let mut handles = Arc::clone(&scheduler).spawn_loops();
    handles.push(Arc::clone(&collector).spawn());
    handles.push(Arc::clone(&finalizer).spawn_sweeper(SWEEP_INTERVAL));

    let state = AppState {
        workspaces,
        workflows: workflows.clone(),
        executions,
        state_machine: WorkflowStateMachine::new(workflows),
        validator,
        quota,
        rate_limiter,
        tokens,
        cron,
    };
    tracing::info!("✅ Service initialized");
    Ok(Service { state, finalizer, handles })
}

/// Assemble the HTTP router over a wired service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(api::api_routes(state.clone()))
        .merge(api::webhook_routes(state))
        .layer(axum::middleware::from_fn(api::middleware::trace_middleware))
}

/// Start the HTTP service plus the scheduler/collector loops
pub async fn start_server(config: Config) -> Result<()> {
    let pool = connect_pool(&config).await?;
    let service = build_service(config.clone(), pool).await?;
    let app = create_router(service.state.clone());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("📡 Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
