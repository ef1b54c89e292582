/// Worker runtime boundary
///
/// The scheduler hands a self-contained DispatchRecord across this boundary
/// and the runtime reports one WorkerResult per finished node on the result
/// channel. `dispatch` returning Ok means the runtime has acknowledged
/// receipt; everything after that (retries, per-attempt timeout, the final
/// FAILED on exhaustion) is the runtime's responsibility.
///
/// The embedded reference runtime executes Lua scripts: the script file is
/// loaded as a chunk, `params` is injected as a global table, and the
/// chunk's return value becomes `result_data`. Unrecognized `process_type`
/// values fail the node with SCRIPT_MISSING.

use async_trait::async_trait;
use mlua::LuaSerdeExt;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::execution::types::{DispatchRecord, OutputStatus, WorkerResult};

/// Contract between the input scheduler and a worker runtime
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Accept a dispatch for asynchronous execution. Ok(()) acknowledges
    /// receipt; the result arrives later on the runtime's result channel.
    async fn dispatch(&self, record: DispatchRecord) -> Result<()>;
}

/// In-process Lua worker runtime
pub struct LuaWorkerRuntime {
    results: mpsc::Sender<WorkerResult>,
}

impl LuaWorkerRuntime {
    pub fn new(results: mpsc::Sender<WorkerResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl WorkerRuntime for LuaWorkerRuntime {
    async fn dispatch(&self, record: DispatchRecord) -> Result<()> {
        tracing::debug!(
            "📨 Runtime accepted node {} of execution {} ({})",
            record.node_id,
            record.execution_id,
            record.script_path
        );
        let results = self.results.clone();
        tokio::spawn(async move {
            let result = run_node(&record).await;
            if results.send(result).await.is_err() {
                tracing::error!(
                    "❌ Result channel closed; dropping result for node {} of execution {}",
                    record.node_id,
                    record.execution_id
                );
            }
        });
        Ok(())
    }
}

/// Execute one dispatched node with the retry/timeout budget it carries
async fn run_node(record: &DispatchRecord) -> WorkerResult {
    let start = Instant::now();

    if record.process_type != "lua" {
        return WorkerResult::failure(
            &record.execution_id,
            &record.node_id,
            "SCRIPT_MISSING",
            format!("unsupported process type '{}'", record.process_type),
        );
    }
    let content = match std::fs::read_to_string(&record.script_path) {
        Ok(content) => content,
        Err(e) => {
            return WorkerResult::failure(
                &record.execution_id,
                &record.node_id,
                "SCRIPT_MISSING",
                format!("script artifact '{}' unreadable: {}", record.script_path, e),
            )
        }
    };

    let attempts = record.max_retries.max(0) as u64 + 1;
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        let chunk = content.clone();
        let params = record.params.clone();
        let ran = tokio::time::timeout(
            Duration::from_secs(record.timeout_seconds.max(1) as u64),
            tokio::task::spawn_blocking(move || execute_lua(&chunk, params)),
        )
        .await;
        match ran {
            Ok(Ok(Ok(result_data))) => {
                return WorkerResult {
                    execution_id: record.execution_id.clone(),
                    node_id: record.node_id.clone(),
                    status: OutputStatus::Success,
                    result_data,
                    duration: start.elapsed().as_secs_f64(),
                    error_message: None,
                    error_details: None,
                };
            }
            Ok(Ok(Err(e))) => {
                last_error = e;
                tracing::warn!(
                    "⚠️ Node {} attempt {}/{} failed: {}",
                    record.node_id,
                    attempt,
                    attempts,
                    last_error
                );
            }
            Ok(Err(join)) => {
                last_error = format!("worker task panicked: {}", join);
            }
            Err(_) => {
                last_error = format!("timed out after {}s", record.timeout_seconds);
                tracing::warn!(
                    "⏱️ Node {} attempt {}/{} timed out",
                    record.node_id,
                    attempt,
                    attempts
                );
            }
        }
    }

    let mut failure = WorkerResult::failure(
        &record.execution_id,
        &record.node_id,
        "INTERNAL_ERROR",
        format!("failed after {} attempts: {}", attempts, last_error),
    );
    failure.duration = start.elapsed().as_secs_f64();
    failure
}

/// Run a Lua chunk with `params` injected; the return value is the result
fn execute_lua(chunk: &str, params: serde_json::Map<String, Value>) -> std::result::Result<Value, String> {
    let lua = mlua::Lua::new();
    let params_table = lua
        .to_value(&Value::Object(params))
        .map_err(|e| format!("params conversion failed: {}", e))?;
    lua.globals()
        .set("params", params_table)
        .map_err(|e| format!("params injection failed: {}", e))?;
    let result: mlua::Value = lua
        .load(chunk)
        .eval()
        .map_err(|e| format!("script error: {}", e))?;
    lua.from_value(result).map_err(|e| format!("result conversion failed: {}", e))
}
