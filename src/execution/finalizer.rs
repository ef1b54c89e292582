/// Execution finalizer
///
/// Detects terminal conditions and closes executions exactly once:
/// - every planned node has an output (COMPLETED if all SUCCESS, else FAILED)
/// - the cancel marker is set (CANCELLED, recorded results suppressed)
/// - the execution-level deadline tripped (TIMEOUT)
/// The all-branches-unreachable case arrives here as "all outputs present"
/// because the collector writes synthetic outputs for cancelled descendants.
///
/// Closing aggregates per-node results into the execution row, deletes the
/// remaining queue rows and emits one terminal event on the broadcast
/// channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::execution::storage::ExecutionStorage;
use crate::execution::types::{Execution, ExecutionStatus, OutputStatus, TerminalEvent};

/// Closes executions and publishes terminal events
pub struct ExecutionFinalizer {
    executions: ExecutionStorage,
    events: broadcast::Sender<TerminalEvent>,
}

impl ExecutionFinalizer {
    pub fn new(executions: ExecutionStorage) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { executions, events }
    }

    /// Subscribe to terminal events (observer design is out of scope)
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.events.subscribe()
    }

    /// Re-evaluate one execution after a state transition. Returns the
    /// terminal status when this call closed it.
    pub async fn observe(&self, execution_id: &str) -> Result<Option<ExecutionStatus>> {
        let execution = self.executions.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(None);
        }

        if execution.cancel_requested {
            // In-flight results were recorded but stay out of the aggregate
            return self.close(&execution, ExecutionStatus::Cancelled, true).await;
        }

        if execution.status == ExecutionStatus::Running && execution.planned_node_count > 0 {
            let outputs = self.executions.count_outputs(execution_id).await?;
            if outputs >= execution.planned_node_count {
                let all_success = self
                    .executions
                    .outputs_of_execution(execution_id)
                    .await?
                    .iter()
                    .all(|o| o.status == OutputStatus::Success);
                let status =
                    if all_success { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
                return self.close(&execution, status, false).await;
            }
        }

        if deadline_passed(&execution) {
            tracing::warn!("⏱️ Execution {} exceeded its deadline", execution.id);
            return self.close(&execution, ExecutionStatus::Timeout, false).await;
        }

        Ok(None)
    }

    /// Periodic pass over running executions for deadline and cancellation;
    /// these conditions have no collector transition to piggyback on
    pub async fn sweep(&self) -> Result<usize> {
        let mut closed = 0;
        for execution in self.executions.running_executions().await? {
            if execution.cancel_requested || deadline_passed(&execution) {
                if self.observe(&execution.id).await?.is_some() {
                    closed += 1;
                }
            }
        }
        Ok(closed)
    }

    /// Spawn the background sweeper loop
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let finalizer = self;
        tokio::spawn(async move {
            tracing::info!("🧹 Finalizer sweeper started ({:?} interval)", every);
            loop {
                tokio::time::sleep(every).await;
                match finalizer.sweep().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("🧹 Sweeper closed {} executions", n),
                    Err(e) => tracing::error!("❌ Finalizer sweep failed: {}", e),
                }
            }
        })
    }

    async fn close(
        &self,
        execution: &Execution,
        status: ExecutionStatus,
        suppress_results: bool,
    ) -> Result<Option<ExecutionStatus>> {
        let results = if suppress_results {
            serde_json::json!({})
        } else {
            self.aggregate(&execution.id).await?
        };
        let duration = execution
            .started_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|started| {
                (chrono::Utc::now() - started.with_timezone(&chrono::Utc)).num_milliseconds() as f64
                    / 1000.0
            });

        let closed = self.executions.finalize(&execution.id, status, results, duration).await?;
        if !closed {
            // Another loop closed it first
            return Ok(None);
        }
        tracing::info!("🏁 Execution {} finalized as {}", execution.id, status.as_str());
        let _ = self.events.send(TerminalEvent {
            execution_id: execution.id.clone(),
            workflow_id: execution.workflow_id.clone(),
            workspace_id: execution.workspace_id.clone(),
            status,
        });
        Ok(Some(status))
    }

    /// `node name -> {status, result_data, duration, error_*}` aggregate
    async fn aggregate(&self, execution_id: &str) -> Result<serde_json::Value> {
        let outputs = self.executions.outputs_of_execution(execution_id).await?;
        let mut results = serde_json::Map::new();
        for output in outputs {
            let mut entry = serde_json::Map::new();
            entry.insert("node_id".to_string(), serde_json::json!(output.node_id));
            entry.insert("status".to_string(), serde_json::json!(output.status.as_str()));
            entry.insert("result_data".to_string(), output.result_data);
            entry.insert("duration".to_string(), serde_json::json!(output.duration_seconds));
            if let Some(message) = output.error_message {
                entry.insert("error_message".to_string(), serde_json::json!(message));
            }
            if let Some(details) = output.error_details {
                entry.insert("error_details".to_string(), details);
            }
            results.insert(output.node_name, serde_json::Value::Object(entry));
        }
        Ok(serde_json::Value::Object(results))
    }
}

fn deadline_passed(execution: &Execution) -> bool {
    execution
        .deadline_at
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .is_some_and(|deadline| chrono::Utc::now() > deadline.with_timezone(&chrono::Utc))
}
