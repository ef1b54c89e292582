/// Input scheduler loop
///
/// Claims ready ExecutionInputs in priority/age order, resolves their
/// parameter templates, dispatches self-contained records to the worker
/// runtime and deletes each input once the runtime acknowledges receipt.
/// A crash before acknowledgement leaves the row claimed-but-present for a
/// later pass (at-least-once at the worker boundary; the runtime accepts
/// idempotently per (execution_id, node_id)).
///
/// Resolution failures are deterministic against snapshot state and are
/// never retried: the scheduler emits a synthetic FAILED result on the same
/// channel the workers use, so the collector treats both alike.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::execution::reference::ReferenceResolver;
use crate::execution::runtime::WorkerRuntime;
use crate::execution::storage::ExecutionStorage;
use crate::execution::types::{DispatchRecord, ExecutionInput, WorkerResult};

/// One set of claim/dispatch loops; several run in parallel
pub struct InputScheduler {
    executions: ExecutionStorage,
    resolver: ReferenceResolver,
    runtime: Arc<dyn WorkerRuntime>,
    results: mpsc::Sender<WorkerResult>,
    config: SchedulerConfig,
}

impl InputScheduler {
    pub fn new(
        executions: ExecutionStorage,
        resolver: ReferenceResolver,
        runtime: Arc<dyn WorkerRuntime>,
        results: mpsc::Sender<WorkerResult>,
        config: SchedulerConfig,
    ) -> Self {
        Self { executions, resolver, runtime, results, config }
    }

    /// Spawn the configured number of scheduler loops
    pub fn spawn_loops(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.input_loops.max(1))
            .map(|n| {
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move { scheduler.run_loop(n).await })
            })
            .collect()
    }

    /// Adaptive polling: empty claims back off exponentially toward the
    /// ceiling, a non-empty claim snaps back to the floor
    async fn run_loop(&self, loop_no: u32) {
        tracing::info!("🔁 Input scheduler loop {} started", loop_no);
        let floor = Duration::from_millis(self.config.poll_floor_ms.max(1));
        let ceiling = Duration::from_millis(self.config.poll_ceiling_ms.max(self.config.poll_floor_ms));
        let mut interval = floor;
        loop {
            match self.tick().await {
                Ok(0) => {
                    tokio::time::sleep(interval).await;
                    interval = (interval * 2).min(ceiling);
                }
                Ok(claimed) => {
                    tracing::debug!("⚙️ Loop {} dispatched {} inputs", loop_no, claimed);
                    interval = floor;
                }
                Err(e) => {
                    tracing::error!("❌ Scheduler loop {} iteration failed: {}", loop_no, e);
                    tokio::time::sleep(ceiling).await;
                }
            }
        }
    }

    /// One claim-and-dispatch pass; returns how many inputs were claimed.
    /// Exposed so tests can step the scheduler deterministically.
    pub async fn tick(&self) -> Result<usize> {
        let claimed = self.executions.claim_ready(self.config.input_batch_size).await?;
        for input in &claimed {
            self.process(input).await;
        }
        Ok(claimed.len())
    }

    async fn process(&self, input: &ExecutionInput) {
        let execution = match self.executions.get_execution(&input.execution_id).await {
            Ok(execution) => execution,
            Err(e) => {
                tracing::error!(
                    "❌ Claimed input {} has no execution, dropping: {}",
                    input.id,
                    e
                );
                let _ = self.executions.delete_input(&input.execution_id, &input.node_id).await;
                return;
            }
        };

        // Build the node's context against state as-it-is-now
        let params = match self.resolver.resolve(&execution, &input.params).await {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(
                    "🚫 Reference resolution failed for node '{}' of {}: {}",
                    input.node_name,
                    input.execution_id,
                    e
                );
                let failure = WorkerResult::failure(
                    &input.execution_id,
                    &input.node_id,
                    e.code(),
                    e.public_message(),
                );
                // Deterministic failure: remove the input, record the output
                let _ = self.executions.delete_input(&input.execution_id, &input.node_id).await;
                if self.results.send(failure).await.is_err() {
                    tracing::error!("❌ Result channel closed while reporting resolution failure");
                }
                return;
            }
        };

        let record = DispatchRecord {
            execution_id: input.execution_id.clone(),
            workspace_id: execution.workspace_id.clone(),
            workflow_id: execution.workflow_id.clone(),
            node_id: input.node_id.clone(),
            script_path: input.script_path.clone(),
            process_type: input.process_type.clone(),
            params,
            max_retries: input.max_retries,
            timeout_seconds: input.timeout_seconds,
        };
        match self.runtime.dispatch(record).await {
            Ok(()) => {
                // Acknowledged receipt removes the input from the ready set
                if let Err(e) =
                    self.executions.delete_input(&input.execution_id, &input.node_id).await
                {
                    tracing::error!("❌ Failed to delete dispatched input {}: {}", input.id, e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Dispatch of node '{}' not acknowledged, requeueing: {}",
                    input.node_name,
                    e
                );
                let _ = self.executions.release_claim(&input.id).await;
            }
        }
    }
}
