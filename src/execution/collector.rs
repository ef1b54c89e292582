/// Output collector loop
///
/// Drains acknowledged worker results from the runtime boundary and ingests
/// each one: the ExecutionOutput insert, the downstream dependency-count
/// decrements and the unreachable-descendant cancellation happen in one
/// store transaction (see ExecutionStorage::ingest_result). After every
/// transition the finalizer re-evaluates whether the execution is terminal.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::execution::finalizer::ExecutionFinalizer;
use crate::execution::storage::ExecutionStorage;
use crate::execution::types::WorkerResult;

/// Ingests worker results and releases downstream work
pub struct OutputCollector {
    executions: ExecutionStorage,
    results: Mutex<mpsc::Receiver<WorkerResult>>,
    finalizer: Arc<ExecutionFinalizer>,
    batch_size: u32,
}

impl OutputCollector {
    pub fn new(
        executions: ExecutionStorage,
        results: mpsc::Receiver<WorkerResult>,
        finalizer: Arc<ExecutionFinalizer>,
        batch_size: u32,
    ) -> Self {
        Self { executions, results: Mutex::new(results), finalizer, batch_size }
    }

    /// Spawn the collector loop; it runs until the result channel closes
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("🔁 Output collector started");
            loop {
                let batch = self.next_batch().await;
                let Some(batch) = batch else {
                    tracing::info!("⏹️ Result channel closed, output collector stopping");
                    break;
                };
                for result in batch {
                    if let Err(e) = self.ingest(&result).await {
                        tracing::error!(
                            "❌ Failed to ingest result for node {} of {}: {}",
                            result.node_id,
                            result.execution_id,
                            e
                        );
                    }
                }
            }
        })
    }

    /// Block for one result, then opportunistically drain up to batch_size
    async fn next_batch(&self) -> Option<Vec<WorkerResult>> {
        let mut receiver = self.results.lock().await;
        let first = receiver.recv().await?;
        let mut batch = vec![first];
        while batch.len() < self.batch_size as usize {
            match receiver.try_recv() {
                Ok(result) => batch.push(result),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    /// Ingest one result and re-check the execution for terminality
    pub async fn ingest(&self, result: &WorkerResult) -> Result<()> {
        let report = self.executions.ingest_result(result).await?;
        if !report.fresh {
            tracing::debug!(
                "↩️ Duplicate result for node {} of {} ignored",
                result.node_id,
                result.execution_id
            );
            return Ok(());
        }
        tracing::debug!(
            "📥 Recorded {} output for node {} of {} ({} released, {} cancelled)",
            result.status.as_str(),
            result.node_id,
            result.execution_id,
            report.released,
            report.cancelled.len()
        );
        self.finalizer.observe(&result.execution_id).await?;
        Ok(())
    }

    /// Drain whatever is currently queued without blocking (test stepping)
    pub async fn drain_once(&self) -> Result<usize> {
        let pending: Vec<WorkerResult> = {
            let mut receiver = self.results.lock().await;
            let mut pending = Vec::new();
            while let Ok(result) = receiver.try_recv() {
                pending.push(result);
            }
            pending
        };
        let drained = pending.len();
        for result in pending {
            self.ingest(&result).await?;
        }
        Ok(drained)
    }
}
