/// SQLite persistence for executions and their work queue
///
/// The scheduler and collector loops coordinate exclusively through these
/// tables, so every step that must be atomic is a single statement or a
/// single transaction:
/// - claiming ready inputs is one UPDATE … RETURNING, so concurrent loops
///   never hand the same input to two workers;
/// - ingesting a result inserts the output, decrements downstream
///   dependency counts and cancels unreachable descendants in one
///   transaction, so "output exists" and "downstream released" are atomic;
/// - ingest is keyed on (execution_id, node_id) and a duplicate delivery is
///   a no-op.

use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::execution::reference::{parse_reference, RefType};
use crate::execution::types::{
    Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState, OutputStatus,
    WorkerResult,
};
use crate::ids::{new_id, IdKind};
use crate::workflow::types::InputParam;
use crate::workspace::storage::now_rfc3339;

/// Per-node plan entry produced by the planner
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node_id: String,
    pub node_name: String,
    pub priority: i64,
    pub dependency_count: i64,
    pub max_retries: i64,
    pub timeout_seconds: i64,
    pub params: HashMap<String, InputParam>,
    pub script_name: String,
    pub script_path: String,
    pub process_type: String,
    /// Nodes reachable in one step, recorded so the collector can release
    /// dependents without re-reading the graph
    pub fanout: Vec<String>,
}

/// What one result ingest did
#[derive(Debug, Default)]
pub struct IngestReport {
    /// False when this (execution_id, node_id) result was already recorded
    pub fresh: bool,
    /// Inputs whose dependency_count reached zero in this pass
    pub released: u64,
    /// Node ids cancelled because they reference a failed upstream
    pub cancelled: Vec<String>,
}

/// Storage manager for the execution work queue
#[derive(Clone)]
pub struct ExecutionStorage {
    pool: SqlitePool,
}

impl ExecutionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the execution-layer tables (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                trigger_id TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                trigger_data JSON NOT NULL,
                results JSON NOT NULL DEFAULT '{}',
                planned_node_count INTEGER NOT NULL DEFAULT 0,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                deadline_at TEXT,
                started_at TEXT,
                ended_at TEXT,
                duration_seconds REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS execution_inputs (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                priority INTEGER NOT NULL,
                dependency_count INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                params JSON NOT NULL,
                script_name TEXT NOT NULL,
                script_path TEXT NOT NULL,
                process_type TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(execution_id, node_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS execution_outputs (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                status TEXT NOT NULL,
                result_data JSON NOT NULL,
                duration_seconds REAL NOT NULL,
                error_message TEXT,
                error_details JSON,
                created_at TEXT NOT NULL,
                UNIQUE(execution_id, node_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS execution_nodes (
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                fanout JSON NOT NULL,
                PRIMARY KEY(execution_id, node_id)
            )
            "#,
        ];
        for ddl in statements {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inputs_ready ON execution_inputs(state, priority, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- executions ----

    pub async fn create_execution(
        &self,
        workspace_id: &str,
        workflow_id: &str,
        trigger_id: Option<&str>,
        trigger_data: Value,
    ) -> Result<Execution> {
        let id = new_id(IdKind::Execution);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO executions (id, workspace_id, workflow_id, trigger_id, status, trigger_data, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(workflow_id)
        .bind(trigger_id)
        .bind(serde_json::to_string(&trigger_data)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_execution(&id).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "execution", id: id.to_string() })?;
        execution_from_row(&row)
    }

    /// Install the planner's snapshot and flip the execution to RUNNING,
    /// all in one transaction
    pub async fn install_plan(
        &self,
        execution_id: &str,
        planned: &[PlannedNode],
        deadline_seconds: i64,
    ) -> Result<()> {
        let now = now_rfc3339();
        let deadline =
            (chrono::Utc::now() + chrono::Duration::seconds(deadline_seconds)).to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for node in planned {
            sqlx::query(
                "INSERT INTO execution_nodes (execution_id, node_id, node_name, fanout) VALUES (?, ?, ?, ?)",
            )
            .bind(execution_id)
            .bind(&node.node_id)
            .bind(&node.node_name)
            .bind(serde_json::to_string(&node.fanout)?)
            .execute(&mut *tx)
            .await?;

            let state = if node.dependency_count > 0 { InputState::Waiting } else { InputState::Ready };
            sqlx::query(
                r#"
                INSERT INTO execution_inputs
                    (id, execution_id, node_id, node_name, priority, dependency_count, max_retries, timeout_seconds, params, script_name, script_path, process_type, state, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(new_id(IdKind::ExecutionInput))
            .bind(execution_id)
            .bind(&node.node_id)
            .bind(&node.node_name)
            .bind(node.priority)
            .bind(node.dependency_count)
            .bind(node.max_retries)
            .bind(node.timeout_seconds)
            .bind(serde_json::to_string(&node.params)?)
            .bind(&node.script_name)
            .bind(&node.script_path)
            .bind(&node.process_type)
            .bind(state.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"
            UPDATE executions
            SET status = 'RUNNING', planned_node_count = ?, started_at = ?, deadline_at = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(planned.len() as i64)
        .bind(&now)
        .bind(&deadline)
        .bind(&now)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- claim / dispatch bookkeeping ----

    /// Atomically claim up to `batch` ready inputs, highest priority first,
    /// then oldest first. Inputs of cancelled or non-running executions are
    /// never handed out.
    pub async fn claim_ready(&self, batch: u32) -> Result<Vec<ExecutionInput>> {
        let rows = sqlx::query(
            r#"
            UPDATE execution_inputs SET state = 'IN_FLIGHT'
            WHERE id IN (
                SELECT ei.id FROM execution_inputs ei
                JOIN executions e ON e.id = ei.execution_id
                WHERE ei.state = 'READY' AND ei.dependency_count = 0
                  AND e.status = 'RUNNING' AND e.cancel_requested = 0
                ORDER BY ei.priority DESC, ei.created_at ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(input_from_row).collect()
    }

    /// Hand a claimed input back to the ready set after a dispatch failure
    pub async fn release_claim(&self, input_id: &str) -> Result<()> {
        sqlx::query("UPDATE execution_inputs SET state = 'READY' WHERE id = ? AND state = 'IN_FLIGHT'")
            .bind(input_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove the input once the runtime has acknowledged the dispatch
    pub async fn delete_input(&self, execution_id: &str, node_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM execution_inputs WHERE execution_id = ? AND node_id = ?")
            .bind(execution_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn inputs_of_execution(&self, execution_id: &str) -> Result<Vec<ExecutionInput>> {
        let rows = sqlx::query("SELECT * FROM execution_inputs WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(input_from_row).collect()
    }

    // ---- result ingest ----

    /// Write an ExecutionOutput and release/cancel downstream inputs in one
    /// transaction. Re-delivery of the same (execution_id, node_id) result
    /// leaves the store untouched.
    pub async fn ingest_result(&self, result: &WorkerResult) -> Result<IngestReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = IngestReport::default();

        let names = self.node_names_tx(&mut tx, &result.execution_id).await?;
        let Some(node_name) = names.get(&result.node_id).cloned() else {
            // A result for an unplanned or already-finalized execution
            tracing::warn!(
                "⚠️ Dropping result for unknown node {} of execution {}",
                result.node_id,
                result.execution_id
            );
            tx.commit().await?;
            return Ok(report);
        };

        let inserted = insert_output_tx(
            &mut tx,
            &result.execution_id,
            &result.node_id,
            &node_name,
            result.status,
            &result.result_data,
            result.duration,
            result.error_message.as_deref(),
            result.error_details.as_ref(),
        )
        .await?;
        if !inserted {
            tx.commit().await?;
            return Ok(report);
        }
        report.fresh = true;

        // Dependency release happens in the same transaction as the insert
        report.released += decrement_fanout_tx(&mut tx, &result.execution_id, &result.node_id).await?;

        // A failed node renders every descendant that reads its output
        // unreachable; cancel those in the same pass, transitively
        if result.status == OutputStatus::Failed {
            let mut failed_queue = vec![result.node_id.clone()];
            while let Some(failed_id) = failed_queue.pop() {
                let failed_name = names.get(&failed_id).cloned().unwrap_or_default();
                let dependents =
                    dependents_referencing_tx(&mut tx, &result.execution_id, &failed_id, &failed_name)
                        .await?;
                for dependent in dependents {
                    let inserted = insert_output_tx(
                        &mut tx,
                        &result.execution_id,
                        &dependent.node_id,
                        &dependent.node_name,
                        OutputStatus::Failed,
                        &Value::Null,
                        0.0,
                        Some(&format!("upstream node '{}' failed", failed_name)),
                        Some(&serde_json::json!({
                            "code": "NODE_OUTPUT_MISSING",
                            "upstream": failed_id,
                        })),
                    )
                    .await?;
                    if !inserted {
                        continue;
                    }
                    sqlx::query("DELETE FROM execution_inputs WHERE id = ?")
                        .bind(&dependent.id)
                        .execute(&mut *tx)
                        .await?;
                    report.released +=
                        decrement_fanout_tx(&mut tx, &result.execution_id, &dependent.node_id).await?;
                    report.cancelled.push(dependent.node_id.clone());
                    failed_queue.push(dependent.node_id);
                }
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn node_names_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        execution_id: &str,
    ) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT node_id, node_name FROM execution_nodes WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("node_id"), row.get::<String, _>("node_name")))
            .collect())
    }

    // ---- lookups for the resolver and the finalizer ----

    /// name-or-id -> node id, from the planner's snapshot
    pub async fn node_directory(&self, execution_id: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT node_id, node_name FROM execution_nodes WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        let mut directory = HashMap::new();
        for row in rows {
            let node_id: String = row.get("node_id");
            let node_name: String = row.get("node_name");
            directory.insert(node_name, node_id.clone());
            directory.insert(node_id.clone(), node_id);
        }
        Ok(directory)
    }

    /// node id -> result_data of its SUCCESS output
    pub async fn success_outputs_by_node(
        &self,
        execution_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let rows = sqlx::query(
            "SELECT node_id, result_data FROM execution_outputs WHERE execution_id = ? AND status = 'SUCCESS'",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        let mut outputs = HashMap::new();
        for row in rows {
            let node_id: String = row.get("node_id");
            let data_json: String = row.get("result_data");
            outputs.insert(node_id, serde_json::from_str(&data_json)?);
        }
        Ok(outputs)
    }

    pub async fn outputs_of_execution(&self, execution_id: &str) -> Result<Vec<ExecutionOutput>> {
        let rows = sqlx::query("SELECT * FROM execution_outputs WHERE execution_id = ? ORDER BY created_at ASC")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(output_from_row).collect()
    }

    pub async fn count_outputs(&self, execution_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM execution_outputs WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ---- cancellation / finalization ----

    /// Set the cancel marker; both loops observe it on their next pass
    pub async fn request_cancel(&self, execution_id: &str) -> Result<()> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(Error::BusinessRule(format!(
                "execution is already {}",
                execution.status.as_str()
            )));
        }
        sqlx::query("UPDATE executions SET cancel_requested = 1, updated_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn running_executions(&self) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = 'RUNNING'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(execution_from_row).collect()
    }

    /// Close an execution: write the aggregate, stamp times, delete the
    /// remaining queue rows. Returns false when someone else already
    /// finalized it.
    pub async fn finalize(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        results: Value,
        duration_seconds: Option<f64>,
    ) -> Result<bool> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, results = ?, ended_at = ?, duration_seconds = ?, updated_at = ?
            WHERE id = ? AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(&results)?)
        .bind(&now)
        .bind(duration_seconds)
        .bind(&now)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected == 0 {
            tx.commit().await?;
            return Ok(false);
        }
        for table in ["execution_inputs", "execution_outputs", "execution_nodes"] {
            let sql = format!("DELETE FROM {} WHERE execution_id = ?", table);
            sqlx::query(&sql).bind(execution_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

/// Inputs (not yet in flight) whose params reference the failed node
async fn dependents_referencing_tx(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: &str,
    failed_id: &str,
    failed_name: &str,
) -> Result<Vec<ExecutionInput>> {
    let rows = sqlx::query(
        "SELECT * FROM execution_inputs WHERE execution_id = ? AND state != 'IN_FLIGHT'",
    )
    .bind(execution_id)
    .fetch_all(&mut **tx)
    .await?;
    let mut dependents = Vec::new();
    for row in &rows {
        let input = input_from_row(row)?;
        if input_references_node(&input.params, failed_id, failed_name) {
            dependents.push(input);
        }
    }
    Ok(dependents)
}

fn input_references_node(
    params: &HashMap<String, InputParam>,
    node_id: &str,
    node_name: &str,
) -> bool {
    params.values().any(|param| {
        matches!(
            parse_reference(&param.value),
            Some(Ok(reference))
                if reference.ref_type == RefType::Node
                    && (reference.target == node_id || reference.target == node_name)
        )
    })
}

#[allow(clippy::too_many_arguments)]
async fn insert_output_tx(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: &str,
    node_id: &str,
    node_name: &str,
    status: OutputStatus,
    result_data: &Value,
    duration: f64,
    error_message: Option<&str>,
    error_details: Option<&Value>,
) -> Result<bool> {
    let affected = sqlx::query(
        r#"
        INSERT INTO execution_outputs
            (id, execution_id, node_id, node_name, status, result_data, duration_seconds, error_message, error_details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(execution_id, node_id) DO NOTHING
        "#,
    )
    .bind(new_id(IdKind::ExecutionOutput))
    .bind(execution_id)
    .bind(node_id)
    .bind(node_name)
    .bind(status.as_str())
    .bind(serde_json::to_string(result_data)?)
    .bind(duration)
    .bind(error_message)
    .bind(error_details.map(serde_json::to_string).transpose()?)
    .bind(now_rfc3339())
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

/// Decrement dependency counts of the node's fanout; WAITING inputs whose
/// count reaches zero flip to READY. Returns how many became ready.
async fn decrement_fanout_tx(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: &str,
    node_id: &str,
) -> Result<u64> {
    let row = sqlx::query("SELECT fanout FROM execution_nodes WHERE execution_id = ? AND node_id = ?")
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(row) = row else { return Ok(0) };
    let fanout_json: String = row.get("fanout");
    let fanout: Vec<String> = serde_json::from_str(&fanout_json)?;
    if fanout.is_empty() {
        return Ok(0);
    }

    let mut released = 0;
    for downstream in &fanout {
        sqlx::query(
            "UPDATE execution_inputs SET dependency_count = MAX(0, dependency_count - 1) \
             WHERE execution_id = ? AND node_id = ?",
        )
        .bind(execution_id)
        .bind(downstream)
        .execute(&mut **tx)
        .await?;
        released += sqlx::query(
            "UPDATE execution_inputs SET state = 'READY' \
             WHERE execution_id = ? AND node_id = ? AND dependency_count = 0 AND state = 'WAITING'",
        )
        .bind(execution_id)
        .bind(downstream)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }
    Ok(released)
}

fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Execution> {
    let status_str: String = row.get("status");
    let status = ExecutionStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt execution status '{}'", status_str)))?;
    let trigger_data_json: String = row.get("trigger_data");
    let results_json: String = row.get("results");
    Ok(Execution {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        workflow_id: row.get("workflow_id"),
        trigger_id: row.get("trigger_id"),
        status,
        trigger_data: serde_json::from_str(&trigger_data_json)?,
        results: serde_json::from_str(&results_json)?,
        planned_node_count: row.get("planned_node_count"),
        cancel_requested: row.get::<i64, _>("cancel_requested") != 0,
        deadline_at: row.get("deadline_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        duration_seconds: row.get("duration_seconds"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn input_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionInput> {
    let state_str: String = row.get("state");
    let state = InputState::parse(&state_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt input state '{}'", state_str)))?;
    let params_json: String = row.get("params");
    Ok(ExecutionInput {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        node_name: row.get("node_name"),
        priority: row.get("priority"),
        dependency_count: row.get("dependency_count"),
        max_retries: row.get("max_retries"),
        timeout_seconds: row.get("timeout_seconds"),
        params: serde_json::from_str(&params_json)?,
        script_name: row.get("script_name"),
        script_path: row.get("script_path"),
        process_type: row.get("process_type"),
        state,
        created_at: row.get("created_at"),
    })
}

fn output_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionOutput> {
    let status_str: String = row.get("status");
    let status = OutputStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt output status '{}'", status_str)))?;
    let result_json: String = row.get("result_data");
    let details_json: Option<String> = row.get("error_details");
    Ok(ExecutionOutput {
        id: row.get("id"),
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        node_name: row.get("node_name"),
        status,
        result_data: serde_json::from_str(&result_json)?,
        duration_seconds: row.get("duration_seconds"),
        error_message: row.get("error_message"),
        error_details: details_json.as_deref().map(serde_json::from_str).transpose()?,
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::ParamType;
    use serde_json::json;

    async fn storage() -> ExecutionStorage {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        let storage = ExecutionStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn planned(node_id: &str, name: &str, deps: i64, fanout: &[&str]) -> PlannedNode {
        PlannedNode {
            node_id: node_id.to_string(),
            node_name: name.to_string(),
            priority: 1,
            dependency_count: deps,
            max_retries: 3,
            timeout_seconds: 300,
            params: HashMap::new(),
            script_name: "echo".to_string(),
            script_path: "/tmp/echo.lua".to_string(),
            process_type: "lua".to_string(),
            fanout: fanout.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn planned_with_ref(node_id: &str, name: &str, deps: i64, fanout: &[&str], upstream: &str) -> PlannedNode {
        let mut node = planned(node_id, name, deps, fanout);
        node.params.insert(
            "y".to_string(),
            InputParam {
                param_type: ParamType::String,
                value: json!(format!("${{node:{}.ok}}", upstream)),
                required: true,
                default: None,
                description: None,
            },
        );
        node
    }

    fn success(execution_id: &str, node_id: &str) -> WorkerResult {
        WorkerResult {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status: OutputStatus::Success,
            result_data: json!({"ok": true}),
            duration: 0.1,
            error_message: None,
            error_details: None,
        }
    }

    async fn linear_execution(storage: &ExecutionStorage) -> Execution {
        let execution = storage
            .create_execution("WSP-A", "WFL-A", None, json!({"seed": 7}))
            .await
            .unwrap();
        let plan = vec![
            planned("NOD-A", "A", 0, &["NOD-B"]),
            planned_with_ref("NOD-B", "B", 1, &["NOD-C"], "A"),
            planned_with_ref("NOD-C", "C", 1, &[], "B"),
        ];
        storage.install_plan(&execution.id, &plan, 300).await.unwrap();
        storage.get_execution(&execution.id).await.unwrap()
    }

    #[tokio::test]
    async fn plan_installation_marks_running_and_partitions_states() {
        let storage = storage().await;
        let execution = linear_execution(&storage).await;
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.planned_node_count, 3);

        let inputs = storage.inputs_of_execution(&execution.id).await.unwrap();
        assert_eq!(inputs.len(), 3);
        let by_node: HashMap<_, _> = inputs.iter().map(|i| (i.node_id.as_str(), i)).collect();
        assert_eq!(by_node["NOD-A"].state, InputState::Ready);
        assert_eq!(by_node["NOD-B"].state, InputState::Waiting);
        assert_eq!(by_node["NOD-B"].dependency_count, 1);
    }

    #[tokio::test]
    async fn claim_only_hands_out_ready_inputs_once() {
        let storage = storage().await;
        let execution = linear_execution(&storage).await;

        let first = storage.claim_ready(10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].node_id, "NOD-A");
        // Claim again: A is IN_FLIGHT, B/C are WAITING
        assert!(storage.claim_ready(10).await.unwrap().is_empty());

        storage.delete_input(&execution.id, "NOD-A").await.unwrap();
        storage.ingest_result(&success(&execution.id, "NOD-A")).await.unwrap();
        let second = storage.claim_ready(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].node_id, "NOD-B");
    }

    #[tokio::test]
    async fn higher_priority_claims_first() {
        let storage = storage().await;
        let low = storage.create_execution("WSP-A", "WFL-L", None, json!({})).await.unwrap();
        storage.install_plan(&low.id, &[planned("NOD-L", "L", 0, &[])], 300).await.unwrap();
        let high = storage.create_execution("WSP-A", "WFL-H", None, json!({})).await.unwrap();
        let mut urgent = planned("NOD-H", "H", 0, &[]);
        urgent.priority = 9;
        storage.install_plan(&high.id, &[urgent], 300).await.unwrap();

        let claimed = storage.claim_ready(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].node_id, "NOD-H");
    }

    #[tokio::test]
    async fn ingest_decrements_atomically_and_is_idempotent() {
        let storage = storage().await;
        let execution = linear_execution(&storage).await;
        storage.claim_ready(1).await.unwrap();
        storage.delete_input(&execution.id, "NOD-A").await.unwrap();

        let report = storage.ingest_result(&success(&execution.id, "NOD-A")).await.unwrap();
        assert!(report.fresh);
        assert_eq!(report.released, 1);

        let inputs = storage.inputs_of_execution(&execution.id).await.unwrap();
        let b = inputs.iter().find(|i| i.node_id == "NOD-B").unwrap();
        assert_eq!(b.dependency_count, 0);
        assert_eq!(b.state, InputState::Ready);

        // Second delivery of the same result is a no-op (P4)
        let replay = storage.ingest_result(&success(&execution.id, "NOD-A")).await.unwrap();
        assert!(!replay.fresh);
        assert_eq!(replay.released, 0);
        let inputs = storage.inputs_of_execution(&execution.id).await.unwrap();
        let b = inputs.iter().find(|i| i.node_id == "NOD-B").unwrap();
        assert_eq!(b.dependency_count, 0);
        assert_eq!(storage.count_outputs(&execution.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_node_cancels_referencing_descendants_only() {
        let storage = storage().await;
        // Diamond: A -> B, A -> D, B -> C, D -> C; C references B's output
        let execution = storage.create_execution("WSP-A", "WFL-D", None, json!({})).await.unwrap();
        let plan = vec![
            planned("NOD-A", "A", 0, &["NOD-B", "NOD-D"]),
            planned("NOD-B", "B", 1, &["NOD-C"]),
            planned("NOD-D", "D", 1, &["NOD-C"]),
            planned_with_ref("NOD-C", "C", 2, &[], "B"),
        ];
        storage.install_plan(&execution.id, &plan, 300).await.unwrap();

        storage.ingest_result(&success(&execution.id, "NOD-A")).await.unwrap();
        storage.delete_input(&execution.id, "NOD-A").await.unwrap();

        let failure = WorkerResult::failure(&execution.id, "NOD-B", "INTERNAL_ERROR", "boom");
        storage.delete_input(&execution.id, "NOD-B").await.unwrap();
        let report = storage.ingest_result(&failure).await.unwrap();
        assert_eq!(report.cancelled, vec!["NOD-C".to_string()]);

        // C got a synthetic FAILED output and its input is gone
        let outputs = storage.outputs_of_execution(&execution.id).await.unwrap();
        let c = outputs.iter().find(|o| o.node_id == "NOD-C").unwrap();
        assert_eq!(c.status, OutputStatus::Failed);
        assert_eq!(c.error_details.as_ref().unwrap()["code"], "NODE_OUTPUT_MISSING");
        let inputs = storage.inputs_of_execution(&execution.id).await.unwrap();
        assert!(inputs.iter().all(|i| i.node_id != "NOD-C"));

        // D does not reference B; it stays schedulable
        let d = inputs.iter().find(|i| i.node_id == "NOD-D").unwrap();
        assert_eq!(d.dependency_count, 0);
        assert_eq!(d.state, InputState::Ready);
    }

    #[tokio::test]
    async fn cancel_marker_stops_claims() {
        let storage = storage().await;
        let execution = linear_execution(&storage).await;
        storage.request_cancel(&execution.id).await.unwrap();
        assert!(storage.claim_ready(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_is_exactly_once_and_cleans_up() {
        let storage = storage().await;
        let execution = linear_execution(&storage).await;
        let closed = storage
            .finalize(&execution.id, ExecutionStatus::Failed, json!({}), Some(1.5))
            .await
            .unwrap();
        assert!(closed);
        assert!(storage.inputs_of_execution(&execution.id).await.unwrap().is_empty());
        assert_eq!(storage.count_outputs(&execution.id).await.unwrap(), 0);

        let again = storage
            .finalize(&execution.id, ExecutionStatus::Completed, json!({}), None)
            .await
            .unwrap();
        assert!(!again);
        let reloaded = storage.get_execution(&execution.id).await.unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Failed);
    }
}
