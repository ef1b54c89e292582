/// SQLite persistence for workflow definitions
///
/// Workflows, their graph (nodes, edges), triggers and script artifacts.
/// Write-time invariants live here: unique names per scope, the script
/// reference XOR, schema conformance of node parameters, self-loop and
/// duplicate-edge rejection, and the mandatory non-deletable DEFAULT
/// trigger every workflow is born with.

use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{new_id, IdKind};
use crate::workflow::types::{
    validate_params_against_schema, ApprovalStatus, Edge, InputParam, Node, SchemaField, Script,
    TestStatus, Trigger, TriggerType, Workflow, WorkflowStatus,
};
use crate::workspace::storage::now_rfc3339;

/// Maximum triggers one workflow may carry
const MAX_TRIGGERS_PER_WORKFLOW: i64 = 10;

/// Request shape for creating a node
#[derive(Debug, Clone)]
pub struct NewNode {
    pub workflow_id: String,
    pub name: String,
    pub script_ref: Option<String>,
    pub custom_script_ref: Option<String>,
    pub input_params: HashMap<String, InputParam>,
    pub max_retries: Option<i64>,
    pub timeout_seconds: Option<i64>,
}

/// Storage manager for workflow definitions
#[derive(Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the workflow-layer tables (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'DRAFT',
                priority INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(workspace_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                name TEXT NOT NULL,
                script_ref TEXT,
                custom_script_ref TEXT,
                input_params JSON NOT NULL,
                max_retries INTEGER NOT NULL DEFAULT 3,
                timeout_seconds INTEGER NOT NULL DEFAULT 300,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(workflow_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(workflow_id, from_node, to_node)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                config JSON NOT NULL,
                input_mapping JSON NOT NULL,
                strict INTEGER NOT NULL DEFAULT 0,
                is_enabled INTEGER NOT NULL DEFAULT 0,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                UNIQUE(workflow_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scripts (
                id TEXT PRIMARY KEY,
                workspace_id TEXT,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                file_path TEXT NOT NULL,
                process_type TEXT NOT NULL DEFAULT 'lua',
                required_packages JSON NOT NULL,
                input_schema JSON NOT NULL,
                output_schema JSON NOT NULL,
                approval_status TEXT,
                test_status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )
            "#,
        ];
        for ddl in statements {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        // Global scripts share one namespace, custom scripts one per workspace
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_scripts_global_name ON scripts(name) WHERE workspace_id IS NULL",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_scripts_workspace_name ON scripts(workspace_id, name) WHERE workspace_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_workflow ON nodes(workflow_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_workflow ON edges(workflow_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- workflows ----

    /// Create a DRAFT workflow plus its mandatory DEFAULT webhook trigger
    pub async fn create_workflow(
        &self,
        workspace_id: &str,
        name: &str,
        priority: i64,
    ) -> Result<Workflow> {
        if priority < 1 {
            return Err(Error::InvalidInput("workflow priority must be >= 1".to_string()));
        }
        let id = new_id(IdKind::Workflow);
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, workspace_id, name, status, priority, created_at, updated_at)
            VALUES (?, ?, ?, 'DRAFT', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(priority)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "workflow", id: name.to_string() }
            }
            other => other.into(),
        })?;

        // Every workflow is born with its non-deletable DEFAULT trigger
        sqlx::query(
            r#"
            INSERT INTO triggers (id, workflow_id, name, trigger_type, config, input_mapping, strict, is_enabled, is_default, created_at, updated_at)
            VALUES (?, ?, 'DEFAULT', 'WEBHOOK', '{}', '{}', 0, 0, 1, ?, ?)
            "#,
        )
        .bind(new_id(IdKind::Trigger))
        .bind(&id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("🆕 Created workflow {} ('{}') with DEFAULT trigger", id, name);
        self.get_workflow(&id).await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workflow", id: id.to_string() })?;
        workflow_from_row(&row)
    }

    pub(crate) async fn set_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<()> {
        sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- nodes ----

    /// Create a node after checking the XOR script reference, the referenced
    /// script's scope, and parameter conformance to its input schema
    pub async fn create_node(&self, spec: NewNode) -> Result<Node> {
        let workflow = self.get_workflow(&spec.workflow_id).await?;

        let script_id = match (&spec.script_ref, &spec.custom_script_ref) {
            (Some(id), None) | (None, Some(id)) => id.clone(),
            _ => {
                return Err(Error::InvalidInput(
                    "node must reference exactly one of script_ref or custom_script_ref".to_string(),
                ))
            }
        };
        let script = self.get_script(&script_id).await?;
        match (&spec.custom_script_ref, &script.workspace_id) {
            // Custom scripts must live in the node's workspace
            (Some(_), Some(script_ws)) if *script_ws != workflow.workspace_id => {
                return Err(Error::BusinessRule(
                    "custom script belongs to a different workspace".to_string(),
                ))
            }
            (Some(_), None) => {
                return Err(Error::InvalidInput(
                    "custom_script_ref points at a global script".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::InvalidInput(
                    "script_ref points at a workspace-scoped script".to_string(),
                ))
            }
            _ => {}
        }
        validate_params_against_schema(&spec.input_params, &script.input_schema)?;

        let max_retries = spec.max_retries.unwrap_or(3);
        let timeout_seconds = spec.timeout_seconds.unwrap_or(300);
        if max_retries < 0 {
            return Err(Error::InvalidInput("max_retries must be >= 0".to_string()));
        }
        if timeout_seconds <= 0 {
            return Err(Error::InvalidInput("timeout_seconds must be > 0".to_string()));
        }

        let id = new_id(IdKind::Node);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO nodes (id, workflow_id, workspace_id, name, script_ref, custom_script_ref, input_params, max_retries, timeout_seconds, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&spec.workflow_id)
        .bind(&workflow.workspace_id)
        .bind(&spec.name)
        .bind(&spec.script_ref)
        .bind(&spec.custom_script_ref)
        .bind(serde_json::to_string(&spec.input_params)?)
        .bind(max_retries)
        .bind(timeout_seconds)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "node", id: spec.name.clone() }
            }
            other => other.into(),
        })?;

        Ok(Node {
            id,
            workflow_id: spec.workflow_id,
            workspace_id: workflow.workspace_id,
            name: spec.name,
            script_ref: spec.script_ref,
            custom_script_ref: spec.custom_script_ref,
            input_params: spec.input_params,
            max_retries,
            timeout_seconds,
        })
    }

    pub async fn nodes_of_workflow(&self, workflow_id: &str) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT * FROM nodes WHERE workflow_id = ? AND deleted_at IS NULL ORDER BY created_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    pub async fn count_nodes(&self, workflow_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM nodes WHERE workflow_id = ? AND deleted_at IS NULL")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ---- edges ----

    /// Create an edge; both endpoints must be nodes of the workflow, the
    /// edge must not be a self-loop, and the pair must be new
    pub async fn create_edge(&self, workflow_id: &str, from_node: &str, to_node: &str) -> Result<Edge> {
        if from_node == to_node {
            return Err(Error::BusinessRule("self-loop edges are not allowed".to_string()));
        }
        let nodes = self.nodes_of_workflow(workflow_id).await?;
        for endpoint in [from_node, to_node] {
            if !nodes.iter().any(|n| n.id == endpoint) {
                return Err(Error::InvalidInput(format!(
                    "edge endpoint {} is not a node of workflow {}",
                    endpoint, workflow_id
                )));
            }
        }
        let id = new_id(IdKind::Edge);
        sqlx::query(
            "INSERT INTO edges (id, workflow_id, from_node, to_node, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(from_node)
        .bind(to_node)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::AlreadyExists {
                resource: "edge",
                id: format!("{} -> {}", from_node, to_node),
            },
            other => other.into(),
        })?;
        Ok(Edge {
            id,
            workflow_id: workflow_id.to_string(),
            from_node: from_node.to_string(),
            to_node: to_node.to_string(),
        })
    }

    pub async fn edges_of_workflow(&self, workflow_id: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE workflow_id = ? ORDER BY created_at ASC")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Edge {
                id: row.get("id"),
                workflow_id: row.get("workflow_id"),
                from_node: row.get("from_node"),
                to_node: row.get("to_node"),
            })
            .collect())
    }

    /// One consistent snapshot of the whole graph for the planner
    pub async fn load_graph(&self, workflow_id: &str) -> Result<(Workflow, Vec<Node>, Vec<Edge>)> {
        let mut tx = self.pool.begin().await?;
        let workflow_row = sqlx::query("SELECT * FROM workflows WHERE id = ? AND deleted_at IS NULL")
            .bind(workflow_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "workflow", id: workflow_id.to_string() })?;
        let workflow = workflow_from_row(&workflow_row)?;

        let node_rows = sqlx::query(
            "SELECT * FROM nodes WHERE workflow_id = ? AND deleted_at IS NULL ORDER BY created_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&mut *tx)
        .await?;
        let nodes = node_rows.iter().map(node_from_row).collect::<Result<Vec<_>>>()?;

        let edge_rows = sqlx::query("SELECT * FROM edges WHERE workflow_id = ?")
            .bind(workflow_id)
            .fetch_all(&mut *tx)
            .await?;
        let edges = edge_rows
            .iter()
            .map(|row| Edge {
                id: row.get("id"),
                workflow_id: row.get("workflow_id"),
                from_node: row.get("from_node"),
                to_node: row.get("to_node"),
            })
            .collect();
        tx.commit().await?;

        Ok((workflow, nodes, edges))
    }

    // ---- triggers ----

    pub async fn create_trigger(
        &self,
        workflow_id: &str,
        name: &str,
        trigger_type: TriggerType,
        config: Value,
        input_mapping: HashMap<String, SchemaField>,
        strict: bool,
    ) -> Result<Trigger> {
        let count = self.count_triggers(workflow_id).await?;
        if count >= MAX_TRIGGERS_PER_WORKFLOW {
            return Err(Error::BusinessRule(format!(
                "workflow already has the maximum of {} triggers",
                MAX_TRIGGERS_PER_WORKFLOW
            )));
        }
        let id = new_id(IdKind::Trigger);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO triggers (id, workflow_id, name, trigger_type, config, input_mapping, strict, is_enabled, is_default, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(name)
        .bind(trigger_type.as_str())
        .bind(serde_json::to_string(&config)?)
        .bind(serde_json::to_string(&input_mapping)?)
        .bind(strict as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "trigger", id: name.to_string() }
            }
            other => other.into(),
        })?;
        self.get_trigger(&id).await
    }

    pub async fn get_trigger(&self, id: &str) -> Result<Trigger> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "trigger", id: id.to_string() })?;
        trigger_from_row(&row)
    }

    pub async fn triggers_of_workflow(&self, workflow_id: &str) -> Result<Vec<Trigger>> {
        let rows = sqlx::query(
            "SELECT * FROM triggers WHERE workflow_id = ? AND deleted_at IS NULL ORDER BY created_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trigger_from_row).collect()
    }

    /// The mandatory DEFAULT trigger of a workflow
    pub async fn default_trigger(&self, workflow_id: &str) -> Result<Trigger> {
        let row = sqlx::query(
            "SELECT * FROM triggers WHERE workflow_id = ? AND is_default = 1 AND deleted_at IS NULL",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound { resource: "trigger", id: format!("{}/DEFAULT", workflow_id) })?;
        trigger_from_row(&row)
    }

    /// Enabled SCHEDULED triggers of ACTIVE workflows, for the cron service
    pub async fn enabled_scheduled_triggers(&self) -> Result<Vec<Trigger>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM triggers t
            JOIN workflows w ON w.id = t.workflow_id
            WHERE t.trigger_type = 'SCHEDULED' AND t.is_enabled = 1
              AND t.deleted_at IS NULL AND w.deleted_at IS NULL
              AND w.status = 'ACTIVE'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trigger_from_row).collect()
    }

    pub async fn count_triggers(&self, workflow_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM triggers WHERE workflow_id = ? AND deleted_at IS NULL")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Delete a trigger; the DEFAULT trigger is non-deletable
    pub async fn delete_trigger(&self, id: &str) -> Result<()> {
        let trigger = self.get_trigger(id).await?;
        if trigger.is_default {
            return Err(Error::BusinessRule("the DEFAULT trigger cannot be deleted".to_string()));
        }
        sqlx::query("UPDATE triggers SET deleted_at = ? WHERE id = ?")
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_trigger_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let changed = sqlx::query(
            "UPDATE triggers SET is_enabled = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(enabled as i64)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if changed == 0 {
            return Err(Error::NotFound { resource: "trigger", id: id.to_string() });
        }
        Ok(())
    }

    /// Flip every trigger of a workflow that currently sits at `from`
    pub(crate) async fn flip_triggers(&self, workflow_id: &str, from: bool, to: bool) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE triggers SET is_enabled = ?, updated_at = ? WHERE workflow_id = ? AND is_enabled = ? AND deleted_at IS NULL",
        )
        .bind(to as i64)
        .bind(now_rfc3339())
        .bind(workflow_id)
        .bind(from as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    // ---- scripts ----

    /// Create a global script artifact
    pub async fn create_script(
        &self,
        name: &str,
        content: &str,
        file_path: &str,
        process_type: &str,
        input_schema: HashMap<String, SchemaField>,
        output_schema: Value,
    ) -> Result<Script> {
        self.insert_script(None, name, content, file_path, process_type, input_schema, output_schema, None, None)
            .await
    }

    /// Create a workspace-scoped custom script; review starts at PENDING
    pub async fn create_custom_script(
        &self,
        workspace_id: &str,
        name: &str,
        content: &str,
        file_path: &str,
        process_type: &str,
        input_schema: HashMap<String, SchemaField>,
        output_schema: Value,
    ) -> Result<Script> {
        self.insert_script(
            Some(workspace_id),
            name,
            content,
            file_path,
            process_type,
            input_schema,
            output_schema,
            Some(ApprovalStatus::Pending),
            Some(TestStatus::Untested),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_script(
        &self,
        workspace_id: Option<&str>,
        name: &str,
        content: &str,
        file_path: &str,
        process_type: &str,
        input_schema: HashMap<String, SchemaField>,
        output_schema: Value,
        approval_status: Option<ApprovalStatus>,
        test_status: Option<TestStatus>,
    ) -> Result<Script> {
        let kind = if workspace_id.is_some() { IdKind::CustomScript } else { IdKind::Script };
        let id = new_id(kind);
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO scripts (id, workspace_id, name, content, file_path, process_type, required_packages, input_schema, output_schema, approval_status, test_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, '[]', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(name)
        .bind(content)
        .bind(file_path)
        .bind(process_type)
        .bind(serde_json::to_string(&input_schema)?)
        .bind(serde_json::to_string(&output_schema)?)
        .bind(approval_status.map(|s| s.as_str()))
        .bind(test_status.map(|s| s.as_str()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AlreadyExists { resource: "script", id: name.to_string() }
            }
            other => other.into(),
        })?;
        self.get_script(&id).await
    }

    pub async fn get_script(&self, id: &str) -> Result<Script> {
        let row = sqlx::query("SELECT * FROM scripts WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "script", id: id.to_string() })?;
        script_from_row(&row)
    }

    pub async fn get_script_by_name(&self, name: &str) -> Result<Script> {
        let row = sqlx::query("SELECT * FROM scripts WHERE name = ? AND workspace_id IS NULL AND deleted_at IS NULL")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound { resource: "script", id: name.to_string() })?;
        script_from_row(&row)
    }

    pub async fn set_custom_script_review(&self, id: &str, status: ApprovalStatus) -> Result<()> {
        let changed = sqlx::query(
            "UPDATE scripts SET approval_status = ?, updated_at = ? WHERE id = ? AND workspace_id IS NOT NULL AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if changed == 0 {
            return Err(Error::NotFound { resource: "custom script", id: id.to_string() });
        }
        Ok(())
    }

    /// Resolve a node's script reference (either kind) to the artifact
    pub async fn script_for_node(&self, node: &Node) -> Result<Script> {
        let script_id = node
            .script_ref
            .as_deref()
            .or(node.custom_script_ref.as_deref())
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("node {} has no script reference", node.id)))?;
        self.get_script(script_id).await
    }
}

fn workflow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
    let status_str: String = row.get("status");
    let status = WorkflowStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt workflow status '{}'", status_str)))?;
    Ok(Workflow {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        status,
        priority: row.get("priority"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Node> {
    let params_json: String = row.get("input_params");
    Ok(Node {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        script_ref: row.get("script_ref"),
        custom_script_ref: row.get("custom_script_ref"),
        input_params: serde_json::from_str(&params_json)?,
        max_retries: row.get("max_retries"),
        timeout_seconds: row.get("timeout_seconds"),
    })
}

fn trigger_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Trigger> {
    let type_str: String = row.get("trigger_type");
    let trigger_type = TriggerType::parse(&type_str)
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("corrupt trigger type '{}'", type_str)))?;
    let config_json: String = row.get("config");
    let mapping_json: String = row.get("input_mapping");
    Ok(Trigger {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        name: row.get("name"),
        trigger_type,
        config: serde_json::from_str(&config_json)?,
        input_mapping: serde_json::from_str(&mapping_json)?,
        strict: row.get::<i64, _>("strict") != 0,
        is_enabled: row.get::<i64, _>("is_enabled") != 0,
        is_default: row.get::<i64, _>("is_default") != 0,
    })
}

fn script_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Script> {
    let packages_json: String = row.get("required_packages");
    let input_schema_json: String = row.get("input_schema");
    let output_schema_json: String = row.get("output_schema");
    let approval: Option<String> = row.get("approval_status");
    let test: Option<String> = row.get("test_status");
    Ok(Script {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        content: row.get("content"),
        file_path: row.get("file_path"),
        process_type: row.get("process_type"),
        required_packages: serde_json::from_str(&packages_json)?,
        input_schema: serde_json::from_str(&input_schema_json)?,
        output_schema: serde_json::from_str(&output_schema_json)?,
        approval_status: approval.as_deref().and_then(ApprovalStatus::parse),
        test_status: test.as_deref().and_then(TestStatus::parse),
    })
}
