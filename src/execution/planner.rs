/// Execution planner
///
/// Materializes a workflow into per-node ExecutionInput snapshots plus the
/// dependency counter graph. `dependency_count` is the node's in-degree, so
/// sources start READY and cyclic nodes never become ready at all (the
/// execution deadline closes such runs). The fanout of every node is
/// recorded alongside so the collector can release dependents without
/// re-reading the graph.

use petgraph::graph::DiGraph;
use petgraph::Direction;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::execution::storage::{ExecutionStorage, PlannedNode};
use crate::execution::types::{Execution, ExecutionStatus};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::ApprovalStatus;

/// Turns a persisted workflow graph into a planned execution
#[derive(Clone)]
pub struct ExecutionPlanner {
    workflows: WorkflowStorage,
    executions: ExecutionStorage,
    /// Execution-level wall-clock budget stamped onto every plan
    deadline_seconds: i64,
}

impl ExecutionPlanner {
    pub fn new(workflows: WorkflowStorage, executions: ExecutionStorage, deadline_seconds: i64) -> Self {
        Self { workflows, executions, deadline_seconds }
    }

    /// Snapshot the workflow and install the plan; the execution comes out
    /// RUNNING. A planning failure closes the execution as FAILED.
    pub async fn plan(&self, execution: &Execution) -> Result<()> {
        match self.build_plan(execution).await {
            Ok(planned) => {
                let node_count = planned.len();
                self.executions.install_plan(&execution.id, &planned, self.deadline_seconds).await?;
                tracing::info!(
                    "📋 Planned execution {}: {} nodes materialized",
                    execution.id,
                    node_count
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("❌ Planning failed for execution {}: {}", execution.id, e);
                self.executions
                    .finalize(
                        &execution.id,
                        ExecutionStatus::Failed,
                        serde_json::json!({ "error": e.public_message(), "error_code": e.code() }),
                        Some(0.0),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn build_plan(&self, execution: &Execution) -> Result<Vec<PlannedNode>> {
        // One consistent snapshot of nodes and edges
        let (workflow, nodes, edges) = self.workflows.load_graph(&execution.workflow_id).await?;
        if nodes.is_empty() {
            return Err(Error::BusinessRule("workflow has no nodes to execute".to_string()));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for node in &nodes {
            indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for edge in &edges {
            let (Some(&from), Some(&to)) =
                (indices.get(edge.from_node.as_str()), indices.get(edge.to_node.as_str()))
            else {
                // Edge endpoints are validated at write time; a dangling one
                // here means the node was deleted afterwards
                continue;
            };
            graph.add_edge(from, to, ());
        }

        let mut planned = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let index = indices[node.id.as_str()];
            let dependency_count = graph.neighbors_directed(index, Direction::Incoming).count() as i64;
            let fanout: Vec<String> = graph
                .neighbors_directed(index, Direction::Outgoing)
                .map(|i| graph[i].to_string())
                .collect();

            // Value-copy the script artifact location at snapshot time so
            // later script changes never touch an in-flight execution
            let script = self.workflows.script_for_node(node).await?;
            if script.workspace_id.is_some()
                && script.approval_status != Some(ApprovalStatus::Approved)
            {
                return Err(Error::BusinessRule(format!(
                    "custom script '{}' is not approved for execution",
                    script.name
                )));
            }

            planned.push(PlannedNode {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                priority: workflow.priority,
                dependency_count,
                max_retries: node.max_retries,
                timeout_seconds: node.timeout_seconds,
                params: node.input_params.clone(),
                script_name: script.name,
                script_path: script.file_path,
                process_type: script.process_type,
                fanout,
            });
        }
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::types::InputState;
    use crate::workflow::storage::NewNode;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    struct Fixture {
        planner: ExecutionPlanner,
        workflows: WorkflowStorage,
        executions: ExecutionStorage,
        workflow_id: String,
        script_id: String,
    }

    async fn fixture() -> Fixture {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        let workflows = WorkflowStorage::new(pool.clone());
        workflows.init_schema().await.unwrap();
        let executions = ExecutionStorage::new(pool);
        executions.init_schema().await.unwrap();
        let script = workflows
            .create_script("echo", "return { ok = true }", "/opt/scripts/echo.lua", "lua", StdHashMap::new(), json!({}))
            .await
            .unwrap();
        let workflow = workflows.create_workflow("WSP-A", "pipeline", 4).await.unwrap();
        let planner = ExecutionPlanner::new(workflows.clone(), executions.clone(), 300);
        Fixture { planner, workflows, executions, workflow_id: workflow.id, script_id: script.id }
    }

    async fn add_node(fx: &Fixture, name: &str) -> String {
        fx.workflows
            .create_node(NewNode {
                workflow_id: fx.workflow_id.clone(),
                name: name.to_string(),
                script_ref: Some(fx.script_id.clone()),
                custom_script_ref: None,
                input_params: StdHashMap::new(),
                max_retries: None,
                timeout_seconds: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn inputs_match_nodes_and_dependency_sum_matches_edges() {
        let fx = fixture().await;
        let a = add_node(&fx, "A").await;
        let b = add_node(&fx, "B").await;
        let c = add_node(&fx, "C").await;
        fx.workflows.create_edge(&fx.workflow_id, &a, &b).await.unwrap();
        fx.workflows.create_edge(&fx.workflow_id, &b, &c).await.unwrap();
        fx.workflows.create_edge(&fx.workflow_id, &a, &c).await.unwrap();

        let execution = fx
            .executions
            .create_execution("WSP-A", &fx.workflow_id, None, json!({}))
            .await
            .unwrap();
        fx.planner.plan(&execution).await.unwrap();

        let inputs = fx.executions.inputs_of_execution(&execution.id).await.unwrap();
        assert_eq!(inputs.len(), 3);
        let dependency_sum: i64 = inputs.iter().map(|i| i.dependency_count).sum();
        assert_eq!(dependency_sum, 3);

        // Priority propagates from the workflow
        assert!(inputs.iter().all(|i| i.priority == 4));
        // Snapshot carries the script artifact path
        assert!(inputs.iter().all(|i| i.script_path == "/opt/scripts/echo.lua"));
        let execution = fx.executions.get_execution(&execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.planned_node_count, 3);
    }

    #[tokio::test]
    async fn cyclic_nodes_are_planned_but_never_ready() {
        let fx = fixture().await;
        let a = add_node(&fx, "A").await;
        let b = add_node(&fx, "B").await;
        fx.workflows.create_edge(&fx.workflow_id, &a, &b).await.unwrap();
        fx.workflows.create_edge(&fx.workflow_id, &b, &a).await.unwrap();

        let execution = fx
            .executions
            .create_execution("WSP-A", &fx.workflow_id, None, json!({}))
            .await
            .unwrap();
        fx.planner.plan(&execution).await.unwrap();

        let inputs = fx.executions.inputs_of_execution(&execution.id).await.unwrap();
        assert!(inputs.iter().all(|i| i.dependency_count > 0));
        assert!(inputs.iter().all(|i| i.state == InputState::Waiting));
        assert!(fx.executions.claim_ready(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unapproved_custom_script_fails_the_plan() {
        let fx = fixture().await;
        let cus = fx
            .workflows
            .create_custom_script("WSP-A", "mine", "return {}", "/opt/scripts/mine.lua", "lua", StdHashMap::new(), json!({}))
            .await
            .unwrap();
        fx.workflows
            .create_node(NewNode {
                workflow_id: fx.workflow_id.clone(),
                name: "A".to_string(),
                script_ref: None,
                custom_script_ref: Some(cus.id),
                input_params: StdHashMap::new(),
                max_retries: None,
                timeout_seconds: None,
            })
            .await
            .unwrap();

        let execution = fx
            .executions
            .create_execution("WSP-A", &fx.workflow_id, None, json!({}))
            .await
            .unwrap();
        assert!(matches!(fx.planner.plan(&execution).await, Err(Error::BusinessRule(_))));
        // The execution is closed as FAILED rather than left dangling
        let closed = fx.executions.get_execution(&execution.id).await.unwrap();
        assert_eq!(closed.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn empty_workflow_cannot_plan() {
        let fx = fixture().await;
        let execution = fx
            .executions
            .create_execution("WSP-A", &fx.workflow_id, None, json!({}))
            .await
            .unwrap();
        assert!(fx.planner.plan(&execution).await.is_err());
    }
}
