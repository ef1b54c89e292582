/// Workflow lifecycle state machine
///
/// DRAFT -> ACTIVE -> DEACTIVATED -> (DRAFT | ARCHIVED). Archiving is
/// terminal. Activation requires at least one node and cascades enablement
/// to the workflow's triggers; deactivation cascades disablement. The run
/// gate elsewhere is `status == ACTIVE && trigger.is_enabled`.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{Workflow, WorkflowStatus};

/// Enforces status transitions and their trigger side effects
#[derive(Clone)]
pub struct WorkflowStateMachine {
    storage: WorkflowStorage,
}

impl WorkflowStateMachine {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self { storage }
    }

    /// DRAFT/DEACTIVATED -> ACTIVE; requires >= 1 node, re-enables triggers
    pub async fn activate(&self, workflow_id: &str) -> Result<Workflow> {
        let workflow = self.storage.get_workflow(workflow_id).await?;
        match workflow.status {
            WorkflowStatus::Draft | WorkflowStatus::Deactivated => {}
            other => {
                return Err(Error::BusinessRule(format!(
                    "cannot activate a workflow in status {}",
                    other.as_str()
                )))
            }
        }
        if self.storage.count_nodes(workflow_id).await? == 0 {
            return Err(Error::BusinessRule(
                "cannot activate a workflow with zero nodes".to_string(),
            ));
        }

        // Cycles are allowed at write time but their nodes can never become
        // ready; surface the problem to the operator at activation.
        if self.graph_has_cycle(workflow_id).await? {
            tracing::warn!(
                "⚠️ Workflow {} contains a cycle; cyclic nodes will never dispatch and the execution deadline will close affected runs",
                workflow_id
            );
        }

        self.storage.set_workflow_status(workflow_id, WorkflowStatus::Active).await?;
        let flipped = self.storage.flip_triggers(workflow_id, false, true).await?;
        tracing::info!("🚦 Activated workflow {} ({} triggers enabled)", workflow_id, flipped);
        self.storage.get_workflow(workflow_id).await
    }

    /// ACTIVE -> DEACTIVATED; disables every currently-enabled trigger
    pub async fn deactivate(&self, workflow_id: &str) -> Result<Workflow> {
        let workflow = self.storage.get_workflow(workflow_id).await?;
        if workflow.status != WorkflowStatus::Active {
            return Err(Error::BusinessRule(format!(
                "cannot deactivate a workflow in status {}",
                workflow.status.as_str()
            )));
        }
        self.storage.set_workflow_status(workflow_id, WorkflowStatus::Deactivated).await?;
        let flipped = self.storage.flip_triggers(workflow_id, true, false).await?;
        tracing::info!("🚦 Deactivated workflow {} ({} triggers disabled)", workflow_id, flipped);
        self.storage.get_workflow(workflow_id).await
    }

    /// DRAFT/DEACTIVATED -> ARCHIVED; terminal, nothing leaves it
    pub async fn archive(&self, workflow_id: &str) -> Result<Workflow> {
        let workflow = self.storage.get_workflow(workflow_id).await?;
        match workflow.status {
            WorkflowStatus::Draft | WorkflowStatus::Deactivated => {}
            WorkflowStatus::Active => {
                return Err(Error::BusinessRule(
                    "deactivate the workflow before archiving it".to_string(),
                ))
            }
            WorkflowStatus::Archived => {
                return Err(Error::BusinessRule("workflow is already archived".to_string()))
            }
        }
        self.storage.set_workflow_status(workflow_id, WorkflowStatus::Archived).await?;
        tracing::info!("🗄️ Archived workflow {}", workflow_id);
        self.storage.get_workflow(workflow_id).await
    }

    /// DEACTIVATED -> DRAFT; never from ARCHIVED
    pub async fn set_draft(&self, workflow_id: &str) -> Result<Workflow> {
        let workflow = self.storage.get_workflow(workflow_id).await?;
        match workflow.status {
            WorkflowStatus::Deactivated => {}
            WorkflowStatus::Archived => {
                return Err(Error::BusinessRule(
                    "archived workflows cannot return to draft".to_string(),
                ))
            }
            other => {
                return Err(Error::BusinessRule(format!(
                    "cannot set a workflow in status {} back to draft",
                    other.as_str()
                )))
            }
        }
        self.storage.set_workflow_status(workflow_id, WorkflowStatus::Draft).await?;
        self.storage.get_workflow(workflow_id).await
    }

    async fn graph_has_cycle(&self, workflow_id: &str) -> Result<bool> {
        let (_, nodes, edges) = self.storage.load_graph(workflow_id).await?;
        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for node in &nodes {
            indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for edge in &edges {
            if let (Some(&from), Some(&to)) =
                (indices.get(edge.from_node.as_str()), indices.get(edge.to_node.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
        Ok(toposort(&graph, None).is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::storage::{NewNode, WorkflowStorage};
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    async fn fixture() -> (WorkflowStateMachine, WorkflowStorage, String) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        let wf = storage.create_workflow("WSP-A", "pipeline", 1).await.unwrap();
        (WorkflowStateMachine::new(storage.clone()), storage, wf.id)
    }

    async fn add_node(storage: &WorkflowStorage, workflow_id: &str, name: &str) -> String {
        let script = match storage.get_script_by_name("echo").await {
            Ok(script) => script,
            Err(_) => storage
                .create_script("echo", "return { ok = true }", "/tmp/echo.lua", "lua", StdHashMap::new(), json!({}))
                .await
                .unwrap(),
        };
        storage
            .create_node(NewNode {
                workflow_id: workflow_id.to_string(),
                name: name.to_string(),
                script_ref: Some(script.id),
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
    async fn activate_requires_nodes() {
        let (machine, storage, wf) = fixture().await;
        assert!(matches!(machine.activate(&wf).await, Err(Error::BusinessRule(_))));

        add_node(&storage, &wf, "A").await;
        let activated = machine.activate(&wf).await.unwrap();
        assert_eq!(activated.status, WorkflowStatus::Active);
        // Activation flips every disabled trigger on
        let triggers = storage.triggers_of_workflow(&wf).await.unwrap();
        assert!(triggers.iter().all(|t| t.is_enabled));
    }

    #[tokio::test]
    async fn deactivate_disables_and_reactivate_reenables() {
        let (machine, storage, wf) = fixture().await;
        add_node(&storage, &wf, "A").await;
        machine.activate(&wf).await.unwrap();

        let deactivated = machine.deactivate(&wf).await.unwrap();
        assert_eq!(deactivated.status, WorkflowStatus::Deactivated);
        let triggers = storage.triggers_of_workflow(&wf).await.unwrap();
        assert!(triggers.iter().all(|t| !t.is_enabled));

        let reactivated = machine.activate(&wf).await.unwrap();
        assert_eq!(reactivated.status, WorkflowStatus::Active);
        let triggers = storage.triggers_of_workflow(&wf).await.unwrap();
        assert!(triggers.iter().all(|t| t.is_enabled));
    }

    #[tokio::test]
    async fn archive_is_terminal() {
        let (machine, storage, wf) = fixture().await;
        add_node(&storage, &wf, "A").await;
        machine.activate(&wf).await.unwrap();
        machine.deactivate(&wf).await.unwrap();
        let archived = machine.archive(&wf).await.unwrap();
        assert_eq!(archived.status, WorkflowStatus::Archived);

        assert!(matches!(machine.set_draft(&wf).await, Err(Error::BusinessRule(_))));
        assert!(matches!(machine.activate(&wf).await, Err(Error::BusinessRule(_))));
        assert!(matches!(machine.archive(&wf).await, Err(Error::BusinessRule(_))));
    }

    #[tokio::test]
    async fn active_workflows_must_deactivate_before_archive() {
        let (machine, storage, wf) = fixture().await;
        add_node(&storage, &wf, "A").await;
        machine.activate(&wf).await.unwrap();
        assert!(matches!(machine.archive(&wf).await, Err(Error::BusinessRule(_))));
    }

    #[tokio::test]
    async fn deactivated_can_return_to_draft() {
        let (machine, storage, wf) = fixture().await;
        add_node(&storage, &wf, "A").await;
        machine.activate(&wf).await.unwrap();
        machine.deactivate(&wf).await.unwrap();
        let drafted = machine.set_draft(&wf).await.unwrap();
        assert_eq!(drafted.status, WorkflowStatus::Draft);
    }

    #[tokio::test]
    async fn cyclic_workflows_still_activate() {
        let (machine, storage, wf) = fixture().await;
        let a = add_node(&storage, &wf, "A").await;
        let b = add_node(&storage, &wf, "B").await;
        storage.create_edge(&wf, &a, &b).await.unwrap();
        storage.create_edge(&wf, &b, &a).await.unwrap();
        // Cycles warn at activation but are not prevented
        let activated = machine.activate(&wf).await.unwrap();
        assert_eq!(activated.status, WorkflowStatus::Active);
    }
}
