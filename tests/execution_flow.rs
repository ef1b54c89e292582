/// End-to-end execution scenarios
///
/// Each test wires the full service (storages, planner, scheduler loops,
/// Lua runtime, collector, finalizer) over one in-memory database and
/// drives real workflows through real triggers.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;

use miniflow::config::Config;
use miniflow::execution::types::ExecutionStatus;
use miniflow::security::RequestContext;
use miniflow::server::{build_service, Service};
use miniflow::workflow::storage::NewNode;
use miniflow::workflow::types::{InputParam, ParamType, SchemaField};
use miniflow::workspace::types::PlanTier;

/// Echo script body shared by the scenarios
const ECHO: &str = "return { ok = true, [\"in\"] = params }";

/// Echo that burns ~400ms before returning
const SLOW_ECHO: &str =
    "local t = os.clock() + 0.4\nwhile os.clock() < t do end\nreturn { ok = true, [\"in\"] = params }";

/// Always fails
const BOOM: &str = "error('boom')";

struct Harness {
    service: Service,
    scripts: tempfile::TempDir,
    workspace_id: String,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.service.shutdown();
    }
}

async fn harness() -> Harness {
    harness_with(Config::for_tests()).await
}

async fn harness_with(config: Config) -> Harness {
    let pool = SqlitePoolOptions::new().max_connections(1).connect(":memory:").await.unwrap();
    miniflow::setup::init_all_schemas(&config, &pool).await.unwrap();
    miniflow::setup::seed_plans(&pool).await.unwrap();
    let service = build_service(config, pool).await.unwrap();

    let owner = service.state.workspaces.create_user("owner@example.com", "Owner").await.unwrap();
    let workspace = service
        .state
        .workspaces
        .create_workspace(&owner.id, "Acme", "acme", PlanTier::Pro)
        .await
        .unwrap();

    Harness {
        service,
        scripts: tempfile::tempdir().unwrap(),
        workspace_id: workspace.id,
    }
}

impl Harness {
    /// Create a script whose artifact lives in the harness tempdir
    async fn script(&self, name: &str, body: &str) -> String {
        let path = self.scripts.path().join(format!("{}.lua", name));
        std::fs::write(&path, body).unwrap();
        let mut schema = HashMap::new();
        for (field, t) in [
            ("x", ParamType::Integer),
            ("y", ParamType::Boolean),
            ("z", ParamType::Boolean),
            ("pw", ParamType::Password),
        ] {
            schema.insert(field.to_string(), SchemaField { field_type: t, required: false });
        }
        self.service
            .state
            .workflows
            .create_script(name, body, path.to_str().unwrap(), "lua", schema, json!({}))
            .await
            .unwrap()
            .id
    }

    async fn workflow(&self, name: &str) -> String {
        self.service
            .state
            .workflows
            .create_workflow(&self.workspace_id, name, 1)
            .await
            .unwrap()
            .id
    }

    async fn node(
        &self,
        workflow_id: &str,
        script_id: &str,
        name: &str,
        params: &[(&str, ParamType, Value)],
        max_retries: i64,
    ) -> String {
        let input_params = params
            .iter()
            .map(|(param, t, value)| {
                (
                    param.to_string(),
                    InputParam {
                        param_type: *t,
                        value: value.clone(),
                        required: true,
                        default: None,
                        description: None,
                    },
                )
            })
            .collect();
        self.service
            .state
            .workflows
            .create_node(NewNode {
                workflow_id: workflow_id.to_string(),
                name: name.to_string(),
                script_ref: Some(script_id.to_string()),
                custom_script_ref: None,
                input_params,
                max_retries: Some(max_retries),
                timeout_seconds: Some(30),
            })
            .await
            .unwrap()
            .id
    }

    async fn edge(&self, workflow_id: &str, from: &str, to: &str) {
        self.service.state.workflows.create_edge(workflow_id, from, to).await.unwrap();
    }

    async fn activate(&self, workflow_id: &str) {
        self.service.state.state_machine.activate(workflow_id).await.unwrap();
    }

    async fn start(&self, workflow_id: &str, payload: Value) -> String {
        let ctx = RequestContext::internal();
        self.service
            .state
            .validator
            .start_default(&ctx, workflow_id, payload)
            .await
            .unwrap()
            .id
    }

    async fn wait_terminal(&self, execution_id: &str) -> miniflow::execution::types::Execution {
        for _ in 0..1_000 {
            let execution = self.service.state.executions.get_execution(execution_id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} did not reach a terminal status", execution_id);
    }
}

#[tokio::test]
async fn linear_three_node_success() {
    let h = harness().await;
    let echo = h.script("echo", ECHO).await;
    let wf = h.workflow("linear").await;

    let a = h
        .node(&wf, &echo, "A", &[("x", ParamType::Integer, json!("${trigger:seed}"))], 3)
        .await;
    let b = h
        .node(&wf, &echo, "B", &[("y", ParamType::Boolean, json!("${node:A.ok}"))], 3)
        .await;
    let c = h
        .node(&wf, &echo, "C", &[("z", ParamType::Boolean, json!("${node:B.in.y}"))], 3)
        .await;
    h.edge(&wf, &a, &b).await;
    h.edge(&wf, &b, &c).await;
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({"seed": 7})).await;
    let execution = h.wait_terminal(&execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results["A"]["status"], "SUCCESS");
    assert_eq!(execution.results["A"]["result_data"]["in"]["x"], 7);
    assert_eq!(execution.results["B"]["result_data"]["in"]["y"], true);
    assert_eq!(execution.results["C"]["status"], "SUCCESS");
    assert_eq!(execution.results["C"]["result_data"]["in"]["z"], true);

    // Terminal cleanup removed the queue rows
    assert!(h.service.state.executions.inputs_of_execution(&execution_id).await.unwrap().is_empty());
    assert_eq!(h.service.state.executions.count_outputs(&execution_id).await.unwrap(), 0);
}

#[tokio::test]
async fn downstream_never_dispatches_before_upstream_output_is_durable() {
    let h = harness().await;
    let echo = h.script("echo", ECHO).await;
    let slow = h.script("slow_echo", SLOW_ECHO).await;
    let wf = h.workflow("release").await;

    let a = h
        .node(&wf, &echo, "A", &[("x", ParamType::Integer, json!("${trigger:seed}"))], 3)
        .await;
    let b = h
        .node(&wf, &slow, "B", &[("y", ParamType::Boolean, json!("${node:A.ok}"))], 3)
        .await;
    let c = h
        .node(&wf, &echo, "C", &[("z", ParamType::Boolean, json!("${node:B.in.y}"))], 3)
        .await;
    h.edge(&wf, &a, &b).await;
    h.edge(&wf, &b, &c).await;
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({"seed": 1})).await;

    // Monitor: C must never be released while B's output is absent. The
    // release and the output insert commit in one transaction, so whenever
    // the inputs read observes C released, a later outputs read must
    // already see B's output.
    let executions = h.service.state.executions.clone();
    let mut violation = false;
    loop {
        let execution = executions.get_execution(&execution_id).await.unwrap();
        if execution.status.is_terminal() {
            break;
        }
        let inputs = executions.inputs_of_execution(&execution_id).await.unwrap();
        let c_released = match inputs.iter().find(|i| i.node_name == "C") {
            Some(c_input) => c_input.dependency_count == 0,
            None => true,
        };
        if c_released {
            let outputs = executions.outputs_of_execution(&execution_id).await.unwrap();
            let b_done = outputs.iter().any(|o| o.node_name == "B");
            let terminal = executions
                .get_execution(&execution_id)
                .await
                .unwrap()
                .status
                .is_terminal();
            // Finalization deletes the rows; only flag pre-terminal gaps
            if !b_done && !terminal {
                violation = true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(!violation, "C was released before B's output was durable");
    let execution = h.wait_terminal(&execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn failed_branch_is_isolated_in_a_diamond() {
    let h = harness().await;
    let echo = h.script("echo", ECHO).await;
    let boom = h.script("boom", BOOM).await;
    let wf = h.workflow("diamond").await;

    let a = h
        .node(&wf, &echo, "A", &[("x", ParamType::Integer, json!("${trigger:seed}"))], 3)
        .await;
    let b = h
        .node(&wf, &boom, "B", &[("y", ParamType::Boolean, json!("${node:A.ok}"))], 0)
        .await;
    let d = h
        .node(&wf, &echo, "D", &[("y", ParamType::Boolean, json!("${node:A.ok}"))], 3)
        .await;
    let c = h
        .node(&wf, &echo, "C", &[("z", ParamType::Boolean, json!("${node:B.ok}"))], 3)
        .await;
    h.edge(&wf, &a, &b).await;
    h.edge(&wf, &a, &d).await;
    h.edge(&wf, &b, &c).await;
    h.edge(&wf, &d, &c).await;
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({"seed": 1})).await;
    let execution = h.wait_terminal(&execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.results["A"]["status"], "SUCCESS");
    assert_eq!(execution.results["B"]["status"], "FAILED");
    // The independent branch ran to success
    assert_eq!(execution.results["D"]["status"], "SUCCESS");
    assert_eq!(execution.results["D"]["result_data"]["in"]["y"], true);
    // C was cancelled without ever dispatching
    assert_eq!(execution.results["C"]["status"], "FAILED");
    assert_eq!(execution.results["C"]["error_details"]["code"], "NODE_OUTPUT_MISSING");
    assert_eq!(execution.results["C"]["result_data"], Value::Null);
}

#[tokio::test]
async fn secret_variable_is_sealed_at_rest_and_plaintext_in_worker() {
    let h = harness().await;
    let echo = h.script("echo", ECHO).await;
    let wf = h.workflow("secret").await;

    let variable = h
        .service
        .state
        .workspaces
        .create_variable(&h.workspace_id, "DB_PASSWORD", "hunter2", true)
        .await
        .unwrap();
    // Stored bytes are ciphertext
    assert_ne!(variable.value, "hunter2");
    assert!(!variable.value.contains("hunter2"));

    h.node(
        &wf,
        &echo,
        "A",
        &[("pw", ParamType::Password, json!(format!("${{value:{}}}", variable.id)))],
        3,
    )
    .await;
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({})).await;
    let execution = h.wait_terminal(&execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    // The worker observed the plaintext
    assert_eq!(execution.results["A"]["result_data"]["in"]["pw"], "hunter2");
}

#[tokio::test]
async fn cancellation_closes_the_run_and_suppresses_results() {
    let h = harness().await;
    let slow = h.script("slow_echo", SLOW_ECHO).await;
    let wf = h.workflow("cancel").await;
    let a = h
        .node(&wf, &slow, "A", &[("x", ParamType::Integer, json!("${trigger:seed}"))], 3)
        .await;
    let b = h
        .node(&wf, &slow, "B", &[("y", ParamType::Boolean, json!("${node:A.ok}"))], 3)
        .await;
    h.edge(&wf, &a, &b).await;
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({"seed": 1})).await;
    h.service.state.executions.request_cancel(&execution_id).await.unwrap();

    let execution = h.wait_terminal(&execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.results, json!({}));
}

#[tokio::test]
async fn cyclic_workflow_times_out_at_the_execution_deadline() {
    let mut config = Config::for_tests();
    config.scheduler.execution_deadline_seconds = 0;
    let h = harness_with(config).await;
    let echo = h.script("echo", ECHO).await;
    let wf = h.workflow("cycle").await;

    let a = h.node(&wf, &echo, "A", &[], 3).await;
    let b = h.node(&wf, &echo, "B", &[], 3).await;
    h.edge(&wf, &a, &b).await;
    h.edge(&wf, &b, &a).await;
    // Cycles activate with a warning; their nodes can never become ready
    h.activate(&wf).await;

    let execution_id = h.start(&wf, json!({})).await;
    let execution = h.wait_terminal(&execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Timeout);
}

#[tokio::test]
async fn terminal_event_is_emitted_once() {
    let h = harness().await;
    let echo = h.script("echo", ECHO).await;
    let wf = h.workflow("events").await;
    h.node(&wf, &echo, "A", &[("x", ParamType::Integer, json!("${trigger:seed}"))], 3).await;
    h.activate(&wf).await;

    let mut events = h.service.finalizer.subscribe();
    let execution_id = h.start(&wf, json!({"seed": 5})).await;
    let execution = h.wait_terminal(&execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("terminal event should arrive")
        .unwrap();
    assert_eq!(event.execution_id, execution_id);
    assert_eq!(event.status, ExecutionStatus::Completed);
}
