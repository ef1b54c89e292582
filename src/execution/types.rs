/// Execution type definitions
///
/// An Execution is one run of a workflow. The planner snapshots every node
/// into an ExecutionInput; workers report back as ExecutionOutputs. Inputs
/// are immutable once written and never read the Node or Script tables
/// again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::workflow::types::InputParam;

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ExecutionStatus::Pending),
            "RUNNING" => Some(ExecutionStatus::Running),
            "COMPLETED" => Some(ExecutionStatus::Completed),
            "FAILED" => Some(ExecutionStatus::Failed),
            "CANCELLED" => Some(ExecutionStatus::Cancelled),
            "TIMEOUT" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Outcome of one node's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStatus {
    Success,
    Failed,
}

impl OutputStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStatus::Success => "SUCCESS",
            OutputStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(OutputStatus::Success),
            "FAILED" => Some(OutputStatus::Failed),
            _ => None,
        }
    }
}

/// Readiness state of an ExecutionInput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputState {
    /// Upstream dependencies outstanding (dependency_count > 0)
    Waiting,
    /// Claimable by an input-scheduler loop
    Ready,
    /// Claimed, dispatch in progress
    InFlight,
}

impl InputState {
    pub fn as_str(self) -> &'static str {
        match self {
            InputState::Waiting => "WAITING",
            InputState::Ready => "READY",
            InputState::InFlight => "IN_FLIGHT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(InputState::Waiting),
            "READY" => Some(InputState::Ready),
            "IN_FLIGHT" => Some(InputState::InFlight),
            _ => None,
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Execution identifier (EXC-…)
    pub id: String,
    pub workspace_id: String,
    pub workflow_id: String,
    /// Trigger that started the run; absent for internal starts
    pub trigger_id: Option<String>,
    pub status: ExecutionStatus,
    /// Payload supplied by the trigger after input-mapping validation
    pub trigger_data: Value,
    /// Final aggregate, written by the finalizer
    pub results: Value,
    pub planned_node_count: i64,
    pub cancel_requested: bool,
    pub deadline_at: Option<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable per-node snapshot created by the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInput {
    /// Input identifier (EXI-…)
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_name: String,
    pub priority: i64,
    /// In-degree at snapshot time; decremented by the output collector
    pub dependency_count: i64,
    pub max_retries: i64,
    pub timeout_seconds: i64,
    /// Verbatim copy of the node's parameters, references unresolved
    pub params: HashMap<String, InputParam>,
    pub script_name: String,
    /// On-disk artifact path value-copied at snapshot time
    pub script_path: String,
    pub process_type: String,
    pub state: InputState,
    pub created_at: String,
}

/// Worker's return value or failure for one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Output identifier (EXO-…)
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_name: String,
    pub status: OutputStatus,
    pub result_data: Value,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub created_at: String,
}

/// Record handed to the worker runtime for one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub execution_id: String,
    pub workspace_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub script_path: String,
    pub process_type: String,
    pub params: serde_json::Map<String, Value>,
    pub max_retries: i64,
    pub timeout_seconds: i64,
}

/// Record the worker reports back over the result boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub execution_id: String,
    pub node_id: String,
    pub status: OutputStatus,
    pub result_data: Value,
    /// Wall-clock seconds the node ran
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

impl WorkerResult {
    /// Synthetic failure emitted without running the worker
    pub fn failure(
        execution_id: &str,
        node_id: &str,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status: OutputStatus::Failed,
            result_data: Value::Null,
            duration: 0.0,
            error_message: Some(message.into()),
            error_details: Some(serde_json::json!({ "code": code })),
        }
    }
}

/// Terminal notification emitted once per finished execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub execution_id: String,
    pub workflow_id: String,
    pub workspace_id: String,
    pub status: ExecutionStatus,
}
