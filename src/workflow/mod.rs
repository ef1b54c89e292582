/// Workflow management layer
///
/// Workflow definitions and everything that gates their execution:
/// - Type definitions (Workflow, Node, Edge, Trigger, Script)
/// - SQLite persistence with write-time graph invariants
/// - The DRAFT/ACTIVE/DEACTIVATED/ARCHIVED state machine
/// - Trigger validation and execution admission
/// - The cron service for SCHEDULED triggers

pub mod cron;
pub mod state;
pub mod storage;
pub mod trigger;
pub mod types;

pub use cron::CronSchedulerService;
pub use state::WorkflowStateMachine;
pub use storage::{NewNode, WorkflowStorage};
pub use trigger::TriggerValidator;
pub use types::{
    Edge, InputParam, Node, ParamType, SchemaField, Script, Trigger, TriggerType, Workflow,
    WorkflowStatus,
};
