/// Execution subsystem
///
/// Transforms a persisted workflow graph into a running set of node
/// executions:
/// - Planner: per-node snapshots plus the dependency counter graph
/// - Reference resolver: `${type:id.path}` templates to concrete values
/// - Input scheduler: claim / resolve / dispatch / delete-on-ack loops
/// - Output collector: transactional ingest and dependency release
/// - Finalizer: terminal detection, aggregation, the terminal event
/// - Worker runtime boundary: the dispatch/result contract plus the
///   embedded Lua reference runtime

pub mod collector;
pub mod finalizer;
pub mod planner;
pub mod reference;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use collector::OutputCollector;
pub use finalizer::ExecutionFinalizer;
pub use planner::ExecutionPlanner;
pub use reference::ReferenceResolver;
pub use runtime::{LuaWorkerRuntime, WorkerRuntime};
pub use scheduler::InputScheduler;
pub use storage::ExecutionStorage;
pub use types::{
    DispatchRecord, Execution, ExecutionInput, ExecutionOutput, ExecutionStatus, InputState,
    OutputStatus, TerminalEvent, WorkerResult,
};
