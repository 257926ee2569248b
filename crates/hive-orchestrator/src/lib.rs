//! Hive task graph orchestration.
//!
//! Decomposes a compound task into a DAG of steps, runs every ready step
//! concurrently, and resolves each one through a request/response exchange
//! on the message bus bounded by the step's timeout.

pub mod executor;
pub mod graph;
pub mod metrics;
pub mod worker;

pub use executor::{ContextStatus, ExecutionOutcome, Orchestrator, OrchestratorConfig, TaskContext};
pub use graph::{StepDefinition, TaskDefinition, TaskGraph};
pub use metrics::{MemoryMetrics, MetricRecord, MetricsSink, TracingMetrics};
pub use worker::{ActionHandler, AgentWorker, EchoHandler, FnHandler};

use hive_bus::BusError;
use hive_protocol::TaskId;

/// Fatal errors that abort an `execute_task` call.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Deadlock in task {task_id}: no ready step among pending {pending:?}")]
    Deadlock { task_id: TaskId, pending: Vec<String> },

    #[error("Step {step_id} ({action}) of task {task_id} timed out after {timeout_ms}ms")]
    StepTimeout {
        task_id: TaskId,
        step_id: String,
        action: String,
        timeout_ms: u64,
    },

    #[error("Dependency cycle among steps {0:?}")]
    Cycle(Vec<String>),

    #[error("Duplicate step id {0}")]
    DuplicateStep(String),

    #[error("Task {0} has already been executed")]
    DuplicateTask(TaskId),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by an agent while handling a step request.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unsupported action: {0}")]
    Unsupported(String),

    #[error("Handler failed: {0}")]
    Failed(String),
}
