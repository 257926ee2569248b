//! Hive swarm coordinator.
//!
//! Owns the agent registry and the lifecycle of every swarm task:
//! capability-based, performance-scored assignment of pending tasks to idle
//! agents, the start/complete/fail transitions, and the dependency cascade
//! that unlocks dependents when a task completes. Also drives consensus
//! processes and announces every change as a typed `SwarmEvent`.

pub mod coordinator;
pub mod events;
pub mod scoring;

pub use coordinator::{CoordinatorConfig, SwarmCoordinator};
pub use events::{EventBus, EventBusError, EventReceiver, SwarmEvent, SwarmEventKind};
pub use scoring::{agent_score, best_candidate};

use hive_consensus::ConsensusError;
use hive_protocol::{AgentId, AgentStatus, ConsensusId, TaskId, TaskStatus};

/// Why a lifecycle or consensus operation was rejected.
///
/// The public API reports rejections as `false`/`None` and logs the reason.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Unknown agent {0}")]
    UnknownAgent(AgentId),

    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    #[error("Unknown consensus process {0}")]
    UnknownConsensus(ConsensusId),

    #[error("Task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("Task {task_id} is {status:?}")]
    InvalidTaskStatus { task_id: TaskId, status: TaskStatus },

    #[error("Agent {agent_id} is {status:?}")]
    InvalidAgentStatus { agent_id: AgentId, status: AgentStatus },

    #[error("Task {task_id} is not assigned to {agent_id}")]
    NotAssignee { task_id: TaskId, agent_id: AgentId },

    #[error("Task {task_id} waits on incomplete dependency {dependency}")]
    DependencyIncomplete { task_id: TaskId, dependency: TaskId },

    #[error("Agent {agent_id} success rate {success_rate} is outside [0, 1]")]
    InvalidPerformance { agent_id: AgentId, success_rate: f64 },

    #[error("No idle agent covers the capabilities of task {0}")]
    NoEligibleAgent(TaskId),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}
