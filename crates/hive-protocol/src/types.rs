use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AgentId, TaskId};

/// Availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Offline,
}

/// Observed track record of an agent, used to score assignment candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentPerformance {
    /// Fraction of tasks completed successfully, in [0, 1].
    pub success_rate: f64,
    /// Average task duration in milliseconds.
    pub average_task_time: f64,
    pub specializations: BTreeSet<String>,
}

impl AgentPerformance {
    /// Success rate is a finite fraction in [0, 1].
    pub fn is_valid(&self) -> bool {
        self.success_rate.is_finite() && (0.0..=1.0).contains(&self.success_rate)
    }
}

/// An autonomous, capability-tagged worker unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<AgentPerformance>,
}

impl Agent {
    /// Whether this agent's capabilities cover every required capability.
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }
}

/// Registration request for a new agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentSpec {
    /// Explicit identifier; a random one is generated when absent.
    #[serde(default)]
    pub id: Option<AgentId>,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub performance: Option<AgentPerformance>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_performance(mut self, performance: AgentPerformance) -> Self {
        self.performance = Some(performance);
        self
    }
}

/// Lifecycle status of a swarm task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    /// Created, waiting for dependencies or an eligible agent
    Pending,
    /// Bound to an agent that has not started yet
    Assigned,
    /// Being executed by its assignee
    InProgress,
    /// Finished successfully
    Completed,
    /// Reported as failed by its assignee
    Failed,
}

impl TaskStatus {
    /// Whether a task in this status holds its assignee busy.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

/// A unit of work with a position in a dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentId>,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl SwarmTask {
    /// Build a pending task from a creation request.
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id.unwrap_or_else(TaskId::generate),
            title: spec.title,
            description: spec.description,
            priority: spec.priority,
            status: TaskStatus::Pending,
            assigned_to: None,
            dependencies: spec.dependencies,
            required_capabilities: spec.required_capabilities,
            created: now,
            updated: now,
            deadline: spec.deadline,
            result: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

/// Creation request for a swarm task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<TaskId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A candidate solution to a task, produced independently by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSolution {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub solution: serde_json::Value,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// How a task ended for the agent that held it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// One line of an agent's task history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_superset_check() {
        let agent = Agent {
            id: AgentId::new("a1"),
            name: "pricer".into(),
            role: "analyst".into(),
            capabilities: ["pricing", "quality"].into_iter().map(String::from).collect(),
            status: AgentStatus::Idle,
            performance: None,
        };
        let needs_pricing: BTreeSet<String> = ["pricing".to_string()].into();
        let needs_legal: BTreeSet<String> = ["legal".to_string()].into();
        assert!(agent.has_capabilities(&needs_pricing));
        assert!(agent.has_capabilities(&BTreeSet::new()));
        assert!(!agent.has_capabilities(&needs_legal));
    }

    #[test]
    fn test_task_from_spec_starts_pending() {
        let task = SwarmTask::from_spec(
            TaskSpec::new("quote")
                .with_id("t1")
                .with_dependencies(["t0"])
                .with_capabilities(["pricing"]),
        );
        assert_eq!(task.id, TaskId::new("t1"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
        assert!(task.dependencies.contains(&TaskId::new("t0")));
        assert_eq!(task.created, task.updated);
    }

    #[test]
    fn test_status_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(serde_json::to_string(&AgentStatus::Busy).unwrap(), "\"busy\"");
    }
}
