//! The swarm coordinator service.
//!
//! All state lives in one `CoordinatorState` behind a tokio `RwLock`. Every
//! mutating operation holds the write lock from validation to the last
//! emitted event, so two operations never interleave: an agent can only be
//! handed one task at a time and a consensus process completes once.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use hive_consensus::ConsensusProcess;
use hive_protocol::{
    Agent, AgentId, AgentPerformance, AgentSpec, AgentStatus, ConsensusId, SwarmSolution,
    SwarmTask, TaskHistoryEntry, TaskId, TaskOutcome, TaskSpec, TaskStatus,
    DEFAULT_EVENT_CAPACITY,
};

use crate::events::{EventBus, EventReceiver, SwarmEvent, SwarmEventKind};
use crate::scoring::best_candidate;
use crate::CoordinatorError;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Events buffered per receiver before a slow one starts lagging.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    agents: HashMap<AgentId, Agent>,
    /// Registration order; breaks scoring ties.
    agent_order: Vec<AgentId>,
    histories: HashMap<AgentId, Vec<TaskHistoryEntry>>,
    tasks: HashMap<TaskId, SwarmTask>,
    /// Creation order; drives the dependency cascade.
    task_order: Vec<TaskId>,
    processes: HashMap<ConsensusId, ConsensusProcess>,
}

impl CoordinatorState {
    fn task(&self, task_id: &TaskId) -> Result<&SwarmTask, CoordinatorError> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| CoordinatorError::UnknownTask(task_id.clone()))
    }

    fn task_mut(&mut self, task_id: &TaskId) -> Result<&mut SwarmTask, CoordinatorError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| CoordinatorError::UnknownTask(task_id.clone()))
    }

    fn agent_mut(&mut self, agent_id: &AgentId) -> Result<&mut Agent, CoordinatorError> {
        self.agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinatorError::UnknownAgent(agent_id.clone()))
    }

    fn process_mut(&mut self, id: &ConsensusId) -> Result<&mut ConsensusProcess, CoordinatorError> {
        self.processes
            .get_mut(id)
            .ok_or_else(|| CoordinatorError::UnknownConsensus(id.clone()))
    }

    /// A task held by `agent_id` whose status is one of `allowed`.
    fn held_task_mut(
        &mut self,
        task_id: &TaskId,
        agent_id: &AgentId,
        allowed: &[TaskStatus],
    ) -> Result<&mut SwarmTask, CoordinatorError> {
        let task = self.task_mut(task_id)?;
        if !allowed.contains(&task.status) {
            return Err(CoordinatorError::InvalidTaskStatus {
                task_id: task_id.clone(),
                status: task.status,
            });
        }
        if task.assigned_to.as_ref() != Some(agent_id) {
            return Err(CoordinatorError::NotAssignee {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
            });
        }
        Ok(task)
    }

    fn assign(&mut self, task_id: &TaskId, events: &EventBus) -> Result<AgentId, CoordinatorError> {
        let task = self.task(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(CoordinatorError::InvalidTaskStatus {
                task_id: task_id.clone(),
                status: task.status,
            });
        }

        let blocked_on = task.dependencies.iter().find(|dep| {
            self.tasks
                .get(*dep)
                .map_or(true, |d| d.status != TaskStatus::Completed)
        });
        if let Some(dependency) = blocked_on {
            return Err(CoordinatorError::DependencyIncomplete {
                task_id: task_id.clone(),
                dependency: dependency.clone(),
            });
        }

        let candidates = self
            .agent_order
            .iter()
            .filter_map(|id| self.agents.get(id))
            .filter(|agent| agent.is_idle() && agent.has_capabilities(&task.required_capabilities));
        let agent_id = best_candidate(candidates, &task.required_capabilities)
            .map(|agent| agent.id.clone())
            .ok_or_else(|| CoordinatorError::NoEligibleAgent(task_id.clone()))?;

        self.agent_mut(&agent_id)?.status = AgentStatus::Busy;
        let task = self.task_mut(task_id)?;
        task.status = TaskStatus::Assigned;
        task.assigned_to = Some(agent_id.clone());
        task.touch();
        let snapshot = task.clone();

        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Task assigned");
        events.publish(SwarmEvent::TaskAssigned {
            task: snapshot,
            agent_id: agent_id.clone(),
        });
        Ok(agent_id)
    }

    /// Return `agent_id` to idle and log the task outcome in its history.
    fn release(&mut self, agent_id: &AgentId, task_id: &TaskId, outcome: TaskOutcome) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.status = AgentStatus::Idle;
        }
        self.histories
            .entry(agent_id.clone())
            .or_default()
            .push(TaskHistoryEntry {
                task_id: task_id.clone(),
                outcome,
                at: Utc::now(),
            });
    }

    /// Finish an in-progress task successfully and unlock its dependents.
    fn complete(
        &mut self,
        task_id: &TaskId,
        agent_id: &AgentId,
        result: serde_json::Value,
        events: &EventBus,
    ) -> Result<(), CoordinatorError> {
        let task = self.held_task_mut(task_id, agent_id, &[TaskStatus::InProgress])?;
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.touch();
        let snapshot = task.clone();

        self.finish_completed(snapshot, agent_id, events);
        Ok(())
    }

    fn finish_completed(&mut self, task: SwarmTask, agent_id: &AgentId, events: &EventBus) {
        let task_id = task.id.clone();
        self.release(agent_id, &task_id, TaskOutcome::Completed);
        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Task completed");
        events.publish(SwarmEvent::TaskCompleted {
            task,
            agent_id: agent_id.clone(),
        });
        self.cascade(&task_id, events);
    }

    /// Attempt assignment of every pending task that depends on `completed`.
    fn cascade(&mut self, completed: &TaskId, events: &EventBus) {
        let dependents: Vec<TaskId> = self
            .task_order
            .iter()
            .filter(|id| {
                self.tasks.get(*id).is_some_and(|t| {
                    t.status == TaskStatus::Pending && t.dependencies.contains(completed)
                })
            })
            .cloned()
            .collect();

        for task_id in dependents {
            if let Err(e) = self.assign(&task_id, events) {
                tracing::debug!(task_id = %task_id, unlocked_by = %completed, reason = %e, "Dependent task still pending");
            }
        }
    }

    fn retry_pending(&mut self, events: &EventBus) -> usize {
        let pending: Vec<TaskId> = self
            .task_order
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|t| t.status == TaskStatus::Pending))
            .cloned()
            .collect();

        pending
            .iter()
            .filter(|task_id| match self.assign(task_id, events) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(task_id = %task_id, reason = %e, "Pending task not assigned");
                    false
                }
            })
            .count()
    }

    fn complete_consensus(
        &mut self,
        id: &ConsensusId,
        events: &EventBus,
    ) -> Result<SwarmSolution, CoordinatorError> {
        let process = self.process_mut(id)?;
        let winner = process.complete()?;
        let process = process.clone();

        if let Some(task) = self.tasks.get_mut(&process.task_id) {
            task.result = Some(serde_json::json!({
                "solution": winner.solution,
                "consensusId": id,
                "confidence": winner.confidence,
            }));
            task.touch();

            if let (TaskStatus::InProgress, Some(agent_id)) = (task.status, task.assigned_to.clone()) {
                task.status = TaskStatus::Completed;
                let snapshot = task.clone();
                self.finish_completed(snapshot, &agent_id, events);
            }
        }

        events.publish(SwarmEvent::ConsensusCompleted {
            process,
            winning_solution: winner.clone(),
        });
        Ok(winner)
    }
}

/// Log a rejected operation and collapse it into `None`.
fn accepted<T>(operation: &'static str, outcome: Result<T, CoordinatorError>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(operation, reason = %e, "Operation rejected");
            None
        }
    }
}

/// Registry, task lifecycle and consensus driver for one swarm.
pub struct SwarmCoordinator {
    state: RwLock<CoordinatorState>,
    events: EventBus,
}

impl Default for SwarmCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl SwarmCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            state: RwLock::new(CoordinatorState::default()),
            events: EventBus::new(config.event_capacity),
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Receive only events of `kind`.
    pub fn subscribe_kind(&self, kind: SwarmEventKind) -> EventReceiver {
        self.events.subscribe_kind(kind)
    }

    // ── Agents ──

    /// Add an agent as idle. Registering a known id replaces its profile
    /// but keeps its status and history.
    ///
    /// Performance data with a success rate outside [0, 1] is discarded.
    pub async fn register_agent(&self, mut spec: AgentSpec) -> Agent {
        let mut state = self.state.write().await;
        let id = spec.id.take().unwrap_or_else(AgentId::generate);
        if let Some(perf) = spec.performance.as_ref().filter(|perf| !perf.is_valid()) {
            tracing::warn!(
                agent_id = %id,
                success_rate = perf.success_rate,
                "Discarding invalid performance data"
            );
            spec.performance = None;
        }

        if let Some(existing) = state.agents.get_mut(&id) {
            existing.name = spec.name;
            existing.role = spec.role;
            existing.capabilities = spec.capabilities;
            existing.performance = spec.performance;
            tracing::info!(agent_id = %id, "Agent re-registered");
            return existing.clone();
        }

        let agent = Agent {
            id: id.clone(),
            name: spec.name,
            role: spec.role,
            capabilities: spec.capabilities,
            status: AgentStatus::Idle,
            performance: spec.performance,
        };
        state.agents.insert(id.clone(), agent.clone());
        state.agent_order.push(id.clone());
        state.histories.entry(id.clone()).or_default();

        tracing::info!(
            agent_id = %id,
            name = %agent.name,
            capabilities = ?agent.capabilities,
            "Agent registered"
        );
        agent
    }

    pub async fn update_agent_performance(&self, agent_id: &AgentId, performance: AgentPerformance) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.agent_mut(agent_id).and_then(|agent| {
            if !performance.is_valid() {
                return Err(CoordinatorError::InvalidPerformance {
                    agent_id: agent_id.clone(),
                    success_rate: performance.success_rate,
                });
            }
            agent.performance = Some(performance);
            Ok(())
        });
        accepted("update_agent_performance", outcome).is_some()
    }

    /// Take an idle agent out of the candidate pool.
    pub async fn set_agent_offline(&self, agent_id: &AgentId) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.agent_mut(agent_id).and_then(|agent| {
            if agent.status != AgentStatus::Idle {
                return Err(CoordinatorError::InvalidAgentStatus {
                    agent_id: agent_id.clone(),
                    status: agent.status,
                });
            }
            agent.status = AgentStatus::Offline;
            Ok(())
        });
        let ok = accepted("set_agent_offline", outcome).is_some();
        if ok {
            tracing::info!(agent_id = %agent_id, "Agent offline");
        }
        ok
    }

    /// Bring an offline agent back and retry every pending task.
    pub async fn set_agent_online(&self, agent_id: &AgentId) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.agent_mut(agent_id).and_then(|agent| {
            if agent.status != AgentStatus::Offline {
                return Err(CoordinatorError::InvalidAgentStatus {
                    agent_id: agent_id.clone(),
                    status: agent.status,
                });
            }
            agent.status = AgentStatus::Idle;
            Ok(())
        });
        if accepted("set_agent_online", outcome).is_none() {
            return false;
        }
        tracing::info!(agent_id = %agent_id, "Agent online");
        state.retry_pending(&self.events);
        true
    }

    // ── Task lifecycle ──

    /// Create a pending task and immediately try to assign it.
    ///
    /// `task:created` follows the attempt and carries the task as it then
    /// stands, so a successful assignment's `task:assigned` comes first.
    /// Returns that same snapshot, or `None` when an explicit id is taken.
    pub async fn create_task(&self, spec: TaskSpec) -> Option<SwarmTask> {
        let mut state = self.state.write().await;
        let task = SwarmTask::from_spec(spec);
        let task_id = task.id.clone();
        if state.tasks.contains_key(&task_id) {
            return accepted("create_task", Err(CoordinatorError::DuplicateTask(task_id)));
        }

        state.tasks.insert(task_id.clone(), task.clone());
        state.task_order.push(task_id.clone());
        tracing::info!(
            task_id = %task_id,
            title = %task.title,
            dependencies = task.dependencies.len(),
            "Task created"
        );

        if let Err(e) = state.assign(&task_id, &self.events) {
            tracing::debug!(task_id = %task_id, reason = %e, "New task left pending");
        }
        let created = state.task(&task_id).ok()?.clone();
        self.events.publish(SwarmEvent::TaskCreated {
            task: created.clone(),
        });
        Some(created)
    }

    /// Try to hand a pending task to the best idle, capable agent.
    pub async fn assign_task(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.write().await;
        accepted("assign_task", state.assign(task_id, &self.events)).is_some()
    }

    /// Re-attempt assignment of every pending task, in creation order.
    /// Returns how many were assigned.
    pub async fn retry_pending(&self) -> usize {
        let mut state = self.state.write().await;
        state.retry_pending(&self.events)
    }

    pub async fn start_task(&self, task_id: &TaskId, agent_id: &AgentId) -> bool {
        let mut state = self.state.write().await;
        let outcome = state
            .held_task_mut(task_id, agent_id, &[TaskStatus::Assigned])
            .map(|task| {
                task.status = TaskStatus::InProgress;
                task.touch();
                task.clone()
            });
        let Some(task) = accepted("start_task", outcome) else {
            return false;
        };
        tracing::info!(task_id = %task_id, agent_id = %agent_id, "Task started");
        self.events.publish(SwarmEvent::TaskStarted {
            task,
            agent_id: agent_id.clone(),
        });
        true
    }

    pub async fn complete_task(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        result: serde_json::Value,
    ) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.complete(task_id, agent_id, result, &self.events);
        accepted("complete_task", outcome).is_some()
    }

    /// Mark a held task failed. Dependents are left pending.
    pub async fn fail_task(&self, task_id: &TaskId, agent_id: &AgentId, reason: &str) -> bool {
        let mut state = self.state.write().await;
        let outcome = state
            .held_task_mut(task_id, agent_id, &[TaskStatus::Assigned, TaskStatus::InProgress])
            .map(|task| {
                task.status = TaskStatus::Failed;
                task.result = Some(serde_json::json!({ "error": reason }));
                task.touch();
                task.clone()
            });
        let Some(task) = accepted("fail_task", outcome) else {
            return false;
        };

        state.release(agent_id, task_id, TaskOutcome::Failed);
        tracing::warn!(task_id = %task_id, agent_id = %agent_id, reason, "Task failed");
        self.events.publish(SwarmEvent::TaskFailed {
            task,
            agent_id: agent_id.clone(),
            reason: reason.to_string(),
        });
        true
    }

    // ── Consensus ──

    /// Open a consensus process for an existing task.
    pub async fn start_consensus(&self, task_id: &TaskId) -> Option<ConsensusProcess> {
        let mut state = self.state.write().await;
        let task = accepted("start_consensus", state.task(task_id).cloned())?;

        let process = ConsensusProcess::new(task_id.clone());
        state.processes.insert(process.id.clone(), process.clone());

        tracing::info!(consensus_id = %process.id, task_id = %task_id, "Consensus started");
        self.events.publish(SwarmEvent::ConsensusStarted {
            process: process.clone(),
            task,
        });
        Some(process)
    }

    pub async fn submit_solution(
        &self,
        consensus_id: &ConsensusId,
        agent_id: &AgentId,
        solution: serde_json::Value,
        confidence: f64,
        reasoning: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.process_mut(consensus_id).and_then(|process| {
            let submitted = process
                .submit_solution(agent_id.clone(), solution, confidence, reasoning.to_string())?
                .clone();
            Ok((process.clone(), submitted))
        });
        let Some((process, solution)) = accepted("submit_solution", outcome) else {
            return false;
        };
        self.events
            .publish(SwarmEvent::ConsensusSolution { process, solution });
        true
    }

    pub async fn start_voting(&self, consensus_id: &ConsensusId) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.process_mut(consensus_id).and_then(|process| {
            process.start_voting()?;
            Ok(process.clone())
        });
        let Some(process) = accepted("start_voting", outcome) else {
            return false;
        };
        tracing::info!(
            consensus_id = %consensus_id,
            solutions = process.solutions.len(),
            "Consensus voting opened"
        );
        self.events.publish(SwarmEvent::ConsensusVoting { process });
        true
    }

    /// Record `voter`'s vote for the solution submitted by `candidate`.
    /// A repeat vote from the same voter replaces the earlier one.
    pub async fn submit_vote(
        &self,
        consensus_id: &ConsensusId,
        voter: &AgentId,
        candidate: &AgentId,
    ) -> bool {
        let mut state = self.state.write().await;
        let outcome = state.process_mut(consensus_id).and_then(|process| {
            process.submit_vote(voter.clone(), candidate.clone())?;
            Ok(process.clone())
        });
        let Some(process) = accepted("submit_vote", outcome) else {
            return false;
        };
        self.events.publish(SwarmEvent::ConsensusVote {
            process,
            voter: voter.clone(),
            voted_for: candidate.clone(),
        });
        true
    }

    /// Tally the votes, freeze the winner and write it onto the task.
    ///
    /// An in-progress task is completed on behalf of its assignee, which
    /// also runs the dependency cascade.
    pub async fn complete_consensus(&self, consensus_id: &ConsensusId) -> Option<SwarmSolution> {
        let mut state = self.state.write().await;
        let outcome = state.complete_consensus(consensus_id, &self.events);
        accepted("complete_consensus", outcome)
    }

    // ── Queries ──

    pub async fn get_agent(&self, agent_id: &AgentId) -> Option<Agent> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Option<SwarmTask> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    pub async fn get_consensus_process(&self, consensus_id: &ConsensusId) -> Option<ConsensusProcess> {
        self.state.read().await.processes.get(consensus_id).cloned()
    }

    /// All agents in registration order.
    pub async fn get_all_agents(&self) -> Vec<Agent> {
        let state = self.state.read().await;
        state
            .agent_order
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    /// All tasks in creation order.
    pub async fn get_all_tasks(&self) -> Vec<SwarmTask> {
        let state = self.state.read().await;
        state
            .task_order
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect()
    }

    pub async fn get_agent_task_history(&self, agent_id: &AgentId) -> Vec<TaskHistoryEntry> {
        self.state
            .read()
            .await
            .histories
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_agents_with_capability(&self, capability: &str) -> Vec<Agent> {
        self.get_all_agents()
            .await
            .into_iter()
            .filter(|agent| agent.capabilities.contains(capability))
            .collect()
    }

    pub async fn get_idle_agents(&self) -> Vec<Agent> {
        self.get_all_agents()
            .await
            .into_iter()
            .filter(Agent::is_idle)
            .collect()
    }
}
