//! A single-process Hive node: in-memory bus, orchestrator, coordinator,
//! the configured echo workers and the event bridge.
//!
//! Every `execute` run is tracked as a coordinator task held by the
//! orchestrator's own agent, so its lifecycle events reach the bus.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;

use hive_bus::MessageBus;
use hive_coordinator::SwarmCoordinator;
use hive_orchestrator::{
    AgentWorker, EchoHandler, ExecutionOutcome, MetricsSink, Orchestrator, OrchestratorError,
    TaskDefinition, TaskGraph, TracingMetrics,
};
use hive_protocol::{AgentId, AgentSpec, AgentStatus, TaskId, TaskSpec, ORCHESTRATOR_ID};

use crate::bridge::{snapshot_agent, EventBridge};
use crate::config::NodeConfig;

pub struct Node {
    pub bus: MessageBus,
    pub orchestrator: Arc<Orchestrator>,
    pub coordinator: Arc<SwarmCoordinator>,
    workers: Vec<AgentWorker>,
    bridge: EventBridge,
    /// Runs are serialized so the orchestrator agent holds one task at a time.
    run_lock: Mutex<()>,
}

/// Capability of the agent that runs task definitions.
pub const RUN_CAPABILITY: &str = "orchestration";

impl Node {
    pub async fn start(config: &NodeConfig) -> Result<Self> {
        let bus = MessageBus::in_memory(config.bus_config());
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
        let orchestrator = Arc::new(Orchestrator::new(
            bus.clone(),
            metrics.clone(),
            config.orchestrator_config(),
        ));
        let coordinator = Arc::new(SwarmCoordinator::default());
        let bridge = EventBridge::spawn(coordinator.clone(), bus.clone());

        let runner = AgentId::new(ORCHESTRATOR_ID);
        coordinator
            .register_agent(
                AgentSpec::new(ORCHESTRATOR_ID)
                    .with_id(runner.clone())
                    .with_role(ORCHESTRATOR_ID)
                    .with_capabilities([RUN_CAPABILITY]),
            )
            .await;
        snapshot_agent(&coordinator, &bus, &runner).await;

        let mut workers = Vec::with_capacity(config.workers.len());
        for section in &config.workers {
            let agent_id = AgentId::new(section.agent_id.clone());
            coordinator
                .register_agent(
                    AgentSpec::new(section.agent_id.clone())
                        .with_id(agent_id.clone())
                        .with_role(section.agent_type.clone())
                        .with_capabilities([section.agent_type.clone()]),
                )
                .await;
            snapshot_agent(&coordinator, &bus, &agent_id).await;

            let handler = Arc::new(EchoHandler::new(agent_id.clone(), section.actions.clone()));
            let worker = AgentWorker::spawn(
                bus.clone(),
                &config.orchestrator.task_channel,
                agent_id,
                section.agent_type.clone(),
                handler,
                metrics.clone(),
            )
            .await
            .with_context(|| format!("Failed to start worker {}", section.agent_id))?;
            workers.push(worker);
        }

        tracing::info!(
            workers = workers.len(),
            channel = %config.orchestrator.task_channel,
            "Node started"
        );

        Ok(Self {
            bus,
            orchestrator,
            coordinator,
            workers,
            bridge,
            run_lock: Mutex::new(()),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn execute(
        &self,
        definition: &TaskDefinition,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let _run = self.run_lock.lock().await;

        let mut definition = definition.clone();
        let task_id = definition.id.get_or_insert_with(TaskId::generate).clone();
        let tracked = self.track_run(&definition).await;

        let outcome = self.orchestrator.execute_task(&definition, data).await;

        if tracked {
            let runner = AgentId::new(ORCHESTRATOR_ID);
            match &outcome {
                Ok(outcome) => {
                    let result = serde_json::json!({
                        "results": outcome.results,
                        "durationMs": outcome.duration_ms,
                    });
                    self.coordinator.complete_task(&task_id, &runner, result).await;
                }
                Err(e) => {
                    self.coordinator
                        .fail_task(&task_id, &runner, &e.to_string())
                        .await;
                }
            }
        }
        outcome
    }

    /// Open a coordinator task for this run and start it on the orchestrator
    /// agent. Returns false when the run cannot be tracked.
    async fn track_run(&self, definition: &TaskDefinition) -> bool {
        let runner = AgentId::new(ORCHESTRATOR_ID);
        let idle = self
            .coordinator
            .get_agent(&runner)
            .await
            .is_some_and(|agent| agent.status == AgentStatus::Idle);
        if !idle {
            tracing::warn!(name = %definition.name, "Orchestrator agent unavailable; run is untracked");
            return false;
        }

        let mut spec = TaskSpec::new(definition.name.clone())
            .with_description(format!("{} steps", definition.steps.len()))
            .with_capabilities([RUN_CAPABILITY]);
        if let Some(id) = &definition.id {
            spec = spec.with_id(id.clone());
        }
        let Some(task) = self.coordinator.create_task(spec).await else {
            return false;
        };
        if task.assigned_to.as_ref() != Some(&runner) {
            return false;
        }
        self.coordinator.start_task(&task.id, &runner).await
    }

    pub fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown();
        }
        self.bridge.shutdown();
        tracing::info!("Node stopped");
    }
}

/// Read a task definition, filling in `default_timeout_ms` for every step
/// that does not set its own timeout.
pub fn load_definition(path: &Path, default_timeout_ms: u64) -> Result<TaskDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task definition {}", path.display()))?;
    parse_definition(&content, default_timeout_ms)
        .with_context(|| format!("Invalid task definition {}", path.display()))
}

pub fn parse_definition(content: &str, default_timeout_ms: u64) -> Result<TaskDefinition> {
    let mut raw: serde_json::Value = serde_json::from_str(content)?;
    if let Some(steps) = raw.get_mut("steps").and_then(|s| s.as_array_mut()) {
        for step in steps.iter_mut().filter_map(|s| s.as_object_mut()) {
            step.entry("timeout_ms")
                .or_insert_with(|| serde_json::Value::from(default_timeout_ms));
        }
    }
    Ok(serde_json::from_value(raw)?)
}

/// Check that a definition can run: unique ids, no cycles, and every
/// dependency names a step of the same definition.
pub fn validate_definition(definition: &TaskDefinition) -> Result<TaskGraph> {
    let known: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
    let unknown: Vec<String> = definition
        .steps
        .iter()
        .flat_map(|step| {
            step.depends_on
                .iter()
                .filter(|dep| !known.contains(dep.as_str()))
                .map(move |dep| format!("{} -> {}", step.id, dep))
        })
        .collect();
    if !unknown.is_empty() {
        bail!("Unknown dependencies: {}", unknown.join(", "));
    }
    Ok(TaskGraph::new(definition.steps.clone())?)
}
