//! Task execution: scheduling ready steps and resolving them over the bus.
//!
//! Each step is a request/response exchange:
//! 1. subscribe to the task channel (before publishing, so a fast
//!    responder cannot be missed)
//! 2. publish a broadcast `StepRequest`
//! 3. wait for the first matching `StepResponse`, bounded by the step timeout
//! 4. unsubscribe, whichever side of the race won
//!
//! The first failing step aborts the whole task. Steps that already
//! completed are not rolled back and no partial result is returned.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use hive_bus::{BusError, MessageBus, Subscription};
use hive_protocol::{
    AgentId, Message, MessageKind, StepRequest, StepResponse, TaskId, DEFAULT_TASK_CHANNEL,
    ORCHESTRATOR_ID,
};

use crate::graph::{StepDefinition, TaskDefinition, TaskGraph};
use crate::metrics::{MetricRecord, MetricsSink};
use crate::OrchestratorError;

type Data = serde_json::Map<String, serde_json::Value>;

/// Where the orchestrator talks and who it is on the bus.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub channel: String,
    pub sender_id: AgentId,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_TASK_CHANNEL.to_string(),
            sender_id: AgentId::new(ORCHESTRATOR_ID),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ContextStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContextStatus::Completed | ContextStatus::Failed)
    }
}

/// Lifecycle record of one `execute_task` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub name: String,
    pub status: ContextStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Results of a fully completed task, keyed by step id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub task_id: TaskId,
    pub results: BTreeMap<String, serde_json::Value>,
    pub duration_ms: u64,
}

pub struct Orchestrator {
    bus: MessageBus,
    metrics: Arc<dyn MetricsSink>,
    config: OrchestratorConfig,
    contexts: RwLock<HashMap<TaskId, TaskContext>>,
}

impl Orchestrator {
    pub fn new(bus: MessageBus, metrics: Arc<dyn MetricsSink>, config: OrchestratorConfig) -> Self {
        Self {
            bus,
            metrics,
            config,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run every step of `definition` to completion.
    pub async fn execute_task(
        &self,
        definition: &TaskDefinition,
        initial_data: Data,
    ) -> Result<ExecutionOutcome, OrchestratorError> {
        let task_id = definition.id.clone().unwrap_or_else(TaskId::generate);
        let started = Instant::now();

        {
            let mut contexts = self.contexts.write().await;
            if contexts.contains_key(&task_id) {
                return Err(OrchestratorError::DuplicateTask(task_id));
            }
            contexts.insert(
                task_id.clone(),
                TaskContext {
                    task_id: task_id.clone(),
                    name: definition.name.clone(),
                    status: ContextStatus::Pending,
                    started_at: Utc::now(),
                    finished_at: None,
                    error: None,
                },
            );
        }

        let run = match TaskGraph::new(definition.steps.clone()) {
            Ok(graph) => {
                self.transition(&task_id, ContextStatus::InProgress, None).await;
                tracing::info!(
                    task_id = %task_id,
                    name = %definition.name,
                    steps = graph.len(),
                    "Task execution started"
                );
                self.run_graph(&task_id, graph, &initial_data).await
            }
            Err(e) => Err(e),
        };

        match run {
            Ok(results) => {
                self.transition(&task_id, ContextStatus::Completed, None).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(task_id = %task_id, duration_ms, "Task execution completed");
                Ok(ExecutionOutcome {
                    task_id,
                    results,
                    duration_ms,
                })
            }
            Err(e) => {
                self.transition(&task_id, ContextStatus::Failed, Some(e.to_string())).await;
                tracing::warn!(task_id = %task_id, error = %e, "Task execution failed");
                Err(e)
            }
        }
    }

    async fn run_graph(
        &self,
        task_id: &TaskId,
        mut graph: TaskGraph,
        context: &Data,
    ) -> Result<BTreeMap<String, serde_json::Value>, OrchestratorError> {
        while !graph.is_complete() {
            let ready: Vec<StepDefinition> = graph.ready_steps().into_iter().cloned().collect();
            if ready.is_empty() {
                return Err(OrchestratorError::Deadlock {
                    task_id: task_id.clone(),
                    pending: graph.pending_steps(),
                });
            }

            tracing::debug!(
                task_id = %task_id,
                ready = ?ready.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                "Dispatching ready steps"
            );

            let prior = graph.results();
            let results = try_join_all(ready.iter().map(|step| {
                let data = build_step_data(step, context, prior);
                self.execute_step(task_id, step, data)
            }))
            .await?;

            for (step, result) in ready.iter().zip(results) {
                graph.mark_completed(&step.id, result);
            }
        }
        Ok(graph.into_results())
    }

    /// Resolve a single step. Records one metric whatever the outcome.
    pub async fn execute_step(
        &self,
        task_id: &TaskId,
        step: &StepDefinition,
        data: Data,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let meter = StepMeter {
            metrics: self.metrics.as_ref(),
            task_id,
            step,
            started: Instant::now(),
            finished: false,
        };
        let outcome = self.request_response(task_id, step, data).await;
        match &outcome {
            Ok(_) => meter.finish(true, None),
            Err(e) => meter.finish(false, Some(e.to_string())),
        }
        outcome
    }

    async fn request_response(
        &self,
        task_id: &TaskId,
        step: &StepDefinition,
        data: Data,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let channel = self.config.channel.as_str();
        let request = StepRequest {
            request_id: Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            step_id: step.id.clone(),
            agent_type: step.agent_type.clone(),
            action: step.action.clone(),
            data,
            priority: step.priority,
        };
        let message = Message::request(self.config.sender_id.clone(), serde_json::to_value(&request)?);

        let mut subscription = self.bus.subscribe(channel, &self.config.sender_id).await?;
        if let Err(e) = self.bus.publish(channel, &message).await {
            subscription.unsubscribe();
            return Err(e.into());
        }

        tracing::debug!(
            task_id = %task_id,
            step_id = %step.id,
            action = %step.action,
            request_id = %request.request_id,
            timeout_ms = step.timeout_ms,
            "Step request published"
        );

        let waited = tokio::time::timeout(
            Duration::from_millis(step.timeout_ms),
            await_response(&mut subscription, &request),
        )
        .await;
        subscription.unsubscribe();

        match waited {
            Ok(Some(response)) => Ok(response.result),
            Ok(None) => Err(OrchestratorError::Bus(BusError::Unavailable(format!(
                "channel {channel} closed while waiting for step {}",
                step.id
            )))),
            Err(_) => Err(OrchestratorError::StepTimeout {
                task_id: task_id.clone(),
                step_id: step.id.clone(),
                action: step.action.clone(),
                timeout_ms: step.timeout_ms,
            }),
        }
    }

    pub async fn task_context(&self, task_id: &TaskId) -> Option<TaskContext> {
        self.contexts.read().await.get(task_id).cloned()
    }

    pub async fn task_status(&self, task_id: &TaskId) -> Option<ContextStatus> {
        self.contexts.read().await.get(task_id).map(|c| c.status)
    }

    /// Drop every completed or failed context and return how many went.
    ///
    /// Contexts are otherwise kept for the orchestrator's lifetime. A pruned
    /// task id may be executed again.
    pub async fn prune_finished(&self) -> usize {
        let mut contexts = self.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| !ctx.status.is_terminal());
        let pruned = before - contexts.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished task contexts");
        }
        pruned
    }

    /// Move a context forward. Terminal states never change again.
    async fn transition(&self, task_id: &TaskId, status: ContextStatus, error: Option<String>) {
        let mut contexts = self.contexts.write().await;
        if let Some(ctx) = contexts.get_mut(task_id) {
            if ctx.status.is_terminal() {
                return;
            }
            ctx.status = status;
            if status.is_terminal() {
                ctx.finished_at = Some(Utc::now());
                ctx.error = error;
            }
        }
    }
}

/// First response on the subscription that resolves `request`.
async fn await_response(subscription: &mut Subscription, request: &StepRequest) -> Option<StepResponse> {
    while let Some(message) = subscription.recv().await {
        if message.kind != MessageKind::Response {
            continue;
        }
        match serde_json::from_value::<StepResponse>(message.payload) {
            Ok(response) if response.answers(request) => return Some(response),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    from = %message.from,
                    error = %e,
                    "Ignoring malformed step response"
                );
            }
        }
    }
    None
}

/// Data sent with a step request: the task context (narrowed to the
/// step's `required_data` when it names any keys) overlaid with the
/// results of every completed step, keyed by step id.
pub fn build_step_data(
    step: &StepDefinition,
    context: &Data,
    prior_results: &BTreeMap<String, serde_json::Value>,
) -> Data {
    let mut data: Data = if step.required_data.is_empty() {
        context.clone()
    } else {
        step.required_data
            .iter()
            .filter_map(|key| context.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    };
    for (step_id, result) in prior_results {
        data.insert(step_id.clone(), result.clone());
    }
    data
}

/// Emits the step metric exactly once, including when the step future is
/// dropped because a sibling step failed first.
struct StepMeter<'a> {
    metrics: &'a dyn MetricsSink,
    task_id: &'a TaskId,
    step: &'a StepDefinition,
    started: Instant,
    finished: bool,
}

impl StepMeter<'_> {
    fn finish(mut self, success: bool, error: Option<String>) {
        self.emit(success, error);
        self.finished = true;
    }

    fn emit(&self, success: bool, error: Option<String>) {
        self.metrics.record(
            self.task_id.as_str(),
            MetricRecord {
                timestamp: Utc::now(),
                success,
                duration_ms: self.started.elapsed().as_millis() as u64,
                kind: self.step.action.clone(),
                context: self.step.agent_type.clone(),
                details: serde_json::json!({
                    "taskId": self.task_id,
                    "stepId": self.step.id,
                    "error": error,
                }),
            },
        );
    }
}

impl Drop for StepMeter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.emit(false, Some("cancelled".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Data {
        serde_json::json!({"sku": "X1", "region": "eu", "budget": 10})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_step_data_includes_whole_context_by_default() {
        let step = StepDefinition::new("a", "pricing", "quote");
        let data = build_step_data(&step, &context(), &BTreeMap::new());
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_step_data_narrowed_to_required_keys() {
        let step = StepDefinition::new("b", "pricing", "quote").requires(["sku", "missing"]);
        let mut prior = BTreeMap::new();
        prior.insert("a".to_string(), serde_json::json!({"price": 12}));

        let data = build_step_data(&step, &context(), &prior);
        assert_eq!(data.get("sku"), Some(&serde_json::json!("X1")));
        assert!(data.get("region").is_none());
        assert!(data.get("missing").is_none());
        assert_eq!(data["a"]["price"], 12);
    }

    #[test]
    fn test_terminal_status() {
        assert!(ContextStatus::Completed.is_terminal());
        assert!(ContextStatus::Failed.is_terminal());
        assert!(!ContextStatus::InProgress.is_terminal());
    }
}
