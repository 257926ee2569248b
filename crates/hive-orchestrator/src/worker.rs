//! Agent-side responder for step requests.
//!
//! An `AgentWorker` listens on a task channel as one agent of a given
//! type, runs its `ActionHandler` for each request addressed to that type
//! and replies directly to the requester. A handler failure is recorded
//! as a failed metric and produces no reply, so the requester only ever
//! sees it as a step timeout.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::task::{JoinHandle, JoinSet};

use hive_bus::{BusError, MessageBus};
use hive_protocol::{AgentId, Message, MessageKind, Recipient, StepRequest, StepResponse};

use crate::metrics::{MetricRecord, MetricsSink};
use crate::HandlerError;

/// Trait for the work an agent performs for a step.
///
/// Implementations wrap whatever actually fulfils the payload (an LLM
/// client, an HTTP service, local code).
pub trait ActionHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value, HandlerError>>;
}

/// Adapts a synchronous closure into an `ActionHandler`.
pub struct FnHandler<F>(pub F);

impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&StepRequest) -> Result<serde_json::Value, HandlerError> + Send + Sync,
{
    fn handle<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        Box::pin(async move { (self.0)(request) })
    }
}

/// Answers a fixed set of actions by echoing the request data back.
pub struct EchoHandler {
    pub agent_id: AgentId,
    /// Actions this handler accepts; empty accepts all.
    pub actions: Vec<String>,
}

impl EchoHandler {
    pub fn new(agent_id: AgentId, actions: Vec<String>) -> Self {
        Self { agent_id, actions }
    }
}

impl ActionHandler for EchoHandler {
    fn handle<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        Box::pin(async move {
            if !self.actions.is_empty() && !self.actions.contains(&request.action) {
                return Err(HandlerError::Unsupported(request.action.clone()));
            }
            Ok(serde_json::json!({
                "agent": self.agent_id,
                "action": request.action,
                "step": request.step_id,
                "data": request.data,
            }))
        })
    }
}

/// A running responder. Stops when shut down or dropped; requests still
/// being handled are aborted with it.
pub struct AgentWorker {
    agent_id: AgentId,
    agent_type: String,
    task: JoinHandle<()>,
}

/// Everything one in-flight request needs, shared across request tasks.
struct Responder {
    bus: MessageBus,
    channel: String,
    agent_id: AgentId,
    agent_type: String,
    handler: Arc<dyn ActionHandler>,
    metrics: Arc<dyn MetricsSink>,
}

impl AgentWorker {
    /// Subscribe to `channel` and start answering requests for `agent_type`.
    ///
    /// Each accepted request runs on its own task, so concurrent steps
    /// sent to one worker are handled concurrently.
    pub async fn spawn(
        bus: MessageBus,
        channel: &str,
        agent_id: AgentId,
        agent_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, BusError> {
        let agent_type = agent_type.into();
        let mut subscription = bus.subscribe(channel, &agent_id).await?;

        let responder = Arc::new(Responder {
            bus,
            channel: channel.to_string(),
            agent_id: agent_id.clone(),
            agent_type: agent_type.clone(),
            handler,
            metrics,
        });

        let task = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            while let Some(message) = subscription.recv().await {
                while in_flight.try_join_next().is_some() {}
                if message.kind != MessageKind::Request {
                    continue;
                }
                let request: StepRequest = match serde_json::from_value(message.payload.clone()) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!(agent_id = %responder.agent_id, error = %e, "Ignoring malformed request");
                        continue;
                    }
                };
                if request.agent_type != responder.agent_type {
                    continue;
                }
                in_flight.spawn(responder.clone().respond(message.from, request));
            }
        });

        tracing::info!(agent_id = %agent_id, agent_type = %agent_type, "Agent worker started");

        Ok(Self {
            agent_id,
            agent_type,
            task,
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for AgentWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Responder {
    async fn respond(self: Arc<Self>, requester: AgentId, request: StepRequest) {
        let started = Instant::now();
        let outcome = self.handler.handle(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(result) => {
                let response = StepResponse {
                    request_id: Some(request.request_id.clone()),
                    action: request.action.clone(),
                    result,
                };
                match serde_json::to_value(&response) {
                    Ok(payload) => {
                        let reply = Message::response(
                            self.agent_id.clone(),
                            Recipient::Agent(requester.clone()),
                            payload,
                        );
                        match self.bus.send_direct(&self.channel, &requester, reply).await {
                            Ok(()) => None,
                            Err(e) => Some(e.to_string()),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(agent_id = %self.agent_id, error = %e, "Unserializable step result");
                        Some(e.to_string())
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    agent_id = %self.agent_id,
                    task_id = %request.task_id,
                    step_id = %request.step_id,
                    error = %e,
                    "Step handler failed; no response sent"
                );
                Some(e.to_string())
            }
        };

        self.metrics.record(
            self.agent_id.as_str(),
            MetricRecord {
                timestamp: Utc::now(),
                success: error.is_none(),
                duration_ms,
                kind: request.action.clone(),
                context: self.agent_type.clone(),
                details: serde_json::json!({
                    "taskId": request.task_id,
                    "stepId": request.step_id,
                    "error": error,
                }),
            },
        );
    }
}
