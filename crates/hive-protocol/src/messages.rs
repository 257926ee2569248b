use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{AgentId, TaskId};

/// Addressee of a bus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Broadcast,
    Agent(AgentId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
}

/// Envelope for everything carried by the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: AgentId,
    pub to: Recipient,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(from: AgentId, to: Recipient, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// A broadcast notification to every subscriber of a channel.
    pub fn broadcast(from: AgentId, payload: serde_json::Value) -> Self {
        Self::new(from, Recipient::Broadcast, MessageKind::Broadcast, payload)
    }

    /// A broadcast request expecting a response from whichever agent handles it.
    pub fn request(from: AgentId, payload: serde_json::Value) -> Self {
        Self::new(from, Recipient::Broadcast, MessageKind::Request, payload)
    }

    pub fn response(from: AgentId, to: Recipient, payload: serde_json::Value) -> Self {
        Self::new(from, to, MessageKind::Response, payload)
    }

    /// Whether `subscriber` should see this message.
    ///
    /// Broadcasts reach everyone but the sender; direct messages only
    /// their addressee.
    pub fn is_visible_to(&self, subscriber: &AgentId) -> bool {
        match &self.to {
            Recipient::Broadcast => &self.from != subscriber,
            Recipient::Agent(target) => target == subscriber,
        }
    }
}

// ── Step exchange payloads ──

/// Payload of a step request published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub request_id: String,
    pub task_id: TaskId,
    pub step_id: String,
    pub agent_type: String,
    pub action: String,
    /// Task context merged with the results of completed steps.
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub priority: i32,
}

/// Payload of the response an agent publishes after handling a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub action: String,
    pub result: serde_json::Value,
}

impl StepResponse {
    /// Whether this response resolves the given request.
    ///
    /// Responses are matched on action; a response that carries a request
    /// id must also carry the right one.
    pub fn answers(&self, request: &StepRequest) -> bool {
        if self.action != request.action {
            return false;
        }
        match &self.request_id {
            Some(id) => id == &request.request_id,
            None => true,
        }
    }
}
