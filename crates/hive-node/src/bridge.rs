//! Mirrors coordinator events onto the message bus.
//!
//! Every `SwarmEvent` is published as a broadcast on `swarm:events`. When an
//! event concerns an agent, that agent's current snapshot is written to the
//! bus state store under `agent:{id}`.

use std::sync::Arc;

use tokio::task::JoinHandle;

use hive_bus::MessageBus;
use hive_coordinator::{EventBusError, SwarmCoordinator, SwarmEvent};
use hive_protocol::{agent_state_key, AgentId, Message, COORDINATOR_ID, EVENTS_CHANNEL};

pub struct EventBridge {
    task: JoinHandle<()>,
}

impl EventBridge {
    /// Start forwarding. Events emitted after this call are not missed.
    pub fn spawn(coordinator: Arc<SwarmCoordinator>, bus: MessageBus) -> Self {
        let mut events = coordinator.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => forward(&coordinator, &bus, event).await,
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            tracing::debug!("Event bridge stopped");
        });
        Self { task }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward(coordinator: &SwarmCoordinator, bus: &MessageBus, event: SwarmEvent) {
    let name = event.name();
    let agent_id = event.agent_id().cloned();

    match serde_json::to_value(&event) {
        Ok(payload) => {
            let message = Message::broadcast(AgentId::new(COORDINATOR_ID), payload);
            if let Err(e) = bus.publish(EVENTS_CHANNEL, &message).await {
                tracing::warn!(event = name, error = %e, "Failed to mirror event");
            }
        }
        Err(e) => tracing::warn!(event = name, error = %e, "Unserializable event"),
    }

    if let Some(agent_id) = agent_id {
        snapshot_agent(coordinator, bus, &agent_id).await;
    }
}

/// Persist the coordinator's current view of one agent.
pub async fn snapshot_agent(coordinator: &SwarmCoordinator, bus: &MessageBus, agent_id: &AgentId) {
    let Some(agent) = coordinator.get_agent(agent_id).await else {
        return;
    };
    if let Err(e) = bus.set_state(&agent_state_key(agent_id.as_str()), &agent).await {
        tracing::warn!(agent_id = %agent_id, error = %e, "Failed to persist agent snapshot");
    }
}
