//! Typed coordinator events over a tokio broadcast channel.
//!
//! Events are published after the state change they describe has been
//! applied, carrying snapshots of the affected task or process. Observers
//! hold an `EventReceiver`; dropping it unsubscribes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use hive_consensus::ConsensusProcess;
use hive_protocol::{AgentId, SwarmSolution, SwarmTask, DEFAULT_EVENT_CAPACITY};

/// Everything the coordinator announces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SwarmEvent {
    #[serde(rename = "task:created")]
    TaskCreated { task: SwarmTask },

    #[serde(rename = "task:assigned")]
    TaskAssigned { task: SwarmTask, agent_id: AgentId },

    #[serde(rename = "task:started")]
    TaskStarted { task: SwarmTask, agent_id: AgentId },

    #[serde(rename = "task:completed")]
    TaskCompleted { task: SwarmTask, agent_id: AgentId },

    #[serde(rename = "task:failed")]
    TaskFailed {
        task: SwarmTask,
        agent_id: AgentId,
        reason: String,
    },

    #[serde(rename = "consensus:started")]
    ConsensusStarted { process: ConsensusProcess, task: SwarmTask },

    #[serde(rename = "consensus:solution")]
    ConsensusSolution {
        process: ConsensusProcess,
        solution: SwarmSolution,
    },

    #[serde(rename = "consensus:voting")]
    ConsensusVoting { process: ConsensusProcess },

    #[serde(rename = "consensus:vote")]
    ConsensusVote {
        process: ConsensusProcess,
        voter: AgentId,
        voted_for: AgentId,
    },

    #[serde(rename = "consensus:completed")]
    ConsensusCompleted {
        process: ConsensusProcess,
        winning_solution: SwarmSolution,
    },
}

/// Discriminant of a `SwarmEvent`, used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwarmEventKind {
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    ConsensusStarted,
    ConsensusSolution,
    ConsensusVoting,
    ConsensusVote,
    ConsensusCompleted,
}

impl SwarmEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task:created",
            Self::TaskAssigned => "task:assigned",
            Self::TaskStarted => "task:started",
            Self::TaskCompleted => "task:completed",
            Self::TaskFailed => "task:failed",
            Self::ConsensusStarted => "consensus:started",
            Self::ConsensusSolution => "consensus:solution",
            Self::ConsensusVoting => "consensus:voting",
            Self::ConsensusVote => "consensus:vote",
            Self::ConsensusCompleted => "consensus:completed",
        }
    }
}

impl std::fmt::Display for SwarmEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl SwarmEvent {
    pub fn kind(&self) -> SwarmEventKind {
        match self {
            Self::TaskCreated { .. } => SwarmEventKind::TaskCreated,
            Self::TaskAssigned { .. } => SwarmEventKind::TaskAssigned,
            Self::TaskStarted { .. } => SwarmEventKind::TaskStarted,
            Self::TaskCompleted { .. } => SwarmEventKind::TaskCompleted,
            Self::TaskFailed { .. } => SwarmEventKind::TaskFailed,
            Self::ConsensusStarted { .. } => SwarmEventKind::ConsensusStarted,
            Self::ConsensusSolution { .. } => SwarmEventKind::ConsensusSolution,
            Self::ConsensusVoting { .. } => SwarmEventKind::ConsensusVoting,
            Self::ConsensusVote { .. } => SwarmEventKind::ConsensusVote,
            Self::ConsensusCompleted { .. } => SwarmEventKind::ConsensusCompleted,
        }
    }

    /// Wire name of the event, e.g. `task:assigned`.
    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// The task snapshot carried by task events.
    pub fn task(&self) -> Option<&SwarmTask> {
        match self {
            Self::TaskCreated { task }
            | Self::TaskAssigned { task, .. }
            | Self::TaskStarted { task, .. }
            | Self::TaskCompleted { task, .. }
            | Self::TaskFailed { task, .. }
            | Self::ConsensusStarted { task, .. } => Some(task),
            _ => None,
        }
    }

    /// The agent a task event concerns.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::TaskAssigned { agent_id, .. }
            | Self::TaskStarted { agent_id, .. }
            | Self::TaskCompleted { agent_id, .. }
            | Self::TaskFailed { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

/// Fan-out of `SwarmEvent`s to any number of receivers.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<SwarmEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: SwarmEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "Event published"),
            Err(_) => tracing::trace!(event = name, "No event subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            kind: None,
        }
    }

    /// Receive only events of one kind.
    pub fn subscribe_kind(&self, kind: SwarmEventKind) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            kind: Some(kind),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<SwarmEvent>,
    kind: Option<SwarmEventKind>,
}

impl EventReceiver {
    fn accepts(&self, event: &SwarmEvent) -> bool {
        self.kind.map_or(true, |kind| event.kind() == kind)
    }

    /// Wait for the next matching event.
    pub async fn recv(&mut self) -> Result<SwarmEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    tracing::warn!(skipped = n, "Event receiver lagged");
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Result<SwarmEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(|e| match e {
                broadcast::error::TryRecvError::Empty => EventBusError::Empty,
                broadcast::error::TryRecvError::Closed => EventBusError::Closed,
                broadcast::error::TryRecvError::Lagged(n) => {
                    tracing::warn!(skipped = n, "Event receiver lagged");
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<SwarmEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }
}
