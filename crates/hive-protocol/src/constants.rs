/// Messages retained per channel history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Buffer size of each bus channel before slow subscribers start losing messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Buffer size of the coordinator event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Step timeout used when a step definition does not set one.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Channel the orchestrator publishes step requests on.
pub const DEFAULT_TASK_CHANNEL: &str = "swarm:tasks";

/// Channel coordinator events are mirrored onto.
pub const EVENTS_CHANNEL: &str = "swarm:events";

/// Sender identity used by the orchestrator on the bus.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Sender identity of coordinator events mirrored onto the bus.
pub const COORDINATOR_ID: &str = "coordinator";

/// State-store key holding an agent's snapshot.
pub fn agent_state_key(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// Sub-channel carrying direct messages for one subscriber.
pub fn direct_channel(channel: &str, target_id: &str) -> String {
    format!("{channel}:{target_id}")
}

/// Store key of a channel's bounded history list.
pub fn history_key(channel: &str) -> String {
    format!("history:{channel}")
}
