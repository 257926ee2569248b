use hive_protocol::*;

#[test]
fn test_ids_serialize_as_plain_strings() {
    let id = AgentId::new("agent-7");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"agent-7\"");
    let back: TaskId = serde_json::from_str("\"t-1\"").unwrap();
    assert_eq!(back.as_str(), "t-1");
}

#[test]
fn test_generated_ids_are_unique() {
    assert_ne!(TaskId::generate(), TaskId::generate());
}

#[test]
fn test_direct_recipient_wire_shape() {
    let msg = Message::response(
        AgentId::new("worker"),
        Recipient::Agent(AgentId::new(ORCHESTRATOR_ID)),
        serde_json::json!({"ok": true}),
    );
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["to"]["agent"], ORCHESTRATOR_ID);
    assert_eq!(value["kind"], "response");

    let broadcast = serde_json::to_value(Message::broadcast(AgentId::new("a"), serde_json::json!(1))).unwrap();
    assert_eq!(broadcast["to"], "broadcast");
}

#[test]
fn test_step_response_without_request_id_omits_field() {
    let response = StepResponse {
        request_id: None,
        action: "quote".into(),
        result: serde_json::json!({"price": 3}),
    };
    let value = serde_json::to_value(&response).unwrap();
    assert!(value.get("request_id").is_none());

    let parsed: StepResponse =
        serde_json::from_str(r#"{"action":"quote","result":{"price":3}}"#).unwrap();
    assert!(parsed.request_id.is_none());
}

#[test]
fn test_task_spec_defaults_from_minimal_json() {
    let spec: TaskSpec = serde_json::from_str(r#"{"title":"survey"}"#).unwrap();
    assert_eq!(spec.priority, 0);
    assert!(spec.dependencies.is_empty());
    assert!(spec.required_capabilities.is_empty());

    let task = SwarmTask::from_spec(spec);
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(!task.id.as_str().is_empty());
}

#[test]
fn test_active_statuses_hold_the_assignee() {
    assert!(!TaskStatus::Pending.is_active());
    assert!(TaskStatus::Assigned.is_active());
    assert!(TaskStatus::InProgress.is_active());
    assert!(!TaskStatus::Completed.is_active());
    assert!(!TaskStatus::Failed.is_active());
}

#[test]
fn test_channel_key_helpers() {
    assert_eq!(direct_channel(DEFAULT_TASK_CHANNEL, "a1"), "swarm:tasks:a1");
    assert_eq!(history_key("swarm:tasks"), "history:swarm:tasks");
    assert_eq!(agent_state_key("a1"), "agent:a1");
}
