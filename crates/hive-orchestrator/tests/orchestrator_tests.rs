//! End-to-end orchestration over an in-memory bus with real agent workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use hive_bus::{BusConfig, MessageBus};
use hive_orchestrator::{
    ActionHandler, AgentWorker, ContextStatus, EchoHandler, FnHandler, HandlerError, MemoryMetrics, Orchestrator,
    OrchestratorConfig, OrchestratorError, StepDefinition, TaskDefinition,
};
use hive_protocol::{AgentId, MessageKind, StepRequest, TaskId, DEFAULT_TASK_CHANNEL};

struct Harness {
    bus: MessageBus,
    metrics: Arc<MemoryMetrics>,
    orchestrator: Orchestrator,
}

fn harness() -> Harness {
    let bus = MessageBus::in_memory(BusConfig::default());
    let metrics = Arc::new(MemoryMetrics::new());
    let orchestrator = Orchestrator::new(bus.clone(), metrics.clone(), OrchestratorConfig::default());
    Harness {
        bus,
        metrics,
        orchestrator,
    }
}

async fn echo_worker(h: &Harness, id: &str, agent_type: &str) -> AgentWorker {
    AgentWorker::spawn(
        h.bus.clone(),
        DEFAULT_TASK_CHANNEL,
        AgentId::new(id),
        agent_type,
        Arc::new(EchoHandler::new(AgentId::new(id), vec![])),
        h.metrics.clone(),
    )
    .await
    .unwrap()
}

fn data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

async fn requested_steps(bus: &MessageBus) -> Vec<String> {
    bus.get_history(DEFAULT_TASK_CHANNEL, 1000)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.kind == MessageKind::Request)
        .map(|m| serde_json::from_value::<StepRequest>(m.payload).unwrap().step_id)
        .collect()
}

#[tokio::test]
async fn test_dependent_step_sees_prior_result() {
    let h = harness();
    let _pricing = echo_worker(&h, "p1", "pricing").await;
    let _quality = echo_worker(&h, "q1", "quality").await;

    let definition = TaskDefinition::new(
        "quote",
        vec![
            StepDefinition::new("price", "pricing", "quote").with_timeout_ms(1000),
            StepDefinition::new("review", "quality", "inspect")
                .depends_on(["price"])
                .with_timeout_ms(1000),
        ],
    )
    .with_id("task-1");

    let outcome = h
        .orchestrator
        .execute_task(&definition, data(serde_json::json!({"sku": "X1"})))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results["price"]["agent"], "p1");
    assert_eq!(outcome.results["price"]["data"]["sku"], "X1");
    assert_eq!(outcome.results["review"]["agent"], "q1");
    assert_eq!(outcome.results["review"]["data"]["price"]["action"], "quote");
    assert_eq!(
        h.orchestrator.task_status(&TaskId::new("task-1")).await,
        Some(ContextStatus::Completed)
    );
}

#[tokio::test]
async fn test_timeout_aborts_task_before_dependents_run() {
    let h = harness();

    let definition = TaskDefinition::new(
        "unanswered",
        vec![
            StepDefinition::new("a", "nobody", "ping").with_timeout_ms(100),
            StepDefinition::new("b", "nobody", "pong")
                .depends_on(["a"])
                .with_timeout_ms(100),
        ],
    )
    .with_id("task-e");

    let err = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::StepTimeout { ref step_id, timeout_ms: 100, .. } if step_id == "a"
    ));
    assert_eq!(requested_steps(&h.bus).await, vec!["a"]);

    let ctx = h.orchestrator.task_context(&TaskId::new("task-e")).await.unwrap();
    assert_eq!(ctx.status, ContextStatus::Failed);
    assert!(ctx.error.unwrap().contains("timed out"));

    // One failed metric for the step that ran.
    let records = h.metrics.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "task-e");
    assert!(!records[0].1.success);
    assert_eq!(records[0].1.kind, "ping");
}

#[tokio::test]
async fn test_unknown_dependency_deadlocks() {
    let h = harness();
    let definition = TaskDefinition::new(
        "stuck",
        vec![StepDefinition::new("a", "pricing", "quote").depends_on(["ghost"])],
    );

    let err = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Deadlock { pending, .. } => assert_eq!(pending, vec!["a"]),
        other => panic!("expected deadlock, got {other:?}"),
    }
    assert!(requested_steps(&h.bus).await.is_empty());
}

#[tokio::test]
async fn test_cycle_fails_task_without_requests() {
    let h = harness();
    let definition = TaskDefinition::new(
        "loop",
        vec![
            StepDefinition::new("a", "pricing", "quote").depends_on(["b"]),
            StepDefinition::new("b", "pricing", "quote").depends_on(["a"]),
        ],
    )
    .with_id("task-cycle");

    let err = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Cycle(_)));
    assert_eq!(
        h.orchestrator.task_status(&TaskId::new("task-cycle")).await,
        Some(ContextStatus::Failed)
    );
    assert!(requested_steps(&h.bus).await.is_empty());
}

#[tokio::test]
async fn test_independent_steps_fan_out_and_join() {
    let h = harness();
    let _w1 = echo_worker(&h, "p1", "pricing").await;
    let _w2 = echo_worker(&h, "p2", "pricing").await;

    // Same action on both branches: responses are told apart by request id.
    let definition = TaskDefinition::new(
        "fan",
        vec![
            StepDefinition::new("left", "pricing", "quote").with_timeout_ms(1000),
            StepDefinition::new("right", "pricing", "quote").with_timeout_ms(1000),
            StepDefinition::new("join", "pricing", "merge")
                .depends_on(["left", "right"])
                .with_timeout_ms(1000),
        ],
    );

    let outcome = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap();

    assert_eq!(outcome.results["left"]["step"], "left");
    assert_eq!(outcome.results["right"]["step"], "right");
    let join = &outcome.results["join"]["data"];
    assert!(join.get("left").is_some() && join.get("right").is_some());

    let steps = requested_steps(&h.bus).await;
    assert_eq!(steps.last().map(String::as_str), Some("join"));
}

/// Answers after a fixed delay.
struct SlowHandler {
    delay: Duration,
}

impl ActionHandler for SlowHandler {
    fn handle<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> BoxFuture<'a, Result<serde_json::Value, HandlerError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::json!({ "step": request.step_id }))
        })
    }
}

#[tokio::test]
async fn test_single_worker_answers_concurrent_steps_in_parallel() {
    let h = harness();
    let _slow = AgentWorker::spawn(
        h.bus.clone(),
        DEFAULT_TASK_CHANNEL,
        AgentId::new("slow"),
        "pricing",
        Arc::new(SlowHandler {
            delay: Duration::from_millis(100),
        }),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    // Served one after another, the third step would need 300ms.
    let definition = TaskDefinition::new(
        "burst",
        ["a", "b", "c"]
            .into_iter()
            .map(|id| StepDefinition::new(id, "pricing", "quote").with_timeout_ms(250))
            .collect(),
    );

    let started = Instant::now();
    let outcome = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(250));
    for id in ["a", "b", "c"] {
        assert_eq!(outcome.results[id]["step"], id);
    }
    let worker_records: Vec<_> = h
        .metrics
        .records()
        .into_iter()
        .filter(|(subject, _)| subject == "slow")
        .collect();
    assert_eq!(worker_records.len(), 3);
    assert!(worker_records.iter().all(|(_, r)| r.success));
}

#[tokio::test]
async fn test_handler_failure_surfaces_as_timeout() {
    let h = harness();
    let _broken = AgentWorker::spawn(
        h.bus.clone(),
        DEFAULT_TASK_CHANNEL,
        AgentId::new("broken"),
        "pricing",
        Arc::new(FnHandler(|_: &StepRequest| {
            Err::<serde_json::Value, _>(HandlerError::Failed("model unavailable".into()))
        })),
        h.metrics.clone(),
    )
    .await
    .unwrap();

    let definition = TaskDefinition::new(
        "fails",
        vec![StepDefinition::new("a", "pricing", "quote").with_timeout_ms(150)],
    );
    let err = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StepTimeout { .. }));

    let worker_failures: Vec<_> = h
        .metrics
        .records()
        .into_iter()
        .filter(|(subject, r)| subject == "broken" && !r.success)
        .collect();
    assert_eq!(worker_failures.len(), 1);
}

#[tokio::test]
async fn test_task_id_cannot_be_reused() {
    let h = harness();
    let _w = echo_worker(&h, "p1", "pricing").await;
    let definition = TaskDefinition::new(
        "once",
        vec![StepDefinition::new("a", "pricing", "quote").with_timeout_ms(1000)],
    )
    .with_id("task-once");

    h.orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap();
    let again = h
        .orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await;
    assert!(matches!(again, Err(OrchestratorError::DuplicateTask(_))));
    assert_eq!(
        h.orchestrator.task_status(&TaskId::new("task-once")).await,
        Some(ContextStatus::Completed)
    );
}

#[tokio::test]
async fn test_prune_finished_releases_task_ids() {
    let h = harness();
    let _pricing = echo_worker(&h, "p1", "pricing").await;

    let definition = TaskDefinition::new(
        "once",
        vec![StepDefinition::new("a", "pricing", "quote").with_timeout_ms(1000)],
    )
    .with_id("task-p");

    h.orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator.task_status(&TaskId::new("task-p")).await,
        Some(ContextStatus::Completed)
    );

    assert_eq!(h.orchestrator.prune_finished().await, 1);
    assert!(h.orchestrator.task_context(&TaskId::new("task-p")).await.is_none());
    assert_eq!(h.orchestrator.prune_finished().await, 0);

    h.orchestrator
        .execute_task(&definition, serde_json::Map::new())
        .await
        .unwrap();
}
