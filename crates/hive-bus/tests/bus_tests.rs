use std::sync::Arc;
use std::time::Duration;

use hive_bus::{BusConfig, BusError, MemoryBackend, MessageBus};
use hive_protocol::{AgentId, Message, MessageKind, Recipient};
use tokio::sync::mpsc;

fn bus() -> MessageBus {
    MessageBus::in_memory(BusConfig::default())
}

fn agent(id: &str) -> AgentId {
    AgentId::new(id)
}

#[tokio::test]
async fn test_broadcast_skips_sender() {
    let bus = bus();
    let mut alice = bus.subscribe("team", &agent("alice")).await.unwrap();
    let mut bob = bus.subscribe("team", &agent("bob")).await.unwrap();

    let msg = Message::broadcast(agent("alice"), serde_json::json!({"hello": "team"}));
    bus.publish("team", &msg).await.unwrap();

    let got = tokio::time::timeout(Duration::from_millis(200), bob.recv())
        .await
        .expect("bob should receive the broadcast")
        .unwrap();
    assert_eq!(got.id, msg.id);

    let nothing = tokio::time::timeout(Duration::from_millis(50), alice.recv()).await;
    assert!(nothing.is_err(), "sender must not receive its own broadcast");
}

#[tokio::test]
async fn test_direct_message_reaches_only_target() {
    let bus = bus();
    let mut bob = bus.subscribe("team", &agent("bob")).await.unwrap();
    let mut carol = bus.subscribe("team", &agent("carol")).await.unwrap();

    let msg = Message::new(
        agent("alice"),
        Recipient::Broadcast,
        MessageKind::Request,
        serde_json::json!({"for": "bob"}),
    );
    bus.send_direct("team", &agent("bob"), msg).await.unwrap();

    let got = tokio::time::timeout(Duration::from_millis(200), bob.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.to, Recipient::Agent(agent("bob")));

    let nothing = tokio::time::timeout(Duration::from_millis(50), carol.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_history_is_bounded_and_ordered() {
    let bus = MessageBus::in_memory(BusConfig {
        history_limit: 3,
        ..Default::default()
    });

    for i in 0..5 {
        let msg = Message::broadcast(agent("alice"), serde_json::json!({ "n": i }));
        bus.publish("log", &msg).await.unwrap();
    }

    let history = bus.get_history("log", 10).await.unwrap();
    let ns: Vec<i64> = history
        .iter()
        .map(|m| m.payload["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![2, 3, 4]);

    let last = bus.get_history("log", 1).await.unwrap();
    assert_eq!(last[0].payload["n"], 4);
}

#[tokio::test]
async fn test_state_round_trip() {
    let bus = bus();
    assert!(bus.get_state::<serde_json::Value>("agent:a1").await.unwrap().is_none());

    bus.set_state("agent:a1", &serde_json::json!({"status": "busy"}))
        .await
        .unwrap();
    let state: serde_json::Value = bus.get_state("agent:a1").await.unwrap().unwrap();
    assert_eq!(state["status"], "busy");
}

#[tokio::test]
async fn test_handler_subscription_and_unsubscribe() {
    let bus = bus();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = bus
        .subscribe_with("team", &agent("bob"), move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.payload);
            }
        })
        .await
        .unwrap();

    bus.publish("team", &Message::broadcast(agent("alice"), serde_json::json!(1)))
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, serde_json::json!(1));

    handle.unsubscribe();
    tokio::task::yield_now().await;

    bus.publish("team", &Message::broadcast(agent("alice"), serde_json::json!(2)))
        .await
        .unwrap();
    let after = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(!matches!(after, Ok(Some(_))), "no delivery after unsubscribe");
}

#[tokio::test]
async fn test_slow_handler_does_not_delay_next_delivery() {
    let bus = bus();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = bus
        .subscribe_with("team", &agent("bob"), move |msg| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = tx.send(msg.payload);
            }
        })
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    for i in 0..3 {
        bus.publish("team", &Message::broadcast(agent("alice"), serde_json::json!(i)))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_millis(250), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn test_publish_to_unreachable_store_fails() {
    let backend = Arc::new(MemoryBackend::default());
    let bus = MessageBus::new(backend.clone(), BusConfig::default());
    backend.set_available(false);

    let result = bus
        .publish("team", &Message::broadcast(agent("alice"), serde_json::json!({})))
        .await;
    assert!(matches!(result, Err(BusError::Unavailable(_))));
}
