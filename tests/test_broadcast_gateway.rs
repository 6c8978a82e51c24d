//! Broadcast gateway fan-out and its wiring to the event bus


use serde_json::json;
use signal_orchestrator::events::{EventBus, EventEnvelope};
use signal_orchestrator::gateway::{BroadcastGateway, GatewayForwarder};
use signal_orchestrator::testing::mocks::RecordingConnection;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_broadcast_reaches_every_connection() {
    let gateway = BroadcastGateway::new();
    let clients: Vec<Arc<RecordingConnection>> =
        (0..3).map(|_| Arc::new(RecordingConnection::new())).collect();
    for client in &clients {
        gateway.register(client.clone()).await;
    }

    let envelope = EventEnvelope::new("pipeline.results", json!({"status": "completed"}), Uuid::new_v4());
    let sent = gateway.broadcast(&envelope).await;

    assert_eq!(sent, 3);
    for client in &clients {
        let frames = client.received_json().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["payload"]["status"], "completed");
        assert_eq!(frames[0]["id"], envelope.id.to_string());
    }
}

#[tokio::test]
async fn test_dead_connection_is_dropped_silently() {
    let gateway = BroadcastGateway::new();
    let alive = Arc::new(RecordingConnection::new());
    let dead = Arc::new(RecordingConnection::new());
    gateway.register(alive.clone()).await;
    gateway.register(dead.clone()).await;
    dead.fail_sends(true);

    let envelope = EventEnvelope::new("pipeline.results", json!({}), Uuid::new_v4());
    assert_eq!(gateway.broadcast(&envelope).await, 1);
    assert_eq!(gateway.connection_count().await, 1);

    // Recovered sender stays removed
    dead.fail_sends(false);
    assert_eq!(gateway.broadcast(&envelope).await, 1);
    assert!(dead.received().await.is_empty());
    assert_eq!(alive.received().await.len(), 2);
}

#[tokio::test]
async fn test_late_joiner_gets_no_history() {
    let gateway = BroadcastGateway::new();
    gateway
        .broadcast_json(&json!({"type": "manual_signal", "data": {}}))
        .await;

    let late = Arc::new(RecordingConnection::new());
    gateway.register(late.clone()).await;
    assert!(late.received().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_register_and_broadcast() {
    let gateway = Arc::new(BroadcastGateway::new());

    let mut tasks = Vec::new();
    for n in 0..10 {
        let gateway = gateway.clone();
        tasks.push(tokio::spawn(async move {
            let conn = Arc::new(RecordingConnection::new());
            let id = gateway.register(conn).await;
            gateway.broadcast_json(&json!({ "n": n })).await;
            if n % 2 == 0 {
                gateway.unregister(id).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(gateway.connection_count().await, 5);
}

#[tokio::test]
async fn test_forwarder_relays_bus_events() {
    let bus = EventBus::new();
    let gateway = Arc::new(BroadcastGateway::new());
    let client = Arc::new(RecordingConnection::new());
    gateway.register(client.clone()).await;
    bus.subscribe(
        "pipeline.results",
        Arc::new(GatewayForwarder::new(gateway.clone())),
    );

    bus.publish("pipeline.results", json!({"status": "partially_failed"}))
        .await
        .unwrap();

    let arrived = test_helpers::eventually(|| {
        let client = client.clone();
        async move { !client.received().await.is_empty() }
    })
    .await;
    assert!(arrived);
    assert_eq!(
        client.received_json().await[0]["payload"]["status"],
        "partially_failed"
    );
}
