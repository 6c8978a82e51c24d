//! Orchestrator facade: publication, persistence and isolation of the caller
//! from broker failures


use chrono::Utc;
use signal_orchestrator::agent::ids;
use signal_orchestrator::error::{AgentCallError, OrchestratorError};
use signal_orchestrator::events::EventBus;
use signal_orchestrator::orchestrator::Orchestrator;
use signal_orchestrator::persistence::{InMemorySignalStore, TradeOutcome, TradeSignal};
use signal_orchestrator::pipeline::{PipelineRequest, PipelineStatus};
use signal_orchestrator::testing::mocks::{MockAgentClient, MockBridge};
use std::sync::Arc;
use test_helpers::{collect_channel, eventually, mock_executor, next_event};

#[tokio::test]
async fn test_result_is_published_and_returned() {
    let client = MockAgentClient::new();
    let bus = Arc::new(EventBus::new());
    let (_handle, mut rx) = collect_channel(&bus, "pipeline.results");
    let orchestrator = Orchestrator::new(Arc::new(mock_executor(&client)), bus.clone());

    let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    let event = next_event(&mut rx).await.expect("result should be published");
    assert_eq!(event.payload["run_id"], result.run_id.to_string());
    assert_eq!(event.payload["status"], "completed");
}

#[tokio::test]
async fn test_failed_runs_are_published_too() {
    let client = MockAgentClient::new();
    client.always_fail(
        ids::CHART_ANALYST,
        AgentCallError::agent_error(ids::CHART_ANALYST, Some(503), "maintenance"),
    );
    let bus = Arc::new(EventBus::new());
    let (_handle, mut rx) = collect_channel(&bus, "signals.out");
    let orchestrator = Orchestrator::new(Arc::new(mock_executor(&client)), bus.clone())
        .with_results_channel("signals.out");

    let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let event = next_event(&mut rx).await.unwrap();
    assert_eq!(event.payload["status"], "failed");
    assert_eq!(
        event.payload["stage_results"][0]["error"]["kind"],
        "agent_error"
    );
}

#[tokio::test]
async fn test_broker_outage_does_not_change_returned_result() {
    let client = MockAgentClient::new();
    client.with_delay(ids::MACRO_FORECASTER, std::time::Duration::from_secs(2));
    let bridge = Arc::new(MockBridge::new());
    let bus = Arc::new(EventBus::with_bridge(bridge.clone()));
    let (_handle, mut rx) = collect_channel(&bus, "pipeline.results");
    let orchestrator = Orchestrator::new(Arc::new(mock_executor(&client)), bus.clone());

    // Broker never connected
    let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;

    assert_eq!(result.status, PipelineStatus::PartiallyFailed);
    assert!(result.decision().is_some());
    assert!(bridge.published().is_empty());
    // Local subscribers still see it
    assert!(next_event(&mut rx).await.is_some());
    assert!(!orchestrator.publish_result(&result).await);
}

#[tokio::test]
async fn test_decided_runs_are_persisted() {
    let client = MockAgentClient::new();
    let store = Arc::new(InMemorySignalStore::new(10));
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(&client)),
        Arc::new(EventBus::new()),
    )
    .with_sink(store.clone());

    let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;

    let stored = eventually(|| {
        let store = store.clone();
        async move { store.len().await == 1 }
    })
    .await;
    assert!(stored, "signal should be written behind");

    let signal = store.recent_signals(1).await.remove(0);
    assert_eq!(signal.signal_id, result.run_id);
    assert_eq!(signal.symbol, "EURUSD");
    assert_eq!(signal.signal_type.as_deref(), Some("BUY"));
    assert_eq!(signal.agent_name, ids::TACTIC_BOT);
    assert!(signal.macro_context.is_some());
}

#[tokio::test]
async fn test_undecided_runs_are_not_persisted() {
    let client = MockAgentClient::new();
    client.always_fail(
        ids::TACTIC_BOT,
        AgentCallError::agent_error(ids::TACTIC_BOT, Some(500), "boom"),
    );
    let store = Arc::new(InMemorySignalStore::new(10));
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(&client)),
        Arc::new(EventBus::new()),
    )
    .with_sink(store.clone());

    let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;
    assert_eq!(result.status, PipelineStatus::Failed);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_outcome_recorded_for_stored_signal() {
    let client = MockAgentClient::new();
    let store = Arc::new(InMemorySignalStore::new(10));
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(&client)),
        Arc::new(EventBus::new()),
    )
    .with_sink(store.clone());

    orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { !store.is_empty().await }
        })
        .await
    );

    let signal = store.recent_signals(1).await.remove(0);
    let now = Utc::now();
    let outcome = TradeOutcome::from_prices(&signal, 1.1000, 1.1050, now, now);
    orchestrator.record_outcome(outcome).unwrap().await.unwrap();

    let saved = store.outcome_for(signal.signal_id).await.unwrap();
    assert!(saved.success);
}

#[tokio::test]
async fn test_record_outcome_without_sink_is_an_error() {
    let client = MockAgentClient::new();
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(&client)),
        Arc::new(EventBus::new()),
    );
    let now = Utc::now();
    let signal = TradeSignal {
        signal_id: uuid::Uuid::new_v4(),
        timestamp: now,
        symbol: "EURUSD".to_string(),
        timeframe: "1h".to_string(),
        agent_name: ids::TACTIC_BOT.to_string(),
        signal_type: Some("BUY".to_string()),
        confidence: 0.7,
        reasoning: String::new(),
        signal_data: serde_json::json!({}),
        macro_context: None,
    };
    let outcome = TradeOutcome::from_prices(&signal, 1.0, 1.1, now, now);
    assert!(matches!(
        orchestrator.record_outcome(outcome),
        Err(OrchestratorError::InternalError { .. })
    ));
}

#[tokio::test]
async fn test_blank_symbol_is_rejected_before_running() {
    let client = MockAgentClient::new();
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(&client)),
        Arc::new(EventBus::new()),
    );

    let result = orchestrator
        .handle_checked(PipelineRequest::new("   ", "1h"))
        .await;

    assert!(matches!(result, Err(OrchestratorError::InvalidRequest { .. })));
    assert!(client.calls().is_empty());
}
