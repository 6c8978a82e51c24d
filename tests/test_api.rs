//! HTTP surface tests driven through warp's in-process test client


use serde_json::{json, Value};
use signal_orchestrator::agent::ids;
use signal_orchestrator::api::{routes, AppContext};
use signal_orchestrator::error::AgentCallError;
use signal_orchestrator::events::EventBus;
use signal_orchestrator::gateway::BroadcastGateway;
use signal_orchestrator::orchestrator::Orchestrator;
use signal_orchestrator::persistence::InMemorySignalStore;
use signal_orchestrator::testing::mocks::{MockAgentClient, RecordingConnection};
use std::sync::Arc;
use test_helpers::{eventually, mock_executor, test_config};
use warp::http::StatusCode;

struct Harness {
    ctx: Arc<AppContext>,
    store: Arc<InMemorySignalStore>,
    gateway: Arc<BroadcastGateway>,
}

fn harness(client: &MockAgentClient) -> Harness {
    let store = Arc::new(InMemorySignalStore::new(10));
    let gateway = Arc::new(BroadcastGateway::new());
    let orchestrator = Orchestrator::new(
        Arc::new(mock_executor(client)),
        Arc::new(EventBus::new()),
    )
    .with_sink(store.clone());

    let ctx = Arc::new(AppContext {
        orchestrator: Arc::new(orchestrator),
        gateway: gateway.clone(),
        store: store.clone(),
        agent_client: Arc::new(client.clone()),
        config: Arc::new(test_config()),
    });

    Harness {
        ctx,
        store,
        gateway,
    }
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("response should be JSON")
}

#[tokio::test]
async fn test_run_mcp_returns_full_result() {
    let client = MockAgentClient::new();
    let h = harness(&client);

    let response = warp::test::request()
        .method("POST")
        .path("/run_mcp")
        .json(&json!({"symbol": "EURUSD", "timeframe": "1h"}))
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.body());
    assert_eq!(body["status"], "completed");
    assert_eq!(body["request"]["symbol"], "EURUSD");
    assert_eq!(body["stage_results"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_run_mcp_failed_run_is_still_ok() {
    let client = MockAgentClient::new();
    client.always_fail(
        ids::CHART_ANALYST,
        AgentCallError::agent_error(ids::CHART_ANALYST, Some(500), "boom"),
    );
    let h = harness(&client);

    let response = warp::test::request()
        .method("POST")
        .path("/run_mcp")
        .json(&json!({"symbol": "EURUSD", "timeframe": "1h"}))
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response.body())["status"], "failed");
}

#[tokio::test]
async fn test_run_mcp_rejects_blank_symbol() {
    let client = MockAgentClient::new();
    let h = harness(&client);

    let response = warp::test::request()
        .method("POST")
        .path("/run_mcp")
        .json(&json!({"symbol": "", "timeframe": "1h"}))
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response.body());
    assert!(body["error"].as_str().unwrap().contains("symbol"));
    assert!(body["timestamp"].is_string());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_run_mcp_rejects_malformed_body() {
    let client = MockAgentClient::new();
    let h = harness(&client);

    let response = warp::test::request()
        .method("POST")
        .path("/run_mcp")
        .body("{not json")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(&MockAgentClient::new());

    let response = warp::test::request()
        .path("/health")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.body());
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_agents_endpoint_reports_probe_status() {
    let client = MockAgentClient::new();
    client.set_unhealthy(ids::MACRO_FORECASTER);
    let h = harness(&client);

    let response = warp::test::request()
        .path("/agents")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let agents = json_body(response.body());
    let agents = agents.as_array().unwrap();
    assert_eq!(agents.len(), 4);

    for agent in agents {
        let expected = if agent["name"] == ids::MACRO_FORECASTER {
            "unreachable"
        } else {
            "active"
        };
        assert_eq!(agent["status"], expected, "agent {}", agent["name"]);
    }
    let chart = agents
        .iter()
        .find(|a| a["name"] == ids::CHART_ANALYST)
        .unwrap();
    assert_eq!(chart["stage"], "chart_analysis");
    assert_eq!(chart["url"], "http://localhost:8001");
}

#[tokio::test]
async fn test_signals_endpoint_lists_recent_decisions() {
    let client = MockAgentClient::new();
    let h = harness(&client);
    let filter = routes(h.ctx.clone());

    for _ in 0..3 {
        warp::test::request()
            .method("POST")
            .path("/run_mcp")
            .json(&json!({"symbol": "EURUSD", "timeframe": "1h"}))
            .reply(&filter)
            .await;
    }
    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { store.len().await == 3 }
        })
        .await
    );

    let response = warp::test::request()
        .path("/signals?limit=2")
        .reply(&filter)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let signals = json_body(response.body());
    let signals = signals.as_array().unwrap();
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0]["symbol"], "EURUSD");
    assert_eq!(signals[0]["agent_name"], ids::TACTIC_BOT);
}

#[tokio::test]
async fn test_manual_signal_is_broadcast() {
    let h = harness(&MockAgentClient::new());
    let viewer = Arc::new(RecordingConnection::new());
    h.gateway.register(viewer.clone()).await;

    let response = warp::test::request()
        .method("POST")
        .path("/manual_signal")
        .json(&json!({"symbol": "GBPUSD", "signal_type": "SELL"}))
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.body());
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Manual signal created");

    let frames = viewer.received_json().await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "manual_signal");
    assert_eq!(frames[0]["data"]["signal_type"], "SELL");
}

#[tokio::test]
async fn test_manual_signal_rejects_malformed_body() {
    let h = harness(&MockAgentClient::new());

    let response = warp::test::request()
        .method("POST")
        .path("/manual_signal")
        .body("not json at all")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_snapshot() {
    let h = harness(&MockAgentClient::new());

    let response = warp::test::request()
        .path("/metrics")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response.body());
    for section in ["pipeline", "stages", "events", "broker", "gateway", "persistence"] {
        assert!(body.get(section).is_some(), "missing {section}");
    }
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let h = harness(&MockAgentClient::new());

    let response = warp::test::request()
        .path("/does_not_exist")
        .reply(&routes(h.ctx.clone()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
