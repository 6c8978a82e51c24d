//! HTTP surface of the orchestrator
//!
//! Thin shell over the core: every route delegates to the orchestrator, the
//! broadcast gateway or the signal store and only shapes the JSON reply.

use crate::agent::AgentClient;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::gateway::{handle_socket, BroadcastGateway};
use crate::observability::metrics;
use crate::orchestrator::Orchestrator;
use crate::persistence::InMemorySignalStore;
use crate::pipeline::stages::stage_for_agent;
use crate::pipeline::{PipelineRequest, PipelineStatus};
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub const DEFAULT_SIGNAL_LIMIT: usize = 50;
const AGENT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the routes need, shared across requests
pub struct AppContext {
    pub orchestrator: Arc<Orchestrator>,
    pub gateway: Arc<BroadcastGateway>,
    pub store: Arc<InMemorySignalStore>,
    pub agent_client: Arc<dyn AgentClient>,
    pub config: Arc<OrchestratorConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: String,
}

impl ErrorResponse {
    fn new<S: Into<String>>(error: S) -> Self {
        Self {
            error: error.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct AgentStatus {
    name: String,
    url: String,
    stage: Option<&'static str>,
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct SignalsQuery {
    limit: Option<usize>,
}

fn with_context(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// All routes, with permissive CORS for browser dashboards
pub fn routes(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // POST /run_mcp - run the pipeline for one instrument
    let run_route = warp::path("run_mcp")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_context(ctx.clone()))
        .and_then(run_pipeline);

    // GET /health
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&HealthResponse {
                status: "healthy",
                timestamp: Utc::now().to_rfc3339(),
            })
        });

    // GET /agents - configured agents with a live probe
    let agents_route = warp::path("agents")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(list_agents);

    // GET /signals?limit=N
    let signals_route = warp::path("signals")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<SignalsQuery>())
        .and(with_context(ctx.clone()))
        .and_then(recent_signals);

    // POST /manual_signal - push arbitrary JSON to every WebSocket client
    let manual_route = warp::path("manual_signal")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_context(ctx.clone()))
        .and_then(manual_signal);

    // GET /metrics
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    // GET /ws - live result stream
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_context(ctx))
        .map(|ws: warp::ws::Ws, ctx: Arc<AppContext>| {
            let gateway = ctx.gateway.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, gateway))
        });

    run_route
        .or(health_route)
        .or(agents_route)
        .or(signals_route)
        .or(manual_route)
        .or(metrics_route)
        .or(ws_route)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST", "OPTIONS"])
                .allow_headers(vec!["content-type"]),
        )
}

async fn run_pipeline(
    body: Bytes,
    ctx: Arc<AppContext>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    let request = match serde_json::from_slice::<PipelineRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                &OrchestratorError::invalid_request(format!("malformed body: {e}")),
            ))
        }
    };

    match ctx.orchestrator.handle_checked(request).await {
        Ok(result) => {
            if result.status == PipelineStatus::Failed {
                warn!(run_id = %result.run_id, "Pipeline run failed");
            }
            Ok(warp::reply::with_status(
                warp::reply::json(&result.to_payload()),
                StatusCode::OK,
            ))
        }
        Err(e @ OrchestratorError::InvalidRequest { .. }) => {
            Ok(error_reply(StatusCode::BAD_REQUEST, &e))
        }
        Err(e) => {
            error!(error = %e, "Pipeline request failed");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e))
        }
    }
}

async fn list_agents(ctx: Arc<AppContext>) -> Result<impl Reply, Infallible> {
    let probes = ctx.config.agents.iter().map(|(name, endpoint)| {
        let client = ctx.agent_client.clone();
        async move {
            let status = match client.health(name, AGENT_PROBE_TIMEOUT).await {
                Ok(()) => "active",
                Err(_) => "unreachable",
            };
            AgentStatus {
                name: name.clone(),
                url: endpoint.url.clone(),
                stage: stage_for_agent(name),
                status,
            }
        }
    });

    let agents: Vec<AgentStatus> = join_all(probes).await;
    Ok(warp::reply::json(&agents))
}

async fn recent_signals(
    query: SignalsQuery,
    ctx: Arc<AppContext>,
) -> Result<impl Reply, Infallible> {
    let limit = query.limit.unwrap_or(DEFAULT_SIGNAL_LIMIT);
    let signals = ctx.store.recent_signals(limit).await;
    Ok(warp::reply::json(&signals))
}

async fn manual_signal(
    body: Bytes,
    ctx: Arc<AppContext>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    let data: Value = match serde_json::from_slice(&body) {
        Ok(data) => data,
        Err(e) => {
            return Ok(error_reply(
                StatusCode::BAD_REQUEST,
                &OrchestratorError::invalid_request(format!("malformed body: {e}")),
            ))
        }
    };

    let delivered = ctx
        .gateway
        .broadcast_json(&json!({"type": "manual_signal", "data": data}))
        .await;
    info!(clients = delivered, "Manual signal broadcast");

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "status": "success",
            "message": "Manual signal created",
        })),
        StatusCode::OK,
    ))
}

fn error_reply(
    status: StatusCode,
    error: &OrchestratorError,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse::new(error.public_message())),
        status,
    )
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (bound, server) =
        warp::serve(routes(ctx)).try_bind_with_graceful_shutdown(addr, shutdown)?;

    info!("Starting HTTP server on {}", bound);
    server.await;
    info!("HTTP server stopped");
    Ok(())
}
