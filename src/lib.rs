//! Signal Orchestrator
//!
//! Pipeline orchestration core for a set of independently deployed trading
//! agents. A request for one instrument runs through a fixed, dependency-ordered
//! list of agent stages; their outputs accumulate in a typed pipeline state and
//! end in a tactical decision. The finished result is published on an event
//! bus and fanned out to live WebSocket clients.
//!
//! # Overview
//!
//! - [`agent`] - uniform agent contract and its HTTP client
//! - [`pipeline`] - stage list, retries, deadlines and result derivation
//! - [`events`] - publish/subscribe bus with an optional MQTT bridge
//! - [`gateway`] - broadcast of bus events to live client connections
//! - [`orchestrator`] - facade tying a request to the executor, bus and sink
//! - [`api`] - warp HTTP and WebSocket surface
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use signal_orchestrator::agent::HttpAgentClient;
//! use signal_orchestrator::config::OrchestratorConfig;
//! use signal_orchestrator::events::EventBus;
//! use signal_orchestrator::orchestrator::Orchestrator;
//! use signal_orchestrator::pipeline::{PipelineExecutor, PipelineRequest};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = OrchestratorConfig::load_from_file(Path::new("orchestrator.toml"))?;
//! let client = Arc::new(HttpAgentClient::from_config(&config));
//! let executor = Arc::new(PipelineExecutor::from_config(client, &config));
//! let orchestrator = Orchestrator::new(executor, Arc::new(EventBus::new()));
//!
//! let result = orchestrator.handle(PipelineRequest::new("EURUSD", "1h")).await;
//! println!("{} -> {:?}", result.status, result.decision());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod testing;
pub mod transport;

pub use agent::{AgentClient, AgentResponse, HttpAgentClient};
pub use config::{ConfigError, OrchestratorConfig};
pub use error::{AgentCallError, EventBusError, OrchestratorError, StageError};
pub use events::{EventBus, EventEnvelope};
pub use gateway::BroadcastGateway;
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelineExecutor, PipelineRequest, PipelineResult, PipelineStatus};
