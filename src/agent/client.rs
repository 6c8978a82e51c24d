//! Agent client capability and its HTTP implementation
//!
//! # Wire contract
//!
//! Request (`POST {agent_url}/analyze`):
//!
//! ```json
//! { "symbol": "EURUSD", "timeframe": "1h", "data": {...}, "context": {...} }
//! ```
//!
//! Response:
//!
//! ```json
//! {
//!   "agent_name": "chartanalyst",
//!   "timestamp": "2024-01-01T12:00:00Z",
//!   "symbol": "EURUSD",
//!   "confidence": 0.85,
//!   "signal_type": "BUY",
//!   "reasoning": "Bullish engulfing on the 1h chart",
//!   "data": {...},
//!   "metadata": {...}
//! }
//! ```
//!
//! A non-2xx status, an unparseable body or a confidence outside `[0, 1]` all map
//! to [`AgentCallError::Error`]. No retries happen here; retry policy belongs to
//! the pipeline executor.

use crate::config::OrchestratorConfig;
use crate::error::AgentCallError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Request sent to an agent service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRequest {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl AgentRequest {
    pub fn new<S: Into<String>, T: Into<String>>(symbol: S, timeframe: T) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            data: Map::new(),
            context: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Attach context; an empty map is treated as no context
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = if context.is_empty() {
            None
        } else {
            Some(context)
        };
        self
    }
}

/// Raw response body returned by an agent service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentReply {
    pub agent_name: String,
    pub timestamp: String,
    pub symbol: String,
    pub confidence: f64,
    #[serde(default)]
    pub signal_type: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Typed agent result handed to pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub agent_name: String,
    pub signal_type: Option<String>,
    /// Always within `[0, 1]`
    pub confidence: f64,
    pub reasoning: String,
    pub data: Map<String, Value>,
}

impl AgentResponse {
    /// Validate a wire reply into a typed response
    pub fn from_reply(agent_id: &str, reply: AgentReply) -> Result<Self, AgentCallError> {
        if !(0.0..=1.0).contains(&reply.confidence) {
            return Err(AgentCallError::agent_error(
                agent_id,
                None,
                format!("confidence {} outside [0, 1]", reply.confidence),
            ));
        }

        Ok(Self {
            agent_name: reply.agent_name,
            signal_type: reply.signal_type,
            confidence: reply.confidence,
            reasoning: reply.reasoning,
            data: reply.data,
        })
    }
}

/// Capability for invoking one external agent
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Invoke an agent with a bounded timeout
    async fn invoke(
        &self,
        agent_id: &str,
        request: &AgentRequest,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentCallError>;

    /// Probe an agent's liveness endpoint
    async fn health(&self, agent_id: &str, timeout: Duration) -> Result<(), AgentCallError>;
}

/// HTTP agent client posting to `{agent_url}/analyze`
pub struct HttpAgentClient {
    endpoints: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// Create client from an explicit agent id -> base URL map
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(id, url)| (id, url.trim_end_matches('/').to_string()))
            .collect();

        Self {
            endpoints,
            client: reqwest::Client::new(),
        }
    }

    /// Create client for every agent listed in the configuration
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config
                .agents
                .iter()
                .map(|(id, endpoint)| (id.clone(), endpoint.url.clone()))
                .collect(),
        )
    }

    fn endpoint(&self, agent_id: &str) -> Result<&str, AgentCallError> {
        self.endpoints
            .get(agent_id)
            .map(String::as_str)
            .ok_or_else(|| AgentCallError::unavailable(agent_id, "no endpoint configured"))
    }

    /// Map a reqwest transport failure onto the agent taxonomy
    fn classify_transport_error(
        agent_id: &str,
        timeout: Duration,
        error: reqwest::Error,
    ) -> AgentCallError {
        if error.is_timeout() {
            AgentCallError::timeout(agent_id, timeout)
        } else {
            AgentCallError::unavailable(agent_id, error.to_string())
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(
        &self,
        agent_id: &str,
        request: &AgentRequest,
        timeout: Duration,
    ) -> Result<AgentResponse, AgentCallError> {
        let url = format!("{}/analyze", self.endpoint(agent_id)?);
        debug!(agent = %agent_id, url = %url, symbol = %request.symbol, "Invoking agent");

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify_transport_error(agent_id, timeout, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_transport_error(agent_id, timeout, e))?;

        if !status.is_success() {
            warn!(agent = %agent_id, status = %status, "Agent returned non-success status");
            let snippet: String = body.chars().take(200).collect();
            return Err(AgentCallError::agent_error(
                agent_id,
                Some(status.as_u16()),
                format!("HTTP {status}: {snippet}"),
            ));
        }

        let reply: AgentReply = serde_json::from_str(&body).map_err(|e| {
            AgentCallError::agent_error(
                agent_id,
                Some(status.as_u16()),
                format!("malformed response: {e}"),
            )
        })?;

        AgentResponse::from_reply(agent_id, reply)
    }

    async fn health(&self, agent_id: &str, timeout: Duration) -> Result<(), AgentCallError> {
        let url = format!("{}/health", self.endpoint(agent_id)?);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify_transport_error(agent_id, timeout, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentCallError::agent_error(
                agent_id,
                Some(response.status().as_u16()),
                "health check failed",
            ))
        }
    }
}
