//! Mock implementations for testing
//!
//! Provides mock AgentClient, BrokerBridge and ClientConnection implementations
//! so the executor, event bus and gateway can be exercised without agent
//! services, an MQTT broker or real sockets.

use crate::agent::ids;
use crate::agent::{AgentClient, AgentRequest, AgentResponse};
use crate::error::AgentCallError;
use crate::gateway::{ClientConnection, ConnectionId, ConnectionLost};
use crate::transport::{BridgeError, BrokerBridge, ConnectionState};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded agent invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub agent_id: String,
    pub request: AgentRequest,
}

/// Scripted agent client
///
/// Each agent first answers from its queue of scripted replies, then from its
/// persistent failure if one is set, and otherwise with [`default_response`].
#[derive(Debug, Default, Clone)]
pub struct MockAgentClient {
    scripted: Arc<Mutex<HashMap<String, VecDeque<Result<AgentResponse, AgentCallError>>>>>,
    failures: Arc<Mutex<HashMap<String, AgentCallError>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    unhealthy: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for the next call to `agent_id`
    pub fn push_response(&self, agent_id: &str, response: AgentResponse) -> &Self {
        lock(&self.scripted)
            .entry(agent_id.to_string())
            .or_default()
            .push_back(Ok(response));
        self
    }

    /// Queue a failure for the next call to `agent_id`
    pub fn push_error(&self, agent_id: &str, error: AgentCallError) -> &Self {
        lock(&self.scripted)
            .entry(agent_id.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Fail every unscripted call to `agent_id`
    pub fn always_fail(&self, agent_id: &str, error: AgentCallError) -> &Self {
        lock(&self.failures).insert(agent_id.to_string(), error);
        self
    }

    /// Sleep before answering calls to `agent_id`
    pub fn with_delay(&self, agent_id: &str, delay: Duration) -> &Self {
        lock(&self.delays).insert(agent_id.to_string(), delay);
        self
    }

    pub fn set_unhealthy(&self, agent_id: &str) -> &Self {
        lock(&self.unhealthy).insert(agent_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, agent_id: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.agent_id == agent_id)
            .count()
    }

    /// Request the most recent call to `agent_id` carried
    pub fn last_request(&self, agent_id: &str) -> Option<AgentRequest> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|call| call.agent_id == agent_id)
            .map(|call| call.request.clone())
    }

    fn next_reply(
        &self,
        agent_id: &str,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentCallError> {
        if let Some(reply) = lock(&self.scripted)
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(error) = lock(&self.failures).get(agent_id) {
            return Err(error.clone());
        }
        Ok(default_response(agent_id, request))
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn invoke(
        &self,
        agent_id: &str,
        request: &AgentRequest,
        _timeout: Duration,
    ) -> Result<AgentResponse, AgentCallError> {
        lock(&self.calls).push(RecordedCall {
            agent_id: agent_id.to_string(),
            request: request.clone(),
        });

        let delay = lock(&self.delays).get(agent_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.next_reply(agent_id, request)
    }

    async fn health(&self, agent_id: &str, _timeout: Duration) -> Result<(), AgentCallError> {
        if lock(&self.unhealthy).contains(agent_id) {
            Err(AgentCallError::unavailable(agent_id, "mock agent unhealthy"))
        } else {
            Ok(())
        }
    }
}

/// Plausible reply for each pipeline agent
///
/// The tactic agent buys EURUSD and holds everything else.
pub fn default_response(agent_id: &str, request: &AgentRequest) -> AgentResponse {
    let (signal_type, data) = match agent_id {
        ids::CHART_ANALYST => ("BUY", json!({"pattern": "bullish_engulfing"})),
        ids::MACRO_FORECASTER => ("BULLISH", json!({"impact_score": 0.6})),
        ids::RISK_MANAGER => ("LOW_RISK", json!({"position_size": 0.02, "stop_loss_pips": 25})),
        ids::TACTIC_BOT if request.symbol.contains("EURUSD") => {
            ("BUY", json!({"entry": "market", "take_profit_pips": 50}))
        }
        ids::TACTIC_BOT => ("HOLD", json!({})),
        _ => ("HOLD", json!({})),
    };

    mock_response(agent_id, signal_type, 0.8, data)
}

/// Build a response without going through the wire format
pub fn mock_response(agent_id: &str, signal_type: &str, confidence: f64, data: Value) -> AgentResponse {
    AgentResponse {
        agent_name: agent_id.to_string(),
        signal_type: Some(signal_type.to_string()),
        confidence,
        reasoning: format!("mock {agent_id} analysis"),
        data: match data {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    }
}

/// In-memory broker bridge
#[derive(Debug, Default, Clone)]
pub struct MockBridge {
    connected: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    inbound: Arc<Mutex<Option<UnboundedSender<Vec<u8>>>>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge whose `connect` always fails, like an unreachable broker
    pub fn unreachable() -> Self {
        let bridge = Self::default();
        bridge.fail_connect.store(true, Ordering::Relaxed);
        bridge
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::Relaxed);
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.published).clone()
    }

    /// Deliver raw bytes as if they arrived from the broker
    pub fn inject(&self, payload: Vec<u8>) -> bool {
        lock(&self.inbound)
            .as_ref()
            .is_some_and(|tx| tx.send(payload).is_ok())
    }
}

#[async_trait]
impl BrokerBridge for MockBridge {
    async fn connect(&self) -> Result<(), BridgeError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(BridgeError::NotConnected(ConnectionState::Disconnected(
                "mock broker unreachable".to_string(),
            )));
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected(self.connection_state()));
        }
        if self.fail_publish.load(Ordering::Relaxed) {
            return Err(BridgeError::Rejected("mock publish failure".to_string()));
        }
        lock(&self.published).push((channel.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        }
    }

    fn set_inbound_sender(&self, sender: UnboundedSender<Vec<u8>>) {
        *lock(&self.inbound) = Some(sender);
    }
}

/// Gateway connection that records every frame it is sent
#[derive(Debug)]
pub struct RecordingConnection {
    id: ConnectionId,
    received: tokio::sync::Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            received: tokio::sync::Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent send fail
    pub fn fail_sends(&self, fail: bool) {
        self.failing.store(fail, Ordering::Relaxed);
    }

    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    pub async fn received_json(&self) -> Vec<Value> {
        self.received
            .lock()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }
}

#[async_trait]
impl ClientConnection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, text: &str) -> Result<(), ConnectionLost> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ConnectionLost::new(self.id, "mock client went away"));
        }
        self.received.lock().await.push(text.to_string());
        Ok(())
    }
}
