//! Fan-out of bus events to live client connections
//!
//! The gateway keeps no history. A connection receives everything broadcast
//! between its registration and its removal, and is removed on the first
//! failed send.

use crate::events::{EventEnvelope, EventHandler, HandlerError};
use crate::observability::metrics;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A send to a client failed; the connection is considered dead
#[derive(Debug, Error)]
#[error("Connection {id} lost: {reason}")]
pub struct ConnectionLost {
    pub id: ConnectionId,
    pub reason: String,
}

impl ConnectionLost {
    pub fn new<S: Into<String>>(id: ConnectionId, reason: S) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

/// A live listener that can be sent text frames
#[async_trait]
pub trait ClientConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    async fn send(&self, text: &str) -> Result<(), ConnectionLost>;
}

#[derive(Default)]
pub struct BroadcastGateway {
    connections: RwLock<HashMap<ConnectionId, Arc<dyn ClientConnection>>>,
}

impl BroadcastGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Arc<dyn ClientConnection>) -> ConnectionId {
        let id = connection.id();
        self.connections.write().await.insert(id, connection);
        debug!(connection_id = %id, "Client connection registered");
        id
    }

    /// Returns false when the connection was not registered
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            debug!(connection_id = %id, "Client connection unregistered");
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send an envelope to every connection; returns how many sends succeeded
    pub async fn broadcast(&self, envelope: &EventEnvelope) -> usize {
        match serde_json::to_string(envelope) {
            Ok(text) => self.send_to_all(&text).await,
            Err(e) => {
                debug!(event_id = %envelope.id, error = %e, "Envelope not serializable, skipping broadcast");
                0
            }
        }
    }

    /// Send an arbitrary JSON value to every connection
    pub async fn broadcast_json(&self, value: &Value) -> usize {
        self.send_to_all(&value.to_string()).await
    }

    async fn send_to_all(&self, text: &str) -> usize {
        let snapshot: Vec<Arc<dyn ClientConnection>> =
            self.connections.read().await.values().cloned().collect();
        if snapshot.is_empty() {
            return 0;
        }

        let results = join_all(snapshot.iter().map(|conn| conn.send(text))).await;

        let mut dead = Vec::new();
        for (conn, result) in snapshot.iter().zip(results) {
            if let Err(lost) = result {
                let id = conn.id();
                debug!(connection_id = %id, reason = %lost.reason, "Dropping dead connection");
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            for id in &dead {
                connections.remove(id);
            }
        }

        metrics().broadcast_sent(dead.len());
        snapshot.len() - dead.len()
    }
}

/// Bus handler forwarding every event on its channel to the gateway
pub struct GatewayForwarder {
    gateway: Arc<BroadcastGateway>,
}

impl GatewayForwarder {
    pub fn new(gateway: Arc<BroadcastGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl EventHandler for GatewayForwarder {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        self.gateway.broadcast(&envelope).await;
        Ok(())
    }
}
