//! Broker transport for the event bus
//!
//! The event bus only depends on the [`BrokerBridge`] capability so that the
//! MQTT implementation can be swapped for an in-memory double in tests.

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub mod mqtt;

pub use mqtt::{MqttBridge, MqttError};

/// Connection state shared by bridge implementations
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Never connected, or cleanly disconnected
    Idle,
    /// Attempting to connect
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Connection lost with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Gave up after too many reconnection attempts
    PermanentlyDisconnected(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Broker not connected (state: {0:?})")]
    NotConnected(ConnectionState),

    #[error(transparent)]
    Mqtt(#[from] MqttError),

    #[error("Broker rejected operation: {0}")]
    Rejected(String),
}

/// Bridge between the in-process bus and an external broker
///
/// Payloads are opaque bytes; the bus owns the envelope encoding.
#[async_trait::async_trait]
pub trait BrokerBridge: Send + Sync {
    /// Connect, subscribing to every bus channel; idempotent
    async fn connect(&self) -> Result<(), BridgeError>;

    /// Disconnect; a no-op when already disconnected
    async fn disconnect(&self) -> Result<(), BridgeError>;

    /// Publish one encoded envelope on a bus channel
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// Where payloads received from the broker are forwarded
    fn set_inbound_sender(&self, sender: UnboundedSender<Vec<u8>>);
}
