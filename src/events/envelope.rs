use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One published event, cloned to every subscriber
///
/// `origin` identifies the bus instance that published it, so an instance can
/// recognise its own events when the broker echoes them back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub channel: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
    pub origin: Uuid,
}

impl EventEnvelope {
    pub fn new(channel: &str, payload: Value, origin: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            payload,
            published_at: Utc::now(),
            origin,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
