//! Channel-addressed publish/subscribe
//!
//! Every subscription owns an unbounded queue drained by its own worker task,
//! so `publish` never waits on a handler, events reach each subscriber in
//! publish order, and a slow, failing or panicking handler only affects itself.
//!
//! When a [`BrokerBridge`] is attached, published envelopes are also forwarded
//! to the broker, and envelopes received from it that another bus instance
//! published are dispatched to local subscribers.

use super::envelope::EventEnvelope;
use crate::bus_span;
use crate::error::EventBusError;
use crate::observability::metrics;
use crate::transport::BrokerBridge;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives events for one subscription
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        (self.0)(envelope).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Identifies a subscription for [`EventBus::unsubscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct Subscriber {
    id: u64,
    queue: UnboundedSender<EventEnvelope>,
}

type Registry = Arc<RwLock<HashMap<String, Vec<Subscriber>>>>;

pub struct EventBus {
    instance_id: Uuid,
    registry: Registry,
    next_id: AtomicU64,
    bridge: Option<Arc<dyn BrokerBridge>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// In-process bus without a broker
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bus that also forwards to, and listens on, an external broker
    pub fn with_bridge(bridge: Arc<dyn BrokerBridge>) -> Self {
        Self::build(Some(bridge))
    }

    fn build(bridge: Option<Arc<dyn BrokerBridge>>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            bridge,
            inbound_task: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn has_bridge(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.bridge.as_ref().is_some_and(|b| b.is_connected())
    }

    /// Register a handler for a channel; must be called inside a tokio runtime
    pub fn subscribe(&self, channel: &str, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();

        let span = bus_span!(channel = %channel, subscription = id);
        tokio::spawn(
            async move {
                while let Some(envelope) = rx.recv().await {
                    let event_id = envelope.id;
                    match AssertUnwindSafe(handler.handle(envelope))
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(())) => metrics().event_delivered(),
                        Ok(Err(e)) => {
                            metrics().event_handler_failed();
                            warn!(event_id = %event_id, error = %e, "Event handler failed");
                        }
                        Err(_) => {
                            metrics().event_handler_failed();
                            error!(event_id = %event_id, "Event handler panicked");
                        }
                    }
                }
                debug!("Subscription worker stopped");
            }
            .instrument(span),
        );

        write_registry(&self.registry)
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, queue });

        debug!(channel = %channel, subscription = id, "Subscribed");
        SubscriptionHandle {
            id,
            channel: channel.to_string(),
        }
    }

    /// Remove a subscription; returns false if it was already gone
    ///
    /// Events already queued for the subscription are still delivered.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut registry = write_registry(&self.registry);
        let Some(subscribers) = registry.get_mut(&handle.channel) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            registry.remove(&handle.channel);
        }
        removed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        read_registry(&self.registry)
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Publish to local subscribers, then to the broker if one is attached
    ///
    /// Local delivery happens even when the broker step fails.
    pub async fn publish(
        &self,
        channel: &str,
        payload: Value,
    ) -> Result<EventEnvelope, EventBusError> {
        let envelope = EventEnvelope::new(channel, payload, self.instance_id);
        let delivered = dispatch_local(&self.registry, &envelope);
        debug!(channel = %channel, event_id = %envelope.id, subscribers = delivered, "Dispatched locally");

        if let Some(bridge) = &self.bridge {
            if let Err(e) = self.forward(bridge.as_ref(), &envelope).await {
                metrics().event_publish_failed();
                return Err(e);
            }
        }

        metrics().event_published();
        Ok(envelope)
    }

    async fn forward(
        &self,
        bridge: &dyn BrokerBridge,
        envelope: &EventEnvelope,
    ) -> Result<(), EventBusError> {
        if !bridge.is_connected() {
            return Err(EventBusError::Unavailable(format!(
                "broker not connected ({:?})",
                bridge.connection_state()
            )));
        }

        let bytes = envelope.to_bytes().map_err(EventBusError::Serialization)?;
        bridge
            .publish(&envelope.channel, bytes)
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))
    }

    /// Connect the broker bridge; a no-op without one
    pub async fn connect(&self) -> Result<(), EventBusError> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };

        self.ensure_inbound_listener(bridge.as_ref()).await;
        bridge
            .connect()
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))
    }

    /// Disconnect the broker bridge; a no-op without one or when disconnected
    pub async fn disconnect(&self) -> Result<(), EventBusError> {
        let Some(bridge) = &self.bridge else {
            return Ok(());
        };

        bridge
            .disconnect()
            .await
            .map_err(|e| EventBusError::Unavailable(e.to_string()))
    }

    /// Start the task that dispatches envelopes received from the broker
    async fn ensure_inbound_listener(&self, bridge: &dyn BrokerBridge) {
        let mut task = self.inbound_task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        bridge.set_inbound_sender(tx);

        let registry = self.registry.clone();
        let instance_id = self.instance_id;
        *task = Some(tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match EventEnvelope::from_bytes(&bytes) {
                    Ok(envelope) if envelope.origin == instance_id => {
                        debug!(event_id = %envelope.id, "Dropping own event echoed by broker");
                    }
                    Ok(envelope) => {
                        metrics().event_received_from_broker();
                        dispatch_local(&registry, &envelope);
                    }
                    Err(e) => warn!(error = %e, "Discarding malformed event from broker"),
                }
            }
        }));
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(handle) = self.inbound_task.get_mut().take() {
            handle.abort();
        }
    }
}

// Entries are pushed or retained whole, so a poisoned registry is still consistent
fn read_registry(registry: &Registry) -> RwLockReadGuard<'_, HashMap<String, Vec<Subscriber>>> {
    registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_registry(registry: &Registry) -> RwLockWriteGuard<'_, HashMap<String, Vec<Subscriber>>> {
    registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queue a clone of the envelope for every current subscriber of its channel
fn dispatch_local(registry: &Registry, envelope: &EventEnvelope) -> usize {
    let queues: Vec<UnboundedSender<EventEnvelope>> = read_registry(registry)
        .get(&envelope.channel)
        .map(|subs| subs.iter().map(|s| s.queue.clone()).collect())
        .unwrap_or_default();

    queues
        .iter()
        .filter(|queue| queue.send(envelope.clone()).is_ok())
        .count()
}
