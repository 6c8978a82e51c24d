//! MQTT bridge I/O
//!
//! Owns the rumqttc client and a supervised poll loop. The loop publishes every
//! connection state change through a `watch` channel, re-subscribes after each
//! ConnAck, forwards inbound event payloads to the bus, and backs off between
//! polls after a broker error (rumqttc reconnects on the next poll).

use super::connection::{configure_mqtt_options, MqttError, ReconnectConfig, TopicBuilder};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BrokerSection;
use crate::observability::metrics;
use crate::transport::{BridgeError, BrokerBridge, ConnectionState};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type InboundSlot = Arc<StdMutex<Option<UnboundedSender<Vec<u8>>>>>;

/// One live connection: client handle plus its poll loop
struct Session {
    client: AsyncClient,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Everything the poll loop needs, moved into its task
struct PollContext {
    topics: TopicBuilder,
    client: AsyncClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    inbound: InboundSlot,
    reconnect_config: ReconnectConfig,
}

pub struct MqttBridge {
    config: BrokerSection,
    topics: TopicBuilder,
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    inbound: InboundSlot,
    session: Mutex<Option<Session>>,
}

impl MqttBridge {
    pub fn new(config: BrokerSection) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            topics: TopicBuilder::new(&config.topic_prefix),
            config,
            reconnect_config: ReconnectConfig::default(),
            state_tx: Arc::new(state_tx),
            inbound: Arc::new(StdMutex::new(None)),
            session: Mutex::new(None),
        }
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Subscribe to connection state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn transition(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Wait until the poll loop reports ConnAck, a failure, or the timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        outcome.unwrap_or_else(|_| {
            Err(MqttError::ConnectionFailed(
                "ConnAck timeout - no connection confirmation received".to_string(),
            ))
        })
    }

    async fn run_event_loop(
        ctx: PollContext,
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping broker poll loop");
                        break;
                    }
                }
                event = event_loop.poll() => {
                    let keep_running = match event {
                        Ok(event) => {
                            Self::handle_route(
                                &ctx,
                                MessageHandler::route_mqtt_event(&event),
                                &mut reconnect_attempts,
                                &shutdown_rx,
                            )
                            .await
                        }
                        Err(e) => {
                            error!(error = %e, "Broker poll error");
                            metrics().broker_connection_lost();
                            Self::transition(
                                &ctx.state_tx,
                                HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(
                                    e.to_string(),
                                )),
                            );
                            Self::back_off(&ctx, &mut reconnect_attempts, &shutdown_rx).await
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }
        debug!("Broker poll loop stopped");
    }

    /// Returns false when the loop should stop
    async fn handle_route(
        ctx: &PollContext,
        route: EventRoute,
        reconnect_attempts: &mut u32,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                *reconnect_attempts = 0;
                metrics().broker_connection_established();
                let wildcard = ctx.topics.wildcard();
                if let Err(e) = ctx.client.subscribe(wildcard.as_str(), QoS::AtLeastOnce).await {
                    error!(topic = %wildcard, error = %e, "Failed to subscribe to event topics");
                }
                Self::transition(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
                );
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                let channel = ctx.topics.channel_from_topic(&topic);
                if MessageHandler::should_forward(retain, channel) {
                    let sender = ctx.inbound.lock().ok().and_then(|slot| slot.clone());
                    if let Some(sender) = sender {
                        if sender.send(payload).is_err() {
                            debug!("Inbound receiver dropped; discarding broker message");
                        }
                    }
                } else {
                    debug!(topic = %topic, retain, "Ignoring broker message");
                }
                true
            }
            EventRoute::Disconnected => {
                metrics().broker_connection_lost();
                Self::transition(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
                );
                Self::back_off(ctx, reconnect_attempts, shutdown_rx).await
            }
            EventRoute::SubscriptionConfirmed => {
                debug!("Event topic subscription confirmed");
                true
            }
            EventRoute::Ignored => true,
        }
    }

    /// Sleep before the next poll; returns false when reconnecting should stop
    async fn back_off(
        ctx: &PollContext,
        reconnect_attempts: &mut u32,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &ctx.reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::transition(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(
                        attempt,
                    )),
                );
                info!(attempt, delay_ms, "Reconnecting to broker");
                Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    *reconnect_attempts
                );
                Self::transition(
                    &ctx.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure(reason)),
                );
                false
            }
        }
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Stop a session's poll loop, giving it a moment to exit cleanly
    async fn stop_session(session: Session) {
        let _ = session.shutdown_tx.send(true);
        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Broker disconnect request not delivered");
        }

        match tokio::time::timeout(Duration::from_secs(2), session.handle).await {
            Ok(Ok(())) => debug!("Broker poll loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "Broker poll loop ended with error"),
            Err(_) => warn!("Broker poll loop did not stop in time"),
            _ => {}
        }
    }
}

#[async_trait]
impl BrokerBridge for MqttBridge {
    async fn connect(&self) -> Result<(), BridgeError> {
        let mut session = self.session.lock().await;

        if session.is_some() {
            if self.is_connected() {
                return Ok(());
            }
            if let Some(stale) = session.take() {
                Self::stop_session(stale).await;
            }
        }

        let options = configure_mqtt_options(&self.config)?;
        metrics().broker_connection_attempt();
        Self::transition(&self.state_tx, ConnectionState::Connecting);

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state_rx = self.state_tx.subscribe();

        let ctx = PollContext {
            topics: self.topics.clone(),
            client: client.clone(),
            state_tx: self.state_tx.clone(),
            inbound: self.inbound.clone(),
            reconnect_config: self.reconnect_config.clone(),
        };
        let handle = tokio::spawn(Self::run_event_loop(ctx, event_loop, shutdown_rx));
        let pending = Session {
            client,
            handle,
            shutdown_tx,
        };

        match Self::wait_for_connection_confirmation(state_rx, self.config.connect_timeout()).await
        {
            Ok(()) => {
                info!(url = %self.config.url, "Connected to broker");
                *session = Some(pending);
                Ok(())
            }
            Err(e) => {
                metrics().broker_connection_failed();
                Self::stop_session(pending).await;
                Self::transition(&self.state_tx, ConnectionState::Disconnected(e.to_string()));
                Err(e.into())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        Self::stop_session(session).await;
        metrics().broker_connection_lost();
        Self::transition(
            &self.state_tx,
            HealthMonitor::determine_next_state(ConnectionEvent::ClientDisconnected),
        );
        info!("Disconnected from broker");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let state = self.connection_state();
        if !HealthMonitor::can_publish(&state) {
            return Err(BridgeError::NotConnected(state));
        }

        let client = match self.session.lock().await.as_ref() {
            Some(session) => session.client.clone(),
            None => return Err(BridgeError::NotConnected(self.connection_state())),
        };

        let topic = self.topics.event_topic(channel);
        client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic = %topic, "Published event to broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.state_tx.borrow())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_inbound_sender(&self, sender: UnboundedSender<Vec<u8>>) {
        if let Ok(mut slot) = self.inbound.lock() {
            *slot = Some(sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_broker() -> BrokerSection {
        BrokerSection {
            url: "mqtt://127.0.0.1:1".to_string(),
            topic_prefix: "signals".to_string(),
            client_id: None,
            username_env: None,
            password_env: None,
            connect_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let bridge = MqttBridge::new(unreachable_broker());
        assert_eq!(bridge.connection_state(), ConnectionState::Idle);
        assert!(!bridge.is_connected());
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let bridge = MqttBridge::new(unreachable_broker());
        let result = bridge.publish("pipeline.results", b"{}".to_vec()).await;
        assert!(matches!(
            result,
            Err(BridgeError::NotConnected(ConnectionState::Idle))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let bridge = MqttBridge::new(unreachable_broker());
        assert!(bridge.disconnect().await.is_ok());
        assert!(bridge.disconnect().await.is_ok());
        assert_eq!(bridge.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let bridge = MqttBridge::new(unreachable_broker());
        let result = bridge.connect().await;

        assert!(result.is_err());
        assert!(!bridge.is_connected());
        assert!(matches!(
            bridge.connection_state(),
            ConnectionState::Disconnected(_)
        ));
    }
}
