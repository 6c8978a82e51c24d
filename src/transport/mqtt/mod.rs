//! MQTT bridge for the event bus
//!
//! Pure decisions are split from I/O so they can be tested without a broker:
//!
//! - [`connection`] - option building, reconnection backoff, topic layout
//! - [`message_handler`] - routing of rumqttc events
//! - [`health_monitor`] - reconnection decisions and state transitions
//! - [`client`] - the rumqttc client and its supervised poll loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use signal_orchestrator::config::BrokerSection;
//! use signal_orchestrator::transport::{BrokerBridge, MqttBridge};
//!
//! # tokio_test::block_on(async {
//! let bridge = MqttBridge::new(BrokerSection {
//!     url: "mqtt://localhost:1883".to_string(),
//!     topic_prefix: "signals".to_string(),
//!     client_id: None,
//!     username_env: None,
//!     password_env: None,
//!     connect_timeout_ms: 5000,
//! });
//! bridge.connect().await?;
//! bridge.publish("pipeline.results", b"{}".to_vec()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttBridge;
pub use connection::{configure_mqtt_options, MqttError, ReconnectConfig, TopicBuilder};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
