//! Configuration system for the signal orchestrator
//!
//! Configuration is read once at startup from a TOML file, validated, and then
//! shared immutably (behind an `Arc`) with the pipeline executor, event bus and
//! HTTP surface. Credentials are never stored in the file; the file names the
//! environment variables that hold them.

use crate::agent::ids::PIPELINE_AGENTS;
use crate::pipeline::stages::STAGE_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main orchestrator configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub server: ServerSection,
    /// External message broker; the event bus stays in-process when absent
    pub broker: Option<BrokerSection>,
    /// Network address of every agent service, keyed by agent id
    #[serde(default)]
    pub agents: BTreeMap<String, AgentEndpoint>,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub events: EventsSection,
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8007
}

/// Message broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port (mqtt:// or mqtts://)
    pub url: String,
    /// Topic prefix under which bus channels are bridged
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Client identifier; generated per connection when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Time to wait for the broker to acknowledge a connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_topic_prefix() -> String {
    "signals".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

impl BrokerSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get broker username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Get broker password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

/// Address of one agent service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEndpoint {
    /// Base URL, e.g. `http://chartanalyst:8001`
    pub url: String,
}

/// Pipeline timing and per-stage overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Deadline for a whole run, independent of stage timeouts
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,
    /// Default timeout for a single agent call
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    #[serde(default)]
    pub stages: BTreeMap<String, StageOverride>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            overall_timeout_ms: default_overall_timeout_ms(),
            stage_timeout_ms: default_stage_timeout_ms(),
            stages: BTreeMap::new(),
        }
    }
}

fn default_overall_timeout_ms() -> u64 {
    30_000
}

fn default_stage_timeout_ms() -> u64 {
    10_000
}

/// Optional per-stage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageOverride {
    pub timeout_ms: Option<u64>,
    pub required: Option<bool>,
}

impl PipelineSection {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    /// Timeout for one stage, falling back to the pipeline default
    pub fn stage_timeout(&self, stage: &str) -> Duration {
        let millis = self
            .stages
            .get(stage)
            .and_then(|s| s.timeout_ms)
            .unwrap_or(self.stage_timeout_ms);
        Duration::from_millis(millis)
    }

    /// Whether a stage is required, falling back to the stage's own default
    pub fn stage_required(&self, stage: &str, default: bool) -> bool {
        self.stages
            .get(stage)
            .and_then(|s| s.required)
            .unwrap_or(default)
    }
}

/// Retry policy for transient agent failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySection {
    /// Total attempts per stage, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// Event publication settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsSection {
    /// Channel every pipeline result is published on
    #[serde(default = "default_results_channel")]
    pub results_channel: String,
    /// Number of recent signals kept for the `/signals` listing
    #[serde(default = "default_signal_history")]
    pub signal_history: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            results_channel: default_results_channel(),
            signal_history: default_signal_history(),
        }
    }
}

fn default_results_channel() -> String {
    "pipeline.results".to_string()
}

fn default_signal_history() -> usize {
    200
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Missing agent endpoint: {0}")]
    MissingAgent(String),
    #[error("Invalid URL for {name}: {url}")]
    InvalidUrl { name: String, url: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OrchestratorConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OrchestratorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        for agent_id in PIPELINE_AGENTS {
            if !self.agents.contains_key(agent_id) {
                return Err(ConfigError::MissingAgent(agent_id.to_string()));
            }
        }

        for (agent_id, endpoint) in &self.agents {
            validate_url(agent_id, &endpoint.url, &["http", "https"])?;
        }

        if let Some(broker) = &self.broker {
            validate_url("broker", &broker.url, &["mqtt", "mqtts"])?;
            if broker.topic_prefix.trim_matches('/').is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "broker.topic_prefix must not be empty".to_string(),
                ));
            }
        }

        if self.pipeline.overall_timeout_ms == 0 || self.pipeline.stage_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }

        for (stage, overrides) in &self.pipeline.stages {
            if !STAGE_NAMES.contains(&stage.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "unknown pipeline stage '{stage}' (expected one of {STAGE_NAMES:?})"
                )));
            }
            if overrides.timeout_ms == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "pipeline.stages.{stage}.timeout_ms must be greater than zero"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.events.results_channel.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "events.results_channel must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL of an agent service
    pub fn agent_url(&self, agent_id: &str) -> Option<&str> {
        self.agents.get(agent_id).map(|a| a.url.as_str())
    }

    /// Socket address string for the HTTP server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Helper method to get environment variable with error propagation
    pub fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[agents.chartanalyst]
url = "http://localhost:8001"

[agents.riskmanager]
url = "http://localhost:8002"

[agents.macroforecaster]
url = "http://localhost:8004"

[agents.tacticbot]
url = "http://localhost:8005"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Helper to read an optional environment variable named in the config
fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_url(name: &str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl {
        name: name.to_string(),
        url: raw.to_string(),
    };
    let url = Url::parse(raw).map_err(|_| invalid())?;
    if !schemes.contains(&url.scheme()) || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}
