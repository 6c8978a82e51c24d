//! Error taxonomy for the signal orchestration core
//!
//! Agent-layer errors are retried by the pipeline executor and then demoted to
//! stage errors; they never escape a pipeline run. Event bus errors are returned
//! to the publisher. Messages that end up in results or HTTP bodies are passed
//! through [`sanitize_error_message`].

use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single agent invocation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentCallError {
    #[error("Agent {agent_id} unavailable: {message}")]
    Unavailable { agent_id: String, message: String },

    #[error("Agent {agent_id} timed out after {timeout_ms}ms")]
    Timeout { agent_id: String, timeout_ms: u64 },

    #[error("Agent {agent_id} returned an error: {message}")]
    Error {
        agent_id: String,
        status: Option<u16>,
        message: String,
    },
}

impl AgentCallError {
    /// Create agent unavailable error
    pub fn unavailable<A: Into<String>, S: Into<String>>(agent_id: A, message: S) -> Self {
        Self::Unavailable {
            agent_id: agent_id.into(),
            message: message.into(),
        }
    }

    /// Create agent timeout error
    pub fn timeout<A: Into<String>>(agent_id: A, timeout: Duration) -> Self {
        Self::Timeout {
            agent_id: agent_id.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create agent error for a non-success or malformed response
    pub fn agent_error<A: Into<String>, S: Into<String>>(
        agent_id: A,
        status: Option<u16>,
        message: S,
    ) -> Self {
        Self::Error {
            agent_id: agent_id.into(),
            status,
            message: message.into(),
        }
    }

    /// Only transport-level failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    pub fn agent_id(&self) -> &str {
        match self {
            Self::Unavailable { agent_id, .. }
            | Self::Timeout { agent_id, .. }
            | Self::Error { agent_id, .. } => agent_id,
        }
    }
}

/// Stable, serializable classification of a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    AgentUnavailable,
    AgentTimeout,
    AgentError,
    DeadlineExceeded,
    InvalidOutput,
}

/// A stage that did not produce output, with the stage it happened in
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error("Stage {stage} failed: {source}")]
    Agent {
        stage: String,
        source: AgentCallError,
    },

    #[error("Stage {stage} exceeded the pipeline deadline")]
    DeadlineExceeded { stage: String },

    #[error("Stage {stage} produced invalid output: {message}")]
    InvalidOutput { stage: String, message: String },
}

impl StageError {
    pub fn kind(&self) -> StageErrorKind {
        match self {
            Self::Agent { source, .. } => match source {
                AgentCallError::Unavailable { .. } => StageErrorKind::AgentUnavailable,
                AgentCallError::Timeout { .. } => StageErrorKind::AgentTimeout,
                AgentCallError::Error { .. } => StageErrorKind::AgentError,
            },
            Self::DeadlineExceeded { .. } => StageErrorKind::DeadlineExceeded,
            Self::InvalidOutput { .. } => StageErrorKind::InvalidOutput,
        }
    }

    pub fn stage(&self) -> &str {
        match self {
            Self::Agent { stage, .. }
            | Self::DeadlineExceeded { stage }
            | Self::InvalidOutput { stage, .. } => stage,
        }
    }
}

#[derive(Serialize)]
struct StageErrorReport<'a> {
    kind: StageErrorKind,
    stage: &'a str,
    message: String,
}

impl Serialize for StageError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StageErrorReport {
            kind: self.kind(),
            stage: self.stage(),
            message: sanitize_error_message(&self.to_string()),
        }
        .serialize(serializer)
    }
}

/// Publish-layer failure
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize event payload")]
    Serialization(#[source] serde_json::Error),
}

/// Errors surfaced by the orchestrator entry points
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl OrchestratorError {
    /// Create invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Message safe to hand back to an HTTP caller
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Sanitize error messages to prevent sensitive data leakage
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    // Remove common secret patterns
    if let Ok(secret_pattern) = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+") {
        sanitized = secret_pattern
            .replace_all(&sanitized, "${1}=***")
            .to_string();
    }

    // Remove potential file paths that might contain sensitive info
    if let Ok(path_pattern) =
        regex::Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
    {
        sanitized = path_pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
