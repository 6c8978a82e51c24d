//! Pipeline request and result types

use super::state::PipelineState;
use crate::error::{OrchestratorError, StageError, StageErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Request to run the analysis pipeline for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRequest {
    pub symbol: String,
    pub timeframe: String,
}

impl PipelineRequest {
    pub fn new<S: Into<String>, T: Into<String>>(symbol: S, timeframe: T) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }

    /// Reject blank symbols or timeframes
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.symbol.trim().is_empty() {
            return Err(OrchestratorError::invalid_request("symbol must not be empty"));
        }
        if self.timeframe.trim().is_empty() {
            return Err(OrchestratorError::invalid_request(
                "timeframe must not be empty",
            ));
        }
        Ok(())
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    PartiallyFailed,
    Failed,
}

impl PipelineStatus {
    /// Derive the run status from `(required, failure kind)` per executed stage
    ///
    /// A required-stage failure or an overall deadline expiry fails the run; any
    /// other failure makes it partial.
    pub fn derive<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (bool, Option<StageErrorKind>)>,
    {
        let mut status = Self::Completed;
        for (required, failure) in outcomes {
            match failure {
                None => {}
                Some(StageErrorKind::DeadlineExceeded) => return Self::Failed,
                Some(_) if required => return Self::Failed,
                Some(_) => status = Self::PartiallyFailed,
            }
        }
        status
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one stage; exactly one of `output` / `error` is set
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage_name: String,
    pub output: Option<Value>,
    pub error: Option<StageError>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub attempts: u32,
}

impl StageResult {
    pub fn succeeded(stage_name: &str, output: Value, duration: Duration, attempts: u32) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            output: Some(output),
            error: None,
            duration,
            attempts,
        }
    }

    pub fn failed(stage_name: &str, error: StageError, duration: Duration, attempts: u32) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            output: None,
            error: Some(error),
            duration,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Full record of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub request: PipelineRequest,
    pub final_state: PipelineState,
    pub stage_results: Vec<StageResult>,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Result for the named stage, if it ran
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|s| s.stage_name == name)
    }

    /// Final trading decision, when the tactic stage produced one
    pub fn decision(&self) -> Option<&Value> {
        self.final_state.get("decision")
    }

    /// JSON payload used for publication and HTTP responses
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "run_id": self.run_id,
                "status": self.status,
                "error": format!("failed to serialize result: {e}"),
            })
        })
    }
}
