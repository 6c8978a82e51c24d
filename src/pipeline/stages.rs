//! The four analysis stages and their agent payloads
//!
//! A stage reads a snapshot of the state, builds the request for its agent, and
//! maps the agent's response onto the single key it owns.

use super::state::PipelineState;
use crate::agent::ids;
use crate::agent::{AgentRequest, AgentResponse};
use crate::config::PipelineSection;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const CHART_ANALYSIS: &str = "chart_analysis";
pub const MACRO_FORECAST: &str = "macro_forecast";
pub const RISK_ASSESSMENT: &str = "risk_assessment";
pub const TACTIC_DECISION: &str = "tactic_decision";

/// Stage names in execution order
pub const STAGE_NAMES: [&str; 4] = [CHART_ANALYSIS, MACRO_FORECAST, RISK_ASSESSMENT, TACTIC_DECISION];

/// Reserved state keys written by each stage
pub mod keys {
    pub const CHART_ANALYSIS: &str = "chart_analysis";
    pub const MACRO_OUTLOOK: &str = "macro_outlook";
    pub const RISK_SCORE: &str = "risk_score";
    pub const DECISION: &str = "decision";
}

/// One unit of work in the pipeline
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn agent_id(&self) -> &'static str;

    /// Keys this stage is allowed to write
    fn output_keys(&self) -> &'static [&'static str];

    /// Whether a failure of this stage aborts the run, absent configuration
    fn required_by_default(&self) -> bool;

    fn build_request(&self, state: &PipelineState) -> AgentRequest;

    /// Map the agent response onto this stage's output keys
    fn extract_output(&self, response: AgentResponse) -> Map<String, Value> {
        let mut output = Map::new();
        if let Some(key) = self.output_keys().first() {
            output.insert(key.to_string(), stage_value(response));
        }
        output
    }
}

/// Uniform shape of a stage output value
pub fn stage_value(response: AgentResponse) -> Value {
    json!({
        "agent": response.agent_name,
        "signal_type": response.signal_type,
        "confidence": response.confidence,
        "reasoning": response.reasoning,
        "data": response.data,
    })
}

fn base_request(state: &PipelineState) -> AgentRequest {
    AgentRequest::new(state.symbol(), state.timeframe())
}

fn object(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Copy the listed keys that are present in the state
fn context_from(state: &PipelineState, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| state.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

pub struct ChartAnalysisStage;

impl Stage for ChartAnalysisStage {
    fn name(&self) -> &'static str {
        CHART_ANALYSIS
    }

    fn agent_id(&self) -> &'static str {
        ids::CHART_ANALYST
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &[keys::CHART_ANALYSIS]
    }

    fn required_by_default(&self) -> bool {
        true
    }

    fn build_request(&self, state: &PipelineState) -> AgentRequest {
        base_request(state)
    }
}

pub struct MacroForecastStage;

impl Stage for MacroForecastStage {
    fn name(&self) -> &'static str {
        MACRO_FORECAST
    }

    fn agent_id(&self) -> &'static str {
        ids::MACRO_FORECASTER
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &[keys::MACRO_OUTLOOK]
    }

    fn required_by_default(&self) -> bool {
        false
    }

    fn build_request(&self, state: &PipelineState) -> AgentRequest {
        base_request(state)
            .with_data(object(vec![
                ("news", json!([])),
                ("economic_events", json!([])),
            ]))
            .with_context(context_from(state, &[keys::CHART_ANALYSIS]))
    }
}

pub struct RiskAssessmentStage;

impl Stage for RiskAssessmentStage {
    fn name(&self) -> &'static str {
        RISK_ASSESSMENT
    }

    fn agent_id(&self) -> &'static str {
        ids::RISK_MANAGER
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &[keys::RISK_SCORE]
    }

    fn required_by_default(&self) -> bool {
        false
    }

    fn build_request(&self, state: &PipelineState) -> AgentRequest {
        let signal = state
            .get(keys::CHART_ANALYSIS)
            .cloned()
            .unwrap_or_else(|| json!({}));

        base_request(state)
            .with_data(object(vec![("signal", signal), ("portfolio", json!({}))]))
            .with_context(context_from(state, &[keys::MACRO_OUTLOOK]))
    }
}

pub struct TacticDecisionStage;

impl Stage for TacticDecisionStage {
    fn name(&self) -> &'static str {
        TACTIC_DECISION
    }

    fn agent_id(&self) -> &'static str {
        ids::TACTIC_BOT
    }

    fn output_keys(&self) -> &'static [&'static str] {
        &[keys::DECISION]
    }

    fn required_by_default(&self) -> bool {
        true
    }

    fn build_request(&self, state: &PipelineState) -> AgentRequest {
        let agent_signals: Vec<Value> = [keys::CHART_ANALYSIS, keys::MACRO_OUTLOOK, keys::RISK_SCORE]
            .iter()
            .filter_map(|key| state.get(key).cloned())
            .collect();

        base_request(state).with_data(object(vec![
            ("agent_signals", Value::Array(agent_signals)),
            ("market_conditions", json!({})),
        ]))
    }
}

/// A stage together with its effective runtime settings
#[derive(Clone)]
pub struct StageSpec {
    pub stage: Arc<dyn Stage>,
    pub required: bool,
    pub timeout: Duration,
}

impl StageSpec {
    pub fn new(stage: Arc<dyn Stage>, required: bool, timeout: Duration) -> Self {
        Self {
            stage,
            required,
            timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        self.stage.name()
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("stage", &self.stage.name())
            .field("agent", &self.stage.agent_id())
            .field("required", &self.required)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The fixed four-stage pipeline with configured overrides applied
pub fn standard_stages(config: &PipelineSection) -> Vec<StageSpec> {
    let stages: [Arc<dyn Stage>; 4] = [
        Arc::new(ChartAnalysisStage),
        Arc::new(MacroForecastStage),
        Arc::new(RiskAssessmentStage),
        Arc::new(TacticDecisionStage),
    ];

    stages
        .into_iter()
        .map(|stage| {
            let required = config.stage_required(stage.name(), stage.required_by_default());
            let timeout = config.stage_timeout(stage.name());
            StageSpec::new(stage, required, timeout)
        })
        .collect()
}

/// Stage name served by an agent, if any
pub fn stage_for_agent(agent_id: &str) -> Option<&'static str> {
    match agent_id {
        ids::CHART_ANALYST => Some(CHART_ANALYSIS),
        ids::MACRO_FORECASTER => Some(MACRO_FORECAST),
        ids::RISK_MANAGER => Some(RISK_ASSESSMENT),
        ids::TACTIC_BOT => Some(TACTIC_DECISION),
        _ => None,
    }
}
