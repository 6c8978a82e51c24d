//! Agent invocation layer
//!
//! Every agent service (chart analyst, macro forecaster, risk manager, tactic bot)
//! is reached through the same request/response contract. The pipeline only ever
//! sees the [`AgentClient`] capability, so agents can be real HTTP services or
//! in-process test doubles.

pub mod client;

pub use client::{AgentClient, AgentReply, AgentRequest, AgentResponse, HttpAgentClient};

/// Well-known agent identifiers
pub mod ids {
    pub const CHART_ANALYST: &str = "chartanalyst";
    pub const MACRO_FORECASTER: &str = "macroforecaster";
    pub const RISK_MANAGER: &str = "riskmanager";
    pub const TACTIC_BOT: &str = "tacticbot";

    /// Agents the standard pipeline cannot run without
    pub const PIPELINE_AGENTS: [&str; 4] = [CHART_ANALYST, MACRO_FORECASTER, RISK_MANAGER, TACTIC_BOT];
}
