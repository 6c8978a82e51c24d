//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use signal_orchestrator::config::{ConfigError, OrchestratorConfig};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

const AGENTS: &str = r#"
[agents.chartanalyst]
url = "http://chartanalyst:8001"

[agents.riskmanager]
url = "http://riskmanager:8002"

[agents.macroforecaster]
url = "http://macroforecaster:8004"

[agents.tacticbot]
url = "http://tacticbot:8005"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 9000

[pipeline]
overall_timeout_ms = 20000
stage_timeout_ms = 4000

[retry]
max_attempts = 2
backoff_base_ms = 100
max_backoff_ms = 1000

[events]
results_channel = "signals.results"
signal_history = 50
{AGENTS}"#
    ));

    let config = OrchestratorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.bind_address(), "127.0.0.1:9000");
    assert_eq!(config.pipeline.overall_timeout(), Duration::from_secs(20));
    assert_eq!(
        config.pipeline.stage_timeout("chart_analysis"),
        Duration::from_secs(4)
    );
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.events.results_channel, "signals.results");
    assert_eq!(config.events.signal_history, 50);
    assert_eq!(config.agent_url("tacticbot"), Some("http://tacticbot:8005"));
}

#[test]
fn test_config_defaults_fill_missing_sections() {
    let temp_file = write_config(AGENTS);

    let config = OrchestratorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.bind_address(), "0.0.0.0:8007");
    assert!(config.broker.is_none());
    assert_eq!(config.pipeline.overall_timeout(), Duration::from_secs(30));
    assert_eq!(
        config.pipeline.stage_timeout("risk_assessment"),
        Duration::from_secs(10)
    );
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.events.results_channel, "pipeline.results");
    assert_eq!(config.events.signal_history, 200);
}

#[test]
fn test_config_fails_when_file_missing() {
    let result = OrchestratorConfig::load_from_file(Path::new("/nonexistent/orchestrator.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_on_invalid_toml() {
    let temp_file = write_config("[agents.chartanalyst\nurl = ");
    let result = OrchestratorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_requires_every_pipeline_agent() {
    let temp_file = write_config(
        r#"
[agents.chartanalyst]
url = "http://chartanalyst:8001"

[agents.riskmanager]
url = "http://riskmanager:8002"

[agents.macroforecaster]
url = "http://macroforecaster:8004"
"#,
    );

    let result = OrchestratorConfig::load_from_file(temp_file.path());
    match result {
        Err(ConfigError::MissingAgent(agent)) => assert_eq!(agent, "tacticbot"),
        other => panic!("expected missing agent, got {other:?}"),
    }
}

#[test]
fn test_config_rejects_non_http_agent_url() {
    let temp_file = write_config(&format!(
        r#"
[agents.sentiment]
url = "ftp://sentiment:21"
{AGENTS}"#
    ));

    let result = OrchestratorConfig::load_from_file(temp_file.path());
    assert!(matches!(
        result,
        Err(ConfigError::InvalidUrl { ref name, .. }) if name == "sentiment"
    ));
}

#[test]
fn test_config_stage_overrides_apply() {
    let temp_file = write_config(&format!(
        r#"
[pipeline.stages.chart_analysis]
timeout_ms = 1500

[pipeline.stages.risk_assessment]
required = true
{AGENTS}"#
    ));

    let config = OrchestratorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.pipeline.stage_timeout("chart_analysis"),
        Duration::from_millis(1500)
    );
    assert!(config.pipeline.stage_required("risk_assessment", false));
    assert!(config.pipeline.stage_required("chart_analysis", true));
}

#[test]
fn test_config_rejects_zero_timeouts() {
    let temp_file = write_config(&format!(
        r#"
[pipeline]
stage_timeout_ms = 0
{AGENTS}"#
    ));

    let result = OrchestratorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_broker_section() {
    let temp_file = write_config(&format!(
        r#"
[broker]
url = "mqtt://broker:1883"
topic_prefix = "trading"
username_env = "SIGNAL_ORCH_IT_BROKER_USER_UNSET"
{AGENTS}"#
    ));

    let config = OrchestratorConfig::load_from_file(temp_file.path()).unwrap();
    let broker = config.broker.expect("broker section should be present");

    assert_eq!(broker.url, "mqtt://broker:1883");
    assert_eq!(broker.topic_prefix, "trading");
    assert_eq!(broker.connect_timeout(), Duration::from_secs(5));
    assert_eq!(broker.username(), None);
}

#[test]
fn test_config_rejects_empty_topic_prefix() {
    let temp_file = write_config(&format!(
        r#"
[broker]
url = "mqtt://broker:1883"
topic_prefix = "/"
{AGENTS}"#
    ));

    let result = OrchestratorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_round_trips_through_pretty_toml() {
    let config = OrchestratorConfig::from_toml_str(AGENTS).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = OrchestratorConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
