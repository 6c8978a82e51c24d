//! Accumulating key/value state threaded through a pipeline run
//!
//! Each key has exactly one owner: either the incoming request or the single
//! stage that declared it. Merges are all-or-nothing, so a rejected stage output
//! leaves the state untouched.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Owner recorded for keys seeded from the request
pub const REQUEST_OWNER: &str = "request";

/// Why a stage output could not be merged
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("stage {stage} wrote undeclared key '{key}'")]
    UndeclaredKey { stage: String, key: String },

    #[error("key '{key}' already written by {owner}")]
    KeyAlreadyOwned { key: String, owner: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    values: Map<String, Value>,
    owners: HashMap<String, String>,
}

impl PipelineState {
    /// Seed the state with the request's symbol and timeframe
    pub fn from_request(symbol: &str, timeframe: &str) -> Self {
        let mut state = Self::default();
        for (key, value) in [("symbol", symbol), ("timeframe", timeframe)] {
            state
                .values
                .insert(key.to_string(), Value::String(value.to_string()));
            state
                .owners
                .insert(key.to_string(), REQUEST_OWNER.to_string());
        }
        state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn owner(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    pub fn symbol(&self) -> &str {
        self.get("symbol").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn timeframe(&self) -> &str {
        self.get("timeframe")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Merge a stage's output, validating every key before writing any
    pub fn merge(
        &mut self,
        stage: &str,
        declared_keys: &[&str],
        output: Map<String, Value>,
    ) -> Result<(), StateError> {
        for key in output.keys() {
            if !declared_keys.contains(&key.as_str()) {
                return Err(StateError::UndeclaredKey {
                    stage: stage.to_string(),
                    key: key.clone(),
                });
            }
            if let Some(owner) = self.owners.get(key) {
                return Err(StateError::KeyAlreadyOwned {
                    key: key.clone(),
                    owner: owner.clone(),
                });
            }
        }

        for (key, value) in output {
            self.owners.insert(key.clone(), stage.to_string());
            self.values.insert(key, value);
        }
        Ok(())
    }
}

impl Serialize for PipelineState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_seeded_from_request() {
        let state = PipelineState::from_request("EURUSD", "1h");
        assert_eq!(state.symbol(), "EURUSD");
        assert_eq!(state.timeframe(), "1h");
        assert_eq!(state.owner("symbol"), Some(REQUEST_OWNER));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_merge_records_owner() {
        let mut state = PipelineState::from_request("EURUSD", "1h");
        state
            .merge(
                "chart_analysis",
                &["chart_analysis"],
                output(&[("chart_analysis", json!({"signal_type": "BUY"}))]),
            )
            .unwrap();

        assert!(state.contains("chart_analysis"));
        assert_eq!(state.owner("chart_analysis"), Some("chart_analysis"));
    }

    #[test]
    fn test_undeclared_key_rejected_atomically() {
        let mut state = PipelineState::from_request("EURUSD", "1h");
        let result = state.merge(
            "chart_analysis",
            &["chart_analysis"],
            output(&[
                ("chart_analysis", json!({})),
                ("decision", json!("BUY")),
            ]),
        );

        assert!(matches!(result, Err(StateError::UndeclaredKey { .. })));
        assert!(!state.contains("chart_analysis"));
        assert!(!state.contains("decision"));
    }

    #[test]
    fn test_request_keys_cannot_be_overwritten() {
        let mut state = PipelineState::from_request("EURUSD", "1h");
        let result = state.merge("rogue", &["symbol"], output(&[("symbol", json!("GBPUSD"))]));

        assert_eq!(
            result,
            Err(StateError::KeyAlreadyOwned {
                key: "symbol".to_string(),
                owner: REQUEST_OWNER.to_string(),
            })
        );
        assert_eq!(state.symbol(), "EURUSD");
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let state = PipelineState::from_request("EURUSD", "1h");
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, json!({"symbol": "EURUSD", "timeframe": "1h"}));
    }
}
