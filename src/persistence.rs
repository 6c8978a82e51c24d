//! Write-behind persistence of trade signals and their outcomes
//!
//! The orchestrator offers every decided run to a [`SignalSink`] after the
//! result has been returned; sink failures are logged and never reach callers.
//! [`InMemorySignalStore`] keeps a bounded window of recent signals for the
//! HTTP listing.

use crate::pipeline::stages::keys;
use crate::pipeline::PipelineResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_SIGNAL_CAPACITY: usize = 500;

/// Final decision of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub signal_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: String,
    pub agent_name: String,
    pub signal_type: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub signal_data: Value,
    pub macro_context: Option<Value>,
}

impl TradeSignal {
    /// `None` when the run never reached a decision
    pub fn from_result(result: &PipelineResult) -> Option<Self> {
        let decision = result.decision()?;

        Some(Self {
            signal_id: result.run_id,
            timestamp: result.finished_at,
            symbol: result.request.symbol.clone(),
            timeframe: result.request.timeframe.clone(),
            agent_name: decision
                .get("agent")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            signal_type: decision
                .get("signal_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            confidence: decision
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            reasoning: decision
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            signal_data: decision.get("data").cloned().unwrap_or(Value::Null),
            macro_context: result.final_state.get(keys::MACRO_OUTLOOK).cloned(),
        })
    }

    pub fn is_short(&self) -> bool {
        matches!(self.signal_type.as_deref(), Some(side) if side.eq_ignore_ascii_case("SELL"))
    }
}

/// Realised result of acting on a signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeOutcome {
    pub signal_id: Uuid,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub pnl_percentage: f64,
    pub success: bool,
    pub notes: Option<String>,
}

impl TradeOutcome {
    /// Per-unit pnl; short positions gain when the price falls
    pub fn from_prices(
        signal: &TradeSignal,
        entry_price: f64,
        exit_price: f64,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
    ) -> Self {
        let pnl = if signal.is_short() {
            entry_price - exit_price
        } else {
            exit_price - entry_price
        };
        let pnl_percentage = if entry_price != 0.0 {
            pnl * 100.0 / entry_price
        } else {
            0.0
        };

        Self {
            signal_id: signal.signal_id,
            entry_price,
            exit_price,
            entry_time,
            exit_time,
            pnl,
            pnl_percentage,
            success: pnl > 0.0,
            notes: None,
        }
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Signal store unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown signal {0}")]
    UnknownSignal(Uuid),
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn save_signal(&self, signal: TradeSignal) -> Result<(), SinkError>;

    async fn save_outcome(&self, outcome: TradeOutcome) -> Result<(), SinkError>;
}

#[derive(Default)]
struct StoreInner {
    signals: VecDeque<TradeSignal>,
    outcomes: HashMap<Uuid, TradeOutcome>,
}

/// Bounded in-process store, newest signals last
pub struct InMemorySignalStore {
    capacity: usize,
    inner: RwLock<StoreInner>,
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

impl InMemorySignalStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Newest first
    pub async fn recent_signals(&self, limit: usize) -> Vec<TradeSignal> {
        let inner = self.inner.read().await;
        inner.signals.iter().rev().take(limit).cloned().collect()
    }

    pub async fn outcome_for(&self, signal_id: Uuid) -> Option<TradeOutcome> {
        self.inner.read().await.outcomes.get(&signal_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.signals.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SignalSink for InMemorySignalStore {
    async fn save_signal(&self, signal: TradeSignal) -> Result<(), SinkError> {
        let mut inner = self.inner.write().await;
        if inner.signals.len() >= self.capacity {
            if let Some(evicted) = inner.signals.pop_front() {
                inner.outcomes.remove(&evicted.signal_id);
            }
        }
        inner.signals.push_back(signal);
        Ok(())
    }

    async fn save_outcome(&self, outcome: TradeOutcome) -> Result<(), SinkError> {
        let mut inner = self.inner.write().await;
        if !inner.signals.iter().any(|s| s.signal_id == outcome.signal_id) {
            return Err(SinkError::UnknownSignal(outcome.signal_id));
        }
        inner.outcomes.insert(outcome.signal_id, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal(side: &str) -> TradeSignal {
        TradeSignal {
            signal_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            symbol: "EURUSD".to_string(),
            timeframe: "1h".to_string(),
            agent_name: "tacticbot".to_string(),
            signal_type: Some(side.to_string()),
            confidence: 0.8,
            reasoning: "test".to_string(),
            signal_data: json!({}),
            macro_context: None,
        }
    }

    #[test]
    fn test_pnl_by_side() {
        let now = Utc::now();
        let long = TradeOutcome::from_prices(&signal("BUY"), 100.0, 110.0, now, now);
        assert_eq!(long.pnl, 10.0);
        assert_eq!(long.pnl_percentage, 10.0);
        assert!(long.success);

        let short = TradeOutcome::from_prices(&signal("SELL"), 100.0, 110.0, now, now);
        assert_eq!(short.pnl, -10.0);
        assert!(!short.success);
    }

    #[test]
    fn test_zero_entry_price() {
        let now = Utc::now();
        let outcome = TradeOutcome::from_prices(&signal("BUY"), 0.0, 1.0, now, now);
        assert_eq!(outcome.pnl_percentage, 0.0);
    }

    #[tokio::test]
    async fn test_store_evicts_oldest() {
        let store = InMemorySignalStore::new(2);
        let first = signal("BUY");
        let first_id = first.signal_id;
        store.save_signal(first).await.unwrap();
        store.save_signal(signal("SELL")).await.unwrap();
        store.save_signal(signal("HOLD")).await.unwrap();

        let recent = store.recent_signals(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].signal_type.as_deref(), Some("HOLD"));
        assert!(recent.iter().all(|s| s.signal_id != first_id));
    }

    #[tokio::test]
    async fn test_outcome_requires_known_signal() {
        let store = InMemorySignalStore::default();
        let stored = signal("BUY");
        store.save_signal(stored.clone()).await.unwrap();

        let now = Utc::now();
        let outcome = TradeOutcome::from_prices(&stored, 1.10, 1.12, now, now);
        store.save_outcome(outcome.clone()).await.unwrap();
        assert_eq!(store.outcome_for(stored.signal_id).await, Some(outcome));

        let orphan = TradeOutcome::from_prices(&signal("BUY"), 1.0, 1.0, now, now);
        assert!(matches!(
            store.save_outcome(orphan).await,
            Err(SinkError::UnknownSignal(_))
        ));
    }
}
