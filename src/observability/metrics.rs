//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! pipeline runs, per-stage outcomes, event publication, the broker bridge and
//! the WebSocket gateway.

use crate::pipeline::PipelineStatus;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Pipeline runs
    runs_started: AtomicU64,
    runs_in_flight: AtomicU64,
    runs_completed: AtomicU64,
    runs_partially_failed: AtomicU64,
    runs_failed: AtomicU64,
    run_durations: Mutex<Vec<u64>>, // milliseconds

    // Per-stage outcomes
    stage_stats: Mutex<HashMap<String, StageExecutionStats>>,

    // Event bus
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    events_delivered: AtomicU64,
    handler_failures: AtomicU64,
    inbound_events: AtomicU64,

    // Broker bridge
    broker_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,

    // Broadcast gateway
    ws_connections_active: AtomicU64,
    ws_connections_total: AtomicU64,
    broadcasts: AtomicU64,
    dropped_connections: AtomicU64,

    // Persistence sink
    signals_persisted: AtomicU64,
    persist_failures: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_in_flight: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_partially_failed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            run_durations: Mutex::new(Vec::new()),
            stage_stats: Mutex::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            inbound_events: AtomicU64::new(0),
            broker_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            ws_connections_active: AtomicU64::new(0),
            ws_connections_total: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            dropped_connections: AtomicU64::new(0),
            signals_persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Pipeline run metrics
    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        self.runs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_finished(&self, status: PipelineStatus, duration: Duration) {
        let counter = match status {
            PipelineStatus::Completed => &self.runs_completed,
            PipelineStatus::PartiallyFailed => &self.runs_partially_failed,
            PipelineStatus::Failed => &self.runs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // Saturating decrement; never wraps below zero
        let _ = self
            .runs_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));

        if let Ok(mut durations) = self.run_durations.lock() {
            push_bounded(&mut durations, duration.as_millis() as u64);
        }
    }

    // Stage metrics
    pub fn stage_finished(&self, stage: &str, duration: Duration, success: bool) {
        self.with_stage(stage, |stats| {
            stats.executions += 1;
            if !success {
                stats.failures += 1;
            }
            push_bounded(&mut stats.durations, duration.as_millis() as u64);
        });
    }

    pub fn stage_retried(&self, stage: &str) {
        self.with_stage(stage, |stats| stats.retries += 1);
    }

    fn with_stage(&self, stage: &str, update: impl FnOnce(&mut StageExecutionStats)) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats
                .entry(stage.to_string())
                .or_insert_with(StageExecutionStats::default);
            update(entry);
        }
    }

    // Event bus metrics
    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_received_from_broker(&self) {
        self.inbound_events.fetch_add(1, Ordering::Relaxed);
    }

    // Broker metrics
    pub fn broker_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.broker_connected.store(true, Ordering::Relaxed);
    }

    pub fn broker_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    pub fn broker_connection_lost(&self) {
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    // Gateway metrics
    pub fn ws_connection_opened(&self) {
        self.ws_connections_total.fetch_add(1, Ordering::Relaxed);
        self.ws_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_connection_closed(&self) {
        let _ = self
            .ws_connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn broadcast_sent(&self, dropped: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.dropped_connections
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    // Persistence metrics
    pub fn signal_persisted(&self) {
        self.signals_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_failed(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_in_flight,
            &self.runs_completed,
            &self.runs_partially_failed,
            &self.runs_failed,
            &self.events_published,
            &self.publish_failures,
            &self.events_delivered,
            &self.handler_failures,
            &self.inbound_events,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.ws_connections_active,
            &self.ws_connections_total,
            &self.broadcasts,
            &self.dropped_connections,
            &self.signals_persisted,
            &self.persist_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.broker_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut durations) = self.run_durations.lock() {
            durations.clear();
        }
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
    }

    fn run_duration_statistics(&self) -> (f64, f64, f64) {
        let Ok(durations) = self.run_durations.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if durations.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = durations.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    fn stage_snapshots(&self) -> HashMap<String, StageMetrics> {
        let Ok(stats) = self.stage_stats.lock() else {
            return HashMap::new();
        };

        stats
            .iter()
            .map(|(name, stats)| {
                let avg = if stats.durations.is_empty() {
                    0.0
                } else {
                    stats.durations.iter().sum::<u64>() as f64 / stats.durations.len() as f64
                };
                let success_rate = if stats.executions == 0 {
                    0.0
                } else {
                    (stats.executions - stats.failures) as f64 / stats.executions as f64
                };
                (
                    name.clone(),
                    StageMetrics {
                        executions: stats.executions,
                        failures: stats.failures,
                        retries: stats.retries,
                        avg_duration_ms: avg,
                        success_rate,
                    },
                )
            })
            .collect()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95) = self.run_duration_statistics();

        MetricsSnapshot {
            pipeline: PipelineMetrics {
                runs_started: self.runs_started.load(Ordering::Relaxed),
                runs_in_flight: self.runs_in_flight.load(Ordering::Relaxed),
                runs_completed: self.runs_completed.load(Ordering::Relaxed),
                runs_partially_failed: self.runs_partially_failed.load(Ordering::Relaxed),
                runs_failed: self.runs_failed.load(Ordering::Relaxed),
                avg_run_duration_ms: avg,
                run_duration_p50_ms: p50,
                run_duration_p95_ms: p95,
            },
            stages: self.stage_snapshots(),
            events: EventMetrics {
                published: self.events_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                delivered: self.events_delivered.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
                received_from_broker: self.inbound_events.load(Ordering::Relaxed),
            },
            broker: BrokerMetrics {
                connected: self.broker_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
            },
            gateway: GatewayMetrics {
                active_connections: self.ws_connections_active.load(Ordering::Relaxed),
                total_connections: self.ws_connections_total.load(Ordering::Relaxed),
                broadcasts: self.broadcasts.load(Ordering::Relaxed),
                dropped_connections: self.dropped_connections.load(Ordering::Relaxed),
            },
            persistence: PersistenceMetrics {
                signals_persisted: self.signals_persisted.load(Ordering::Relaxed),
                failures: self.persist_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct StageExecutionStats {
    executions: u64,
    failures: u64,
    retries: u64,
    durations: Vec<u64>, // milliseconds
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub pipeline: PipelineMetrics,
    pub stages: HashMap<String, StageMetrics>,
    pub events: EventMetrics,
    pub broker: BrokerMetrics,
    pub gateway: GatewayMetrics,
    pub persistence: PersistenceMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetrics {
    pub runs_started: u64,
    pub runs_in_flight: u64,
    pub runs_completed: u64,
    pub runs_partially_failed: u64,
    pub runs_failed: u64,
    pub avg_run_duration_ms: f64,
    pub run_duration_p50_ms: f64,
    pub run_duration_p95_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct StageMetrics {
    pub executions: u64,
    pub failures: u64,
    pub retries: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct EventMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub received_from_broker: u64,
}

#[derive(Debug, Serialize)]
pub struct BrokerMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct GatewayMetrics {
    pub active_connections: u64,
    pub total_connections: u64,
    pub broadcasts: u64,
    pub dropped_connections: u64,
}

#[derive(Debug, Serialize)]
pub struct PersistenceMetrics {
    pub signals_persisted: u64,
    pub failures: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn push_bounded(samples: &mut Vec<u64>, value: u64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower = sorted_data[index.floor() as usize] as f64;
        let upper = sorted_data[index.ceil() as usize] as f64;
        lower + (upper - lower) * index.fract()
    }
}
