//! Orchestrator facade
//!
//! One entry point per pipeline request: run the executor, publish the result
//! on the results channel, hand the decision to the persistence sink, return
//! the result. Publishing and persistence never change what the caller gets.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::EventBus;
use crate::observability::metrics;
use crate::persistence::{SignalSink, TradeOutcome, TradeSignal};
use crate::pipeline::{PipelineExecutor, PipelineRequest, PipelineResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RESULTS_CHANNEL: &str = "pipeline.results";

pub struct Orchestrator {
    executor: Arc<PipelineExecutor>,
    bus: Arc<EventBus>,
    sink: Option<Arc<dyn SignalSink>>,
    results_channel: String,
}

impl Orchestrator {
    pub fn new(executor: Arc<PipelineExecutor>, bus: Arc<EventBus>) -> Self {
        Self {
            executor,
            bus,
            sink: None,
            results_channel: DEFAULT_RESULTS_CHANNEL.to_string(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_results_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.results_channel = channel.into();
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn executor(&self) -> &Arc<PipelineExecutor> {
        &self.executor
    }

    pub fn results_channel(&self) -> &str {
        &self.results_channel
    }

    /// Run the pipeline for a request and distribute the result
    pub async fn handle(&self, request: PipelineRequest) -> PipelineResult {
        let result = self.executor.run(request).await;

        self.publish_result(&result).await;
        self.persist_signal(&result);

        info!(
            run_id = %result.run_id,
            status = %result.status,
            "Pipeline request handled"
        );
        result
    }

    /// Validate the request before running it
    pub async fn handle_checked(
        &self,
        request: PipelineRequest,
    ) -> OrchestratorResult<PipelineResult> {
        request.validate()?;
        Ok(self.handle(request).await)
    }

    /// Publish on the results channel; failures are logged and swallowed
    pub async fn publish_result(&self, result: &PipelineResult) -> bool {
        match self
            .bus
            .publish(&self.results_channel, result.to_payload())
            .await
        {
            Ok(envelope) => {
                debug!(run_id = %result.run_id, event_id = %envelope.id, channel = %self.results_channel, "Result published");
                true
            }
            Err(e) => {
                warn!(run_id = %result.run_id, channel = %self.results_channel, error = %e, "Failed to publish pipeline result");
                false
            }
        }
    }

    fn persist_signal(&self, result: &PipelineResult) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Some(signal) = TradeSignal::from_result(result) else {
            debug!(run_id = %result.run_id, "Run produced no decision, nothing to persist");
            return;
        };

        tokio::spawn(async move {
            let signal_id = signal.signal_id;
            match sink.save_signal(signal).await {
                Ok(()) => metrics().signal_persisted(),
                Err(e) => {
                    metrics().persist_failed();
                    warn!(signal_id = %signal_id, error = %e, "Failed to persist trade signal");
                }
            }
        });
    }

    /// Forward an outcome to the sink in the background
    pub fn record_outcome(&self, outcome: TradeOutcome) -> OrchestratorResult<JoinHandle<()>> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| OrchestratorError::internal_error("no signal sink configured"))?;

        Ok(tokio::spawn(async move {
            let signal_id = outcome.signal_id;
            match sink.save_outcome(outcome).await {
                Ok(()) => debug!(signal_id = %signal_id, "Trade outcome recorded"),
                Err(e) => {
                    metrics().persist_failed();
                    warn!(signal_id = %signal_id, error = %e, "Failed to persist trade outcome");
                }
            }
        }))
    }
}
