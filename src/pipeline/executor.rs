//! Pipeline executor
//!
//! Runs the fixed stage list for one request. Every stage call is bounded twice:
//! by its own timeout and by the run's overall deadline. Transient agent
//! failures are retried according to [`RetryPolicy`]; everything else becomes a
//! recorded [`StageError`]. `run` never fails, it always produces a
//! [`PipelineResult`].

use super::result::{PipelineRequest, PipelineResult, PipelineStatus, StageResult};
use super::retry::{RetryDecision, RetryPolicy};
use super::stages::{standard_stages, StageSpec};
use super::state::PipelineState;
use crate::agent::AgentClient;
use crate::config::OrchestratorConfig;
use crate::error::{AgentCallError, StageError};
use crate::observability::metrics;
use crate::{run_span, stage_span};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub struct PipelineExecutor {
    client: Arc<dyn AgentClient>,
    stages: Vec<StageSpec>,
    retry: RetryPolicy,
    overall_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        client: Arc<dyn AgentClient>,
        stages: Vec<StageSpec>,
        retry: RetryPolicy,
        overall_timeout: Duration,
    ) -> Self {
        Self {
            client,
            stages,
            retry,
            overall_timeout,
        }
    }

    /// Standard four-stage executor with configured timeouts and retry policy
    pub fn from_config(client: Arc<dyn AgentClient>, config: &OrchestratorConfig) -> Self {
        Self::new(
            client,
            standard_stages(&config.pipeline),
            RetryPolicy::from_config(&config.retry),
            config.pipeline.overall_timeout(),
        )
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Run every stage in order for one request
    pub async fn run(&self, request: PipelineRequest) -> PipelineResult {
        let run_id = Uuid::new_v4();
        let span = run_span!(
            run_id = %run_id,
            symbol = %request.symbol,
            timeframe = %request.timeframe
        );

        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, request: PipelineRequest) -> PipelineResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = TokioInstant::now() + self.overall_timeout;
        metrics().run_started();

        info!(stages = self.stages.len(), "Pipeline run started");

        let state = Arc::new(Mutex::new(PipelineState::from_request(
            &request.symbol,
            &request.timeframe,
        )));
        let mut stage_results = Vec::with_capacity(self.stages.len());
        let mut outcomes = Vec::with_capacity(self.stages.len());

        for spec in &self.stages {
            let stage_clock = Instant::now();
            let mut attempts = 0u32;

            let outcome = tokio::time::timeout_at(
                deadline,
                self.execute_stage(spec, &state, &mut attempts)
                    .instrument(stage_span!(stage = spec.name(), agent = spec.stage.agent_id())),
            )
            .await
            .unwrap_or_else(|_| {
                Err(StageError::DeadlineExceeded {
                    stage: spec.name().to_string(),
                })
            });

            let duration = stage_clock.elapsed();
            metrics().stage_finished(spec.name(), duration, outcome.is_ok());

            let result = match outcome {
                Ok(output) => StageResult::succeeded(spec.name(), output, duration, attempts),
                Err(error) => {
                    warn!(
                        stage = spec.name(),
                        required = spec.required,
                        kind = ?error.kind(),
                        attempts,
                        error = %error,
                        "Stage failed"
                    );
                    StageResult::failed(spec.name(), error, duration, attempts)
                }
            };

            let failure = result.error.as_ref().map(StageError::kind);
            outcomes.push((spec.required, failure));
            stage_results.push(result);

            if PipelineStatus::derive(outcomes.iter().copied()) == PipelineStatus::Failed {
                info!(stage = spec.name(), "Aborting remaining stages");
                break;
            }
        }

        let status = PipelineStatus::derive(outcomes);
        let final_state = lock_state(&state).clone();
        let elapsed = clock.elapsed();
        metrics().run_finished(status, elapsed);

        info!(
            status = %status,
            duration_ms = elapsed.as_millis() as u64,
            "Pipeline run finished"
        );

        PipelineResult {
            run_id,
            request,
            final_state,
            stage_results,
            status,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Call the stage's agent with retries and merge its output
    ///
    /// `attempts` is updated before each call so the count survives if this
    /// future is dropped by the overall deadline.
    async fn execute_stage(
        &self,
        spec: &StageSpec,
        state: &Arc<Mutex<PipelineState>>,
        attempts: &mut u32,
    ) -> Result<serde_json::Value, StageError> {
        let stage = &spec.stage;
        let request = stage.build_request(&lock_state(state));

        let response = loop {
            *attempts += 1;
            let call = self.client.invoke(stage.agent_id(), &request, spec.timeout);

            let error = match tokio::time::timeout(spec.timeout, call).await {
                Ok(Ok(response)) => break response,
                Ok(Err(error)) => error,
                Err(_) => AgentCallError::timeout(stage.agent_id(), spec.timeout),
            };

            match self.retry.decide(*attempts, &error) {
                RetryDecision::Retry { delay } => {
                    debug!(
                        attempt = *attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying agent call"
                    );
                    metrics().stage_retried(stage.name());
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(StageError::Agent {
                        stage: stage.name().to_string(),
                        source: error,
                    });
                }
            }
        };

        let output = stage.extract_output(response);
        let recorded = serde_json::Value::Object(output.clone());

        lock_state(state)
            .merge(stage.name(), stage.output_keys(), output)
            .map_err(|e| StageError::InvalidOutput {
                stage: stage.name().to_string(),
                message: e.to_string(),
            })?;

        Ok(recorded)
    }
}

/// A poisoned lock still holds a consistent state: merges are all-or-nothing
fn lock_state(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
