//! Staged pipeline execution
//!
//! - [`state`] - owned-key accumulating state
//! - [`stages`] - the four analysis stages and their agent payloads
//! - [`retry`] - pure retry decisions for transient agent failures
//! - [`result`] - request, per-stage and per-run results
//! - [`executor`] - runs the stage list under per-stage and overall deadlines

pub mod executor;
pub mod result;
pub mod retry;
pub mod stages;
pub mod state;

pub use executor::PipelineExecutor;
pub use result::{PipelineRequest, PipelineResult, PipelineStatus, StageResult};
pub use retry::{RetryDecision, RetryPolicy};
pub use stages::{standard_stages, Stage, StageSpec, STAGE_NAMES};
pub use state::{PipelineState, StateError};
