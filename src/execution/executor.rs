//! The command executor boundary.
//!
//! The scheduler never runs commands itself; it hands them to a
//! [`CommandExecutor`], which is expected to be an agent runner of some
//! kind. The executor reports back a structured [`ExecutionReport`] and may
//! surface events (currently only the agent session id) to an optional
//! [`ExecutionObserver`] while the run is in flight.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ScheduleJobConfig;

/// Errors raised by a command executor.
///
/// These are transport-level failures (the runner could not be reached or
/// crashed); a command that ran but failed is reported through
/// [`ExecutionReport::success`] instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Failed to launch or talk to the runner.
    #[error("executor transport failure: {0}")]
    Transport(String),

    /// The run exceeded its configured timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
}

/// A single command invocation, as handed to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Command name, optionally namespaced (`namespace:name`).
    pub command: String,
    /// Optional argument string appended to the command.
    pub arguments: Option<String>,
    /// Per-run budget ceiling in USD.
    pub max_budget_usd: Option<f64>,
    /// Per-run timeout.
    pub timeout: Option<Duration>,
    /// Optional model override.
    pub model: Option<String>,
}

impl ExecutionRequest {
    /// Build a request from a job's current configuration.
    pub fn from_job(config: &ScheduleJobConfig) -> Self {
        Self {
            command: config.command.clone(),
            arguments: config.arguments.clone(),
            max_budget_usd: config.max_budget_usd,
            timeout: config.timeout_seconds.map(Duration::from_secs),
            model: config.model.clone(),
        }
    }
}

/// The executor's report for a completed run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Whether the command completed successfully.
    pub success: bool,
    /// Cost of the run in USD, if the runner reports one.
    pub cost_usd: Option<f64>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: Option<u64>,
    /// Error message when `success` is false.
    pub error: Option<String>,
}

/// Events surfaced by an executor while a run is in flight.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// The runner has opened an agent session for this run.
    SessionStarted {
        /// The runner's session identifier.
        session_id: String,
    },
}

/// Observer for [`ExecutorEvent`]s.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    /// Handle an event. Implementations must not block for long.
    async fn on_event(&self, event: ExecutorEvent);
}

/// Shared handle to an observer.
pub type SharedObserver = Arc<dyn ExecutionObserver>;

/// Runs a slash command to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute the command described by `request`.
    ///
    /// Returns an [`ExecutionReport`] when the runner produced a result
    /// (successful or not), or an [`ExecutorError`] when the runner itself
    /// failed. Implementations enforce `request.timeout` themselves and are
    /// expected to be promptly cancellable at their await points.
    async fn run(
        &self,
        request: ExecutionRequest,
        observer: Option<SharedObserver>,
    ) -> Result<ExecutionReport, ExecutorError>;
}
