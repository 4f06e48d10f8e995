//! Per-job runtime state and status snapshots.
//!
//! [`JobState`] is the mutable record the scheduler keeps for each
//! configured job. Each state is guarded by its own `tokio::sync::Mutex`;
//! the lock is held only for short field updates, never across an awaited
//! external call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{OverlapPolicy, ScheduleJobConfig};
use crate::core::schedule::Schedule;
use crate::core::types::RunId;

/// Final status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run completed and the executor reported success.
    Success,
    /// The run failed: the command was unknown, the executor failed, or it
    /// reported an unsuccessful result.
    Error,
    /// The run was cancelled while in flight.
    Cancelled,
}

impl RunStatus {
    /// Status name as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a job's in-flight execution task.
#[derive(Debug)]
pub struct RunningTask {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Join handle for the spawned execution task.
    pub handle: JoinHandle<()>,
    /// Token the run observes for cooperative cancellation.
    pub cancel: CancellationToken,
}

impl RunningTask {
    /// Whether the task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// In-memory runtime state for one scheduled job.
#[derive(Debug)]
pub struct JobState {
    /// Current configuration, replaced wholesale on reload.
    pub config: ScheduleJobConfig,
    /// Compiled schedule for `config.cron` in the engine timezone.
    pub schedule: Schedule,
    /// Next scheduled fire time; `None` exactly when the job is disabled.
    pub next_run: Option<DateTime<Utc>>,
    /// When the job last became due.
    pub last_scheduled_at: Option<DateTime<Utc>>,
    /// When the last run started.
    pub last_started_at: Option<DateTime<Utc>>,
    /// When the last run finished.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Status of the last finished run.
    pub last_status: Option<RunStatus>,
    /// Error message of the last finished run, if any.
    pub last_error: Option<String>,
    /// Cost of the last finished run, if reported.
    pub last_cost_usd: Option<f64>,
    /// Duration of the last finished run, if reported.
    pub last_duration_ms: Option<u64>,
    /// The currently running execution task, if any.
    pub running: Option<RunningTask>,
    /// Pending runs queued behind the active one.
    pub queued_runs: u32,
    /// Occurrences dropped by the overlap policy.
    pub skipped_runs: u64,
    /// Total runs started.
    pub total_runs: u64,
    /// Total non-success runs.
    pub total_failures: u64,
}

impl JobState {
    /// Create a fresh state for a newly configured job.
    pub fn new(
        config: ScheduleJobConfig,
        schedule: Schedule,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            config,
            schedule,
            next_run,
            last_scheduled_at: None,
            last_started_at: None,
            last_finished_at: None,
            last_status: None,
            last_error: None,
            last_cost_usd: None,
            last_duration_ms: None,
            running: None,
            queued_runs: 0,
            skipped_runs: 0,
            total_runs: 0,
            total_failures: 0,
        }
    }

    /// Whether an execution task is currently active.
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(RunningTask::is_active)
    }

    /// Build a read-only snapshot of this state as of `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> JobStatus {
        let is_running = self.is_running();
        let elapsed_seconds = match (is_running, self.last_started_at) {
            (true, Some(started)) => Some((now - started).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        JobStatus {
            id: self.config.id.clone(),
            command: self.config.command.clone(),
            arguments: self.config.arguments.clone(),
            cron: self.config.cron.clone(),
            enabled: self.config.enabled,
            overlap: self.config.overlap,
            queue_max: self.config.queue_max,
            queued_runs: self.queued_runs,
            skipped_runs: self.skipped_runs,
            total_runs: self.total_runs,
            total_failures: self.total_failures,
            is_running,
            started_at: self.last_started_at,
            elapsed_seconds,
            last_finished_at: self.last_finished_at,
            last_status: self.last_status,
            last_error: self.last_error.clone(),
            last_cost_usd: self.last_cost_usd,
            last_duration_ms: self.last_duration_ms,
            next_run: self.next_run,
            timeout_seconds: self.config.timeout_seconds,
            max_budget_usd: self.config.max_budget_usd,
            model: self.config.model.clone(),
            use_vault_lock: self.config.use_vault_lock,
        }
    }
}

/// Read-only runtime status for one scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub command: String,
    pub arguments: Option<String>,
    pub cron: String,
    pub enabled: bool,
    pub overlap: OverlapPolicy,
    pub queue_max: u32,
    pub queued_runs: u32,
    pub skipped_runs: u64,
    pub total_runs: u64,
    pub total_failures: u64,
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: Option<f64>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub last_cost_usd: Option<f64>,
    pub last_duration_ms: Option<u64>,
    pub next_run: Option<DateTime<Utc>>,
    pub timeout_seconds: Option<u64>,
    pub max_budget_usd: Option<f64>,
    pub model: Option<String>,
    pub use_vault_lock: bool,
}

/// Full scheduler status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// Timezone cron expressions are evaluated in.
    pub timezone: String,
    /// Path of the schedule configuration file.
    pub config_path: String,
    /// Error from the most recent failed reload, if the active config is
    /// older than the file on disk.
    pub config_error: Option<String>,
    /// Per-job runtime status.
    pub jobs: Vec<JobStatus>,
}
