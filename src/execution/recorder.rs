//! Post-run recording.
//!
//! After every run (success, error, or cancellation) the scheduler hands a
//! [`CommandRunRecord`] to the configured [`PostRunRecorder`] on a detached
//! task. Recording is best-effort: a recorder failure is logged and never
//! reaches the job's state.

use async_trait::async_trait;
use std::sync::Arc;

use crate::scheduler::RunStatus;

/// The outcome of one scheduled command run.
#[derive(Debug, Clone)]
pub struct CommandRunRecord {
    /// Command name as configured.
    pub command: String,
    /// Final run status.
    pub status: RunStatus,
    /// Runner-reported duration in milliseconds, when available.
    pub duration_ms: Option<u64>,
    /// Scheduler-observed wall-clock duration in seconds.
    pub duration_seconds: f64,
    /// Runner-reported cost in USD, when available.
    pub cost_usd: Option<f64>,
    /// Error message for non-success outcomes.
    pub error: Option<String>,
    /// Always true for runs dispatched by the scheduler.
    pub scheduled: bool,
}

/// Receives run records after each scheduled execution.
#[async_trait]
pub trait PostRunRecorder: Send + Sync {
    /// Record one run. Errors are the implementation's to surface; the
    /// scheduler ignores them.
    async fn record(&self, record: CommandRunRecord);
}

/// A recorder that writes run outcomes to the tracing log.
#[derive(Debug, Default)]
pub struct LogRecorder;

#[async_trait]
impl PostRunRecorder for LogRecorder {
    async fn record(&self, record: CommandRunRecord) {
        tracing::info!(
            command = %record.command,
            status = %record.status,
            duration_seconds = record.duration_seconds,
            cost_usd = record.cost_usd,
            error = record.error.as_deref(),
            "Command run recorded"
        );
    }
}

/// Dispatch a record to the recorder on a detached task.
pub fn dispatch_post_run(recorder: Arc<dyn PostRunRecorder>, record: CommandRunRecord) {
    tokio::spawn(async move {
        recorder.record(record).await;
    });
}
