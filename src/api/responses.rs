//! API response types.
//!
//! The status endpoint serves [`crate::scheduler::ScheduleStatus`] directly;
//! only the control responses live here.

use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" when the server is responding.
    pub status: String,
    /// Crate version.
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// A running task was stopped.
    Cancelled,
    /// The job exists but had no running task.
    NotRunning,
}

/// Response for cancelling a scheduled job.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub status: CancelOutcome,
}
