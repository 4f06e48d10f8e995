//! API request handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::scheduler::{ScheduleStatus, Scheduler};

use super::errors::ApiError;
use super::responses::{CancelOutcome, CancelResponse, HealthResponse};

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get schedule status and job runtime information.
pub async fn get_schedule_status(State(state): State<ApiState>) -> Json<ScheduleStatus> {
    Json(state.scheduler.get_status().await)
}

/// Cancel a running scheduled job.
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    if !state.scheduler.has_job(&job_id).await {
        return Err(ApiError::NotFound(format!("Job '{}' not found", job_id)));
    }

    let cancelled = state.scheduler.cancel(&job_id).await;
    let status = if cancelled {
        CancelOutcome::Cancelled
    } else {
        CancelOutcome::NotRunning
    };

    tracing::info!(job_id = %job_id, status = ?status, "Schedule job cancel requested");

    Ok(Json(CancelResponse { status }))
}
