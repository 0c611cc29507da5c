//! Per-job queries, cancellation, and result download.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::JobErrorKind;
use crate::models::job::Job;
use crate::models::states::JobStatus;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::{require_user_id, AppState};

/// Job view returned from every job query.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub branch_id: String,
    pub position: usize,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub tiles_processed: u64,
    pub tiles_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<JobErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result_available: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            workflow_id: job.workflow_id,
            branch_id: job.branch_id.clone(),
            position: job.position,
            job_type: job.job_type.clone(),
            status: job.status,
            progress_percent: job.progress_percent,
            tiles_processed: job.tiles_processed,
            tiles_total: job.tiles_total,
            error_kind: job.error_kind,
            error_message: job.error_message.clone(),
            result_available: job.status == JobStatus::Succeeded && job.result.is_some(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// GET /v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let user_id = require_user_id(&headers)?;
    let job = owned_job(&state, job_id, &user_id)?;
    Ok(Json(JobResponse::from(&job)))
}

/// POST /v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let user_id = require_user_id(&headers)?;
    owned_job(&state, job_id, &user_id)?;

    let job = state.system.scheduler().cancel_job(job_id)?;
    Ok(Json(JobResponse::from(&job)))
}

/// GET /v1/jobs/{job_id}/result
///
/// 404 until the job SUCCEEDED and its runner attached a result handle;
/// then the handle's JSON contents.
pub async fn get_job_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = require_user_id(&headers)?;
    let job = owned_job(&state, job_id, &user_id)?;

    if job.status != JobStatus::Succeeded {
        return Err(ApiError::NotFound);
    }
    let handle = job.result.ok_or(ApiError::NotFound)?;

    match tokio::fs::read(&handle.location).await {
        Ok(contents) => Ok((
            [(header::CONTENT_TYPE, "application/json")],
            contents,
        )
            .into_response()),
        Err(e) => {
            warn!(job_id = %job_id, location = %handle.location, error = %e, "Result file unreadable");
            Err(ApiError::NotFound)
        }
    }
}

fn owned_job(state: &AppState, job_id: Uuid, user_id: &str) -> ApiResult<Job> {
    let job = state.system.jobs().get(job_id).ok_or(ApiError::NotFound)?;
    if job.user_id != user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(job)
}
