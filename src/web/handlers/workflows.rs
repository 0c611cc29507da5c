//! Workflow submission, queries, and cancellation.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::states::WorkflowStatus;
use crate::models::workflow::{Workflow, WorkflowDag};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::handlers::jobs::JobResponse;
use crate::web::state::{require_user_id, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub dag: WorkflowDag,
}

/// Workflow view returned from every workflow query.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: Uuid,
    pub name: String,
    pub user_id: String,
    pub status: WorkflowStatus,
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowResponse {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name.clone(),
            user_id: workflow.user_id.clone(),
            status: workflow.status,
            total_jobs: workflow.counters.total,
            pending_jobs: workflow.counters.pending,
            running_jobs: workflow.counters.running,
            succeeded_jobs: workflow.counters.succeeded,
            failed_jobs: workflow.counters.failed,
            cancelled_jobs: workflow.counters.cancelled,
            progress_percent: workflow.progress_percent,
            created_at: workflow.created_at,
        }
    }
}

/// POST /v1/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowResponse>)> {
    let user_id = require_user_id(&headers)?;
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Workflow name cannot be empty"));
    }

    info!(user_id = %user_id, name = %request.name, "Workflow submission received");

    let workflow = state
        .system
        .scheduler()
        .submit(&user_id, &request.name, &request.dag)?;

    Ok((StatusCode::CREATED, Json(WorkflowResponse::from(&workflow))))
}

/// GET /v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<WorkflowResponse>>> {
    let user_id = require_user_id(&headers)?;
    let workflows = state.system.workflows().list_for_user(&user_id);
    Ok(Json(workflows.iter().map(WorkflowResponse::from).collect()))
}

/// GET /v1/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowResponse>> {
    let user_id = require_user_id(&headers)?;
    let workflow = owned_workflow(&state, workflow_id, &user_id)?;
    Ok(Json(WorkflowResponse::from(&workflow)))
}

/// GET /v1/workflows/{workflow_id}/jobs
pub async fn list_workflow_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let user_id = require_user_id(&headers)?;
    owned_workflow(&state, workflow_id, &user_id)?;

    let jobs = state.system.jobs().list_by_workflow(workflow_id);
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

/// POST /v1/workflows/{workflow_id}/cancel
pub async fn cancel_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowResponse>> {
    let user_id = require_user_id(&headers)?;
    owned_workflow(&state, workflow_id, &user_id)?;

    let workflow = state.system.scheduler().cancel_workflow(workflow_id)?;
    Ok(Json(WorkflowResponse::from(&workflow)))
}

/// Look up a workflow and enforce ownership.
pub(crate) fn owned_workflow(
    state: &AppState,
    workflow_id: Uuid,
    user_id: &str,
) -> ApiResult<Workflow> {
    let workflow = state
        .system
        .workflows()
        .get(workflow_id)
        .ok_or(ApiError::NotFound)?;
    if workflow.user_id != user_id {
        return Err(ApiError::Forbidden);
    }
    Ok(workflow)
}
