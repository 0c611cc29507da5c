//! Thin HTTP/WebSocket boundary over the scheduling core.

pub mod errors;
pub mod handlers;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::system::SchedulerSystem;
use self::handlers::{health, jobs, workflows};
use self::state::AppState;

pub fn router(system: Arc<SchedulerSystem>) -> Router {
    let state = AppState { system };

    Router::new()
        .route(
            "/v1/workflows",
            post(workflows::create_workflow).get(workflows::list_workflows),
        )
        .route("/v1/workflows/{workflow_id}", get(workflows::get_workflow))
        .route(
            "/v1/workflows/{workflow_id}/jobs",
            get(workflows::list_workflow_jobs),
        )
        .route(
            "/v1/workflows/{workflow_id}/cancel",
            post(workflows::cancel_workflow),
        )
        .route("/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/v1/jobs/{job_id}/result", get(jobs::get_job_result))
        .route("/v1/status", get(health::status))
        .route("/v1/health", get(health::health))
        .route("/v1/ws/workflows/{workflow_id}", get(ws::workflow_events))
        .route("/v1/ws/jobs/{job_id}", get(ws::job_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
