//! Liveness and the global status surface.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::scheduler::SchedulerSnapshot;
use crate::tenancy::TenantSnapshot;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub scheduler: SchedulerSnapshot,
    pub tenant_manager: TenantSnapshot,
}

/// GET /v1/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /v1/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        scheduler: state.system.scheduler().snapshot(),
        tenant_manager: state.system.tenants().snapshot(),
    })
}
