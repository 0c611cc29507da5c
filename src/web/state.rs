use std::sync::Arc;

use axum::http::HeaderMap;

use crate::system::SchedulerSystem;
use crate::web::errors::{ApiError, ApiResult};

/// Shared state for all request handlers: the injected core.
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<SchedulerSystem>,
}

/// Caller identity from the `X-User-ID` header.
///
/// Authentication beyond this header is out of scope; the header is
/// required on every user-facing route.
pub fn require_user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("X-User-ID")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.to_string())
        .ok_or(ApiError::MissingUserHeader)
}
