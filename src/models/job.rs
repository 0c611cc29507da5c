use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobErrorKind;
use crate::models::states::JobStatus;

/// Opaque handle to a runner-produced result artifact.
///
/// The core never interprets the location; the API adapter reads it when
/// serving result downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultHandle {
    /// Filesystem path (or other runner-defined locator) of the result.
    pub location: String,
}

impl ResultHandle {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// One schedulable unit: a single runner invocation within a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub branch_id: String,
    /// 0-based position within the branch; position N waits on N-1.
    pub position: usize,
    pub user_id: String,

    /// Opaque type tag resolved against the runner registry at submission.
    pub job_type: String,
    pub input_image_path: String,
    pub params: serde_json::Value,

    pub status: JobStatus,
    pub progress_percent: f64,
    pub tiles_processed: u64,
    pub tiles_total: u64,

    pub result: Option<ResultHandle>,
    pub error_kind: Option<JobErrorKind>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        workflow_id: Uuid,
        branch_id: impl Into<String>,
        position: usize,
        user_id: impl Into<String>,
        spec: &JobSpec,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            branch_id: branch_id.into(),
            position,
            user_id: user_id.into(),
            job_type: spec.job_type.clone(),
            input_image_path: spec.input_image_path.clone(),
            params: spec.params.clone(),
            status: JobStatus::Pending,
            progress_percent: 0.0,
            tiles_processed: 0,
            tiles_total: 0,
            result: None,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One job entry inside a submitted DAG branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    pub input_image_path: String,
    #[serde(default)]
    pub params: serde_json::Value,
}
