//! The contract between the scheduling core and job executors.
//!
//! Concrete runners (tiling, tissue masking, segmentation) live outside the
//! core; the scheduler only guarantees at most one `run` call in flight per
//! job and treats each invocation as a single unit. Runners are trusted to
//! poll the cancel token between tile batches; the core never force-kills
//! a running job.

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::JobErrorKind;
use crate::models::job::{Job, ResultHandle};
use crate::registry::job_registry::JobRegistry;
use crate::registry::workflow_registry::WorkflowRegistry;

pub use simulated::SimulatedRunner;

/// Read-only projection of a job handed to its runner.
#[derive(Debug, Clone)]
pub struct JobView {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub branch_id: String,
    pub job_type: String,
    pub input_image_path: String,
    pub params: serde_json::Value,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            workflow_id: job.workflow_id,
            branch_id: job.branch_id.clone(),
            job_type: job.job_type.clone(),
            input_image_path: job.input_image_path.clone(),
            params: job.params.clone(),
        }
    }
}

/// How a runner invocation ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Finished normally; `result` is the artifact handle, if any.
    Succeeded { result: Option<ResultHandle> },
    Failed {
        kind: JobErrorKind,
        message: String,
    },
    /// The runner observed the cancel token and stopped.
    Cancelled,
}

impl RunOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: JobErrorKind::RunnerFailed,
            message: message.into(),
        }
    }
}

/// Executes one job. Implementations may use any internal concurrency.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        job: JobView,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> RunOutcome;
}

/// Write-side of job progress, wired to the registries.
///
/// Updates are clamped to [0, 100] and monotonic while the job is RUNNING;
/// event publication is coalesced by the job registry so chatty runners do
/// not flood subscribers.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: Uuid,
    workflow_id: Uuid,
    jobs: Arc<JobRegistry>,
    workflows: Arc<WorkflowRegistry>,
}

impl ProgressSink {
    pub fn new(
        job_id: Uuid,
        workflow_id: Uuid,
        jobs: Arc<JobRegistry>,
        workflows: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            job_id,
            workflow_id,
            jobs,
            workflows,
        }
    }

    pub fn update(&self, percent: f64, tiles_processed: u64, tiles_total: u64) {
        match self
            .jobs
            .update_progress(self.job_id, percent, tiles_processed, tiles_total)
        {
            Ok(true) => {
                // A job event went out; refresh the workflow aggregate at
                // the same coalesced cadence.
                let jobs = self.jobs.list_by_workflow(self.workflow_id);
                if let Err(e) = self.workflows.recompute(self.workflow_id, &jobs) {
                    debug!(workflow_id = %self.workflow_id, error = %e, "Aggregate refresh skipped");
                }
            }
            Ok(false) => {}
            Err(e) => {
                // Progress racing a terminal transition is expected around
                // cancellation; nothing to do.
                debug!(job_id = %self.job_id, error = %e, "Progress update dropped");
            }
        }
    }
}
