use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobSpec};
use crate::models::states::{JobStatus, WorkflowStatus};

/// Submitted workflow shape: branch id -> ordered job specs.
///
/// Branch ids are unique by construction; lexicographic branch order is the
/// deterministic dispatch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDag {
    pub branches: BTreeMap<String, Vec<JobSpec>>,
}

/// Per-status job counts, derived from the owned jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobCounters {
    pub fn tally(jobs: &[Job]) -> Self {
        let mut counters = Self {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => counters.pending += 1,
                JobStatus::Running => counters.running += 1,
                JobStatus::Succeeded => counters.succeeded += 1,
                JobStatus::Failed => counters.failed += 1,
                JobStatus::Cancelled => counters.cancelled += 1,
            }
        }
        counters
    }

    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// A named, user-owned unit of work composed of independent branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,

    /// Branch id -> job ids in execution order.
    pub branches: BTreeMap<String, Vec<Uuid>>,

    pub status: WorkflowStatus,
    pub counters: JobCounters,
    pub progress_percent: f64,
    pub cancel_requested: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            branches: BTreeMap::new(),
            status: WorkflowStatus::Pending,
            counters: JobCounters::default(),
            progress_percent: 0.0,
            cancel_requested: false,
            finished_at: None,
        }
    }
}

/// Derive the aggregate status from per-status counts.
///
/// Terminal only when every job is terminal: FAILED dominates, then
/// CANCELLED, else SUCCEEDED. Non-terminal: PENDING until any job has left
/// PENDING.
pub fn derive_status(counters: &JobCounters) -> WorkflowStatus {
    if counters.total == 0 {
        return WorkflowStatus::Pending;
    }
    if counters.all_terminal() {
        if counters.failed > 0 {
            WorkflowStatus::Failed
        } else if counters.cancelled > 0 {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Succeeded
        }
    } else if counters.pending == counters.total {
        WorkflowStatus::Pending
    } else {
        WorkflowStatus::Running
    }
}

/// Mean job progress across the workflow, in [0, 100].
pub fn derive_progress(jobs: &[Job]) -> f64 {
    if jobs.is_empty() {
        return 0.0;
    }
    jobs.iter().map(|j| j.progress_percent).sum::<f64>() / jobs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSpec;

    fn job_with_status(status: JobStatus, progress: f64) -> Job {
        let spec = JobSpec {
            job_type: "SEGMENTATION".to_string(),
            input_image_path: "slide.svs".to_string(),
            params: serde_json::Value::Null,
        };
        let mut job = Job::new(Uuid::new_v4(), "main", 0, "u1", &spec);
        job.status = status;
        job.progress_percent = progress;
        job
    }

    #[test]
    fn test_counter_sum_equals_total() {
        let jobs = vec![
            job_with_status(JobStatus::Succeeded, 100.0),
            job_with_status(JobStatus::Running, 50.0),
            job_with_status(JobStatus::Pending, 0.0),
        ];
        let counters = JobCounters::tally(&jobs);
        assert_eq!(counters.total, 3);
        assert_eq!(
            counters.pending
                + counters.running
                + counters.succeeded
                + counters.failed
                + counters.cancelled,
            counters.total
        );
    }

    #[test]
    fn test_status_derivation() {
        let all_pending = JobCounters::tally(&[
            job_with_status(JobStatus::Pending, 0.0),
            job_with_status(JobStatus::Pending, 0.0),
        ]);
        assert_eq!(derive_status(&all_pending), WorkflowStatus::Pending);

        let mixed = JobCounters::tally(&[
            job_with_status(JobStatus::Succeeded, 100.0),
            job_with_status(JobStatus::Pending, 0.0),
        ]);
        assert_eq!(derive_status(&mixed), WorkflowStatus::Running);

        let failed = JobCounters::tally(&[
            job_with_status(JobStatus::Failed, 10.0),
            job_with_status(JobStatus::Cancelled, 0.0),
            job_with_status(JobStatus::Succeeded, 100.0),
        ]);
        assert_eq!(derive_status(&failed), WorkflowStatus::Failed);

        let cancelled = JobCounters::tally(&[
            job_with_status(JobStatus::Cancelled, 40.0),
            job_with_status(JobStatus::Succeeded, 100.0),
        ]);
        assert_eq!(derive_status(&cancelled), WorkflowStatus::Cancelled);

        let succeeded = JobCounters::tally(&[
            job_with_status(JobStatus::Succeeded, 100.0),
            job_with_status(JobStatus::Succeeded, 100.0),
        ]);
        assert_eq!(derive_status(&succeeded), WorkflowStatus::Succeeded);
    }

    #[test]
    fn test_progress_is_mean_of_jobs() {
        let jobs = vec![
            job_with_status(JobStatus::Succeeded, 100.0),
            job_with_status(JobStatus::Running, 50.0),
            job_with_status(JobStatus::Pending, 0.0),
        ];
        assert!((derive_progress(&jobs) - 50.0).abs() < f64::EPSILON);
        assert_eq!(derive_progress(&[]), 0.0);
    }
}
