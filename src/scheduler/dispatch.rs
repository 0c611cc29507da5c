//! Coordinator loop: survey, order, launch, finish.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::JobErrorKind;
use crate::models::job::Job;
use crate::models::states::JobStatus;
use crate::runner::{JobView, ProgressSink, RunOutcome};

use super::{Completion, Scheduler};

impl Scheduler {
    /// Run the coordinator until shutdown. Spawn once per system.
    pub async fn run(self: Arc<Self>) {
        let Some(mut completions) = self.completion_rx.lock().take() else {
            warn!("Scheduler coordinator already running");
            return;
        };

        info!(
            max_workers = self.config.max_workers,
            "Scheduler coordinator started"
        );

        loop {
            self.dispatch_ready();

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler coordinator stopped");
                    break;
                }
                _ = self.wakeup.notified() => {}
                Some(completion) = completions.recv() => {
                    self.finish_job(completion);
                    // Apply everything already queued before re-surveying.
                    while let Ok(completion) = completions.try_recv() {
                        self.finish_job(completion);
                    }
                }
            }
        }
    }

    /// Launch ready jobs while permits and ready work both remain.
    fn dispatch_ready(&self) {
        while !self.shutdown.is_cancelled() {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(job) = self.next_ready_job() else {
                break;
            };
            self.launch(job, permit);
        }
    }

    /// The first ready job in deterministic order: tenants by admission,
    /// workflows by creation, branches lexicographically, positions in
    /// branch order. One head per branch keeps branches round-robined as
    /// permits free up.
    fn next_ready_job(&self) -> Option<Job> {
        for user_id in self.tenants.active_ordered() {
            for workflow in self.workflows.non_terminal_for_user(&user_id) {
                if workflow.cancel_requested {
                    continue;
                }
                let jobs: HashMap<Uuid, Job> = self
                    .jobs
                    .list_by_workflow(workflow.id)
                    .into_iter()
                    .map(|job| (job.id, job))
                    .collect();

                for job_ids in workflow.branches.values() {
                    if let Some(job) = branch_head(job_ids, &jobs) {
                        return Some(job);
                    }
                }
            }
        }
        None
    }

    /// Transition to RUNNING and hand the job to its runner on a worker
    /// task. The permit travels with the worker and frees on completion;
    /// an inner spawn isolates runner panics as `RUNNER_CRASH`.
    fn launch(&self, job: Job, permit: OwnedSemaphorePermit) {
        let token = self.shutdown.child_token();
        self.cancel_tokens.lock().insert(job.id, token.clone());

        let running = match self.jobs.update_status(job.id, JobStatus::Running) {
            Ok(job) => job,
            Err(e) => {
                // Cancelled between survey and launch.
                debug!(job_id = %job.id, error = %e, "Launch aborted");
                self.cancel_tokens.lock().remove(&job.id);
                return;
            }
        };

        let workflow_jobs = self.jobs.list_by_workflow(running.workflow_id);
        if let Err(e) = self.workflows.recompute(running.workflow_id, &workflow_jobs) {
            error!(workflow_id = %running.workflow_id, error = %e, "Aggregate refresh failed");
        }

        info!(
            job_id = %running.id,
            workflow_id = %running.workflow_id,
            branch_id = %running.branch_id,
            position = running.position,
            job_type = %running.job_type,
            "Job dispatched"
        );

        let job_id = running.id;
        let workflow_id = running.workflow_id;
        let user_id = running.user_id.clone();
        let completions = self.completion_tx.clone();

        let Some(runner) = self.runners.resolve(&running.job_type) else {
            // The DAG was validated against the registry at submission, so
            // this only happens if init wired an incomplete registry.
            error!(job_type = %running.job_type, "No runner registered, failing job");
            drop(permit);
            let _ = completions.send(Completion {
                job_id,
                workflow_id,
                user_id,
                outcome: RunOutcome::Failed {
                    kind: JobErrorKind::RunnerCrash,
                    message: format!("No runner registered for type '{}'", running.job_type),
                },
            });
            return;
        };

        let view = JobView::from(&running);
        let sink = ProgressSink::new(
            job_id,
            workflow_id,
            Arc::clone(&self.jobs),
            Arc::clone(&self.workflows),
        );

        tokio::spawn(async move {
            let runner_task = tokio::spawn({
                let token = token.clone();
                async move { runner.run(view, sink, token).await }
            });
            let outcome = match runner_task.await {
                Ok(outcome) => outcome,
                Err(join_error) => RunOutcome::Failed {
                    kind: JobErrorKind::RunnerCrash,
                    message: format!("Runner terminated abnormally: {join_error}"),
                },
            };
            drop(permit);
            let _ = completions.send(Completion {
                job_id,
                workflow_id,
                user_id,
                outcome,
            });
        });

        self.publish_system_snapshot();
    }

    /// Apply a runner outcome: terminal transition, branch drain on a
    /// broken prerequisite chain, aggregate refresh, tenant accounting.
    fn finish_job(&self, completion: Completion) {
        let Completion {
            job_id,
            workflow_id,
            user_id,
            outcome,
        } = completion;

        let cancel_requested = self
            .cancel_tokens
            .lock()
            .remove(&job_id)
            .map(|token| token.is_cancelled())
            .unwrap_or(false);

        let Some(job) = self.jobs.get(job_id) else {
            warn!(job_id = %job_id, "Completion for unknown job");
            return;
        };
        if job.status != JobStatus::Running {
            debug!(job_id = %job_id, status = %job.status, "Completion for finalized job");
            return;
        }

        // Cancellation wins over a late success; the partial result is
        // discarded.
        let outcome = match outcome {
            RunOutcome::Succeeded { .. } if cancel_requested => RunOutcome::Cancelled,
            other => other,
        };

        let mut drained = 0usize;
        match outcome {
            RunOutcome::Succeeded { result } => {
                if let Some(handle) = result {
                    if let Err(e) = self.jobs.set_result(job_id, handle) {
                        error!(job_id = %job_id, error = %e, "Failed to attach result");
                    }
                }
                match self.jobs.update_status(job_id, JobStatus::Succeeded) {
                    Ok(_) => {
                        info!(job_id = %job_id, "Job succeeded");
                        drained += 1;
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "Success transition failed"),
                }
            }
            RunOutcome::Failed { kind, message } => {
                warn!(job_id = %job_id, kind = %kind, error = %message, "Job failed");
                if let Err(e) = self.jobs.set_error(job_id, kind, message) {
                    error!(job_id = %job_id, error = %e, "Failed to record error");
                }
                match self.jobs.update_status(job_id, JobStatus::Failed) {
                    Ok(_) => drained += 1,
                    Err(e) => error!(job_id = %job_id, error = %e, "Failure transition failed"),
                }
                drained += self.drain_branch(workflow_id, &job.branch_id, job.position);
            }
            RunOutcome::Cancelled => {
                if job.error_kind.is_none() {
                    if let Err(e) = self.jobs.set_error(
                        job_id,
                        JobErrorKind::CancelledByRequest,
                        "Cancelled by user request",
                    ) {
                        error!(job_id = %job_id, error = %e, "Failed to record cancel reason");
                    }
                }
                match self.jobs.update_status(job_id, JobStatus::Cancelled) {
                    Ok(_) => {
                        info!(job_id = %job_id, "Job cancelled");
                        drained += 1;
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "Cancel transition failed"),
                }
                // Successors can no longer satisfy their prerequisite.
                drained += self.drain_branch(workflow_id, &job.branch_id, job.position);
            }
        }

        let workflow_jobs = self.jobs.list_by_workflow(workflow_id);
        if let Err(e) = self.workflows.recompute(workflow_id, &workflow_jobs) {
            error!(workflow_id = %workflow_id, error = %e, "Aggregate refresh failed");
        }

        for _ in 0..drained {
            self.tenants.on_job_terminal(&user_id);
        }
        self.publish_system_snapshot();
    }
}

/// The branch's ready head: the first job not yet SUCCEEDED, if it is
/// PENDING. A RUNNING head means the branch is busy; a FAILED or CANCELLED
/// head means the branch is drained or about to be.
fn branch_head(job_ids: &[Uuid], jobs: &HashMap<Uuid, Job>) -> Option<Job> {
    for job_id in job_ids {
        let job = jobs.get(job_id)?;
        match job.status {
            JobStatus::Succeeded => continue,
            JobStatus::Pending => return Some(job.clone()),
            JobStatus::Running | JobStatus::Failed | JobStatus::Cancelled => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSpec;

    fn job_at(position: usize, status: JobStatus) -> Job {
        let spec = JobSpec {
            job_type: "SEGMENTATION".to_string(),
            input_image_path: "slide.svs".to_string(),
            params: serde_json::Value::Null,
        };
        let mut job = Job::new(Uuid::nil(), "main", position, "u1", &spec);
        job.status = status;
        job
    }

    fn index(jobs: &[Job]) -> (Vec<Uuid>, HashMap<Uuid, Job>) {
        let ids = jobs.iter().map(|j| j.id).collect();
        let map = jobs.iter().map(|j| (j.id, j.clone())).collect();
        (ids, map)
    }

    #[test]
    fn test_head_is_first_pending_after_successes() {
        let jobs = vec![
            job_at(0, JobStatus::Succeeded),
            job_at(1, JobStatus::Pending),
            job_at(2, JobStatus::Pending),
        ];
        let (ids, map) = index(&jobs);
        assert_eq!(branch_head(&ids, &map).unwrap().position, 1);
    }

    #[test]
    fn test_busy_branch_has_no_head() {
        let jobs = vec![job_at(0, JobStatus::Running), job_at(1, JobStatus::Pending)];
        let (ids, map) = index(&jobs);
        assert!(branch_head(&ids, &map).is_none());
    }

    #[test]
    fn test_broken_branch_has_no_head() {
        let jobs = vec![job_at(0, JobStatus::Failed), job_at(1, JobStatus::Pending)];
        let (ids, map) = index(&jobs);
        assert!(branch_head(&ids, &map).is_none());
    }

    #[test]
    fn test_finished_branch_has_no_head() {
        let jobs = vec![job_at(0, JobStatus::Succeeded), job_at(1, JobStatus::Succeeded)];
        let (ids, map) = index(&jobs);
        assert!(branch_head(&ids, &map).is_none());
    }
}
