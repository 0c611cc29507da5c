//! The dispatch core.
//!
//! A single coordinator task surveys ready work across admitted tenants,
//! launches runner invocations under the global permit pool, and applies
//! completions back to the registries. Submission and cancellation enter
//! from the API adapter; everything funnels into the coordinator through
//! the registries plus a wake-up notify.

mod dispatch;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::HistoflowConfig;
use crate::error::{CoreError, JobErrorKind, Result};
use crate::events::{Event, EventBus, SYSTEM_TOPIC};
use crate::models::job::Job;
use crate::models::states::JobStatus;
use crate::models::workflow::{JobCounters, Workflow, WorkflowDag};
use crate::registry::workflow_registry::validate_dag;
use crate::registry::{JobRegistry, RunnerRegistry, WorkflowRegistry};
use crate::runner::RunOutcome;
use crate::tenancy::TenantManager;

/// Worker -> coordinator completion message.
pub(crate) struct Completion {
    pub job_id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub running_jobs: usize,
    pub max_workers: usize,
}

pub struct Scheduler {
    pub(crate) config: HistoflowConfig,
    pub(crate) jobs: Arc<JobRegistry>,
    pub(crate) workflows: Arc<WorkflowRegistry>,
    pub(crate) tenants: Arc<TenantManager>,
    pub(crate) runners: Arc<RunnerRegistry>,
    pub(crate) bus: Arc<EventBus>,

    pub(crate) permits: Arc<Semaphore>,
    pub(crate) wakeup: Notify,
    pub(crate) completion_tx: mpsc::UnboundedSender<Completion>,
    pub(crate) completion_rx: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
    pub(crate) cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    pub(crate) shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: HistoflowConfig,
        jobs: Arc<JobRegistry>,
        workflows: Arc<WorkflowRegistry>,
        tenants: Arc<TenantManager>,
        runners: Arc<RunnerRegistry>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            jobs,
            workflows,
            tenants,
            runners,
            bus,
            wakeup: Notify::new(),
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
            cancel_tokens: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Validate and admit a workflow submission.
    ///
    /// Creates the jobs and the workflow, registers the tenant, and wakes
    /// the coordinator. A rejected DAG mutates nothing.
    pub fn submit(
        &self,
        user_id: &str,
        name: &str,
        dag: &WorkflowDag,
    ) -> Result<Workflow> {
        validate_dag(dag, &self.runners)?;

        let mut workflow = Workflow::new(name, user_id);
        let mut branches: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        let mut jobs: Vec<Job> = Vec::new();

        for (branch_id, specs) in &dag.branches {
            let mut ids = Vec::with_capacity(specs.len());
            for (position, spec) in specs.iter().enumerate() {
                let job = Job::new(workflow.id, branch_id.clone(), position, user_id, spec);
                ids.push(job.id);
                jobs.push(job);
            }
            branches.insert(branch_id.clone(), ids);
        }

        let total = jobs.len();
        workflow.branches = branches;
        workflow.counters = JobCounters {
            total,
            pending: total,
            ..Default::default()
        };

        // Jobs land before the workflow and the workflow before the tenant
        // registration, so the survey never observes a half-built workflow.
        for job in jobs {
            self.jobs.create(job);
        }
        self.workflows.create(workflow.clone());
        let admission = self.tenants.register(user_id, workflow.id, total);

        info!(
            workflow_id = %workflow.id,
            user_id,
            name,
            total_jobs = total,
            admission = ?admission,
            "Workflow submitted"
        );

        self.wakeup.notify_one();
        Ok(workflow)
    }

    /// Cancel a workflow: PENDING jobs drop to CANCELLED immediately,
    /// RUNNING jobs get their cancel token signalled. Idempotent.
    pub fn cancel_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .ok_or(CoreError::UnknownWorkflow(workflow_id))?;
        self.workflows.request_cancel(workflow_id)?;

        let mut drained = 0usize;
        for job in self.jobs.list_by_workflow(workflow_id) {
            match job.status {
                JobStatus::Pending => {
                    if let Err(e) = self.jobs.set_error(
                        job.id,
                        JobErrorKind::CancelledByRequest,
                        "Cancelled by user request",
                    ) {
                        error!(job_id = %job.id, error = %e, "Failed to record cancel reason");
                    }
                    match self.jobs.update_status(job.id, JobStatus::Cancelled) {
                        Ok(_) => drained += 1,
                        // Lost the race to a launch; it is running now.
                        Err(_) => self.signal_cancel(job.id),
                    }
                }
                JobStatus::Running => self.signal_cancel(job.id),
                _ => {}
            }
        }

        let jobs = self.jobs.list_by_workflow(workflow_id);
        let snapshot = self.workflows.recompute(workflow_id, &jobs)?;

        for _ in 0..drained {
            self.tenants.on_job_terminal(&workflow.user_id);
        }

        info!(
            workflow_id = %workflow_id,
            drained,
            status = %snapshot.status,
            "Workflow cancellation requested"
        );
        self.publish_system_snapshot();
        self.wakeup.notify_one();
        Ok(snapshot)
    }

    /// Cancel a single PENDING job.
    ///
    /// Later positions in the same branch can never satisfy their
    /// prerequisite once this job is cancelled, so they are drained with
    /// `SKIPPED_DUE_TO_PREDECESSOR`. Cancelling a RUNNING or terminal job
    /// is rejected; workflow-level cancellation covers those.
    pub fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let job = self.jobs.get(job_id).ok_or(CoreError::UnknownJob(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(CoreError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                to: JobStatus::Cancelled.to_string(),
            });
        }

        if let Err(e) = self.jobs.set_error(
            job_id,
            JobErrorKind::CancelledByRequest,
            "Cancelled by user request",
        ) {
            error!(job_id = %job_id, error = %e, "Failed to record cancel reason");
        }
        let updated = self.jobs.update_status(job_id, JobStatus::Cancelled)?;
        let mut drained = 1usize;
        drained += self.drain_branch(job.workflow_id, &job.branch_id, job.position);

        let jobs = self.jobs.list_by_workflow(job.workflow_id);
        if let Err(e) = self.workflows.recompute(job.workflow_id, &jobs) {
            error!(workflow_id = %job.workflow_id, error = %e, "Aggregate refresh failed");
        }
        for _ in 0..drained {
            self.tenants.on_job_terminal(&job.user_id);
        }

        info!(job_id = %job_id, drained, "Job cancelled");
        self.publish_system_snapshot();
        self.wakeup.notify_one();
        Ok(updated)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            running_jobs: self.jobs.count_running(),
            max_workers: self.config.max_workers,
        }
    }

    /// Stop the coordinator and signal every running job's cancel token.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        for token in self.cancel_tokens.lock().values() {
            token.cancel();
        }
        self.shutdown.cancel();
    }

    pub(crate) fn signal_cancel(&self, job_id: Uuid) {
        if let Some(token) = self.cancel_tokens.lock().get(&job_id) {
            token.cancel();
        }
    }

    /// Drop later PENDING positions of a branch whose prerequisite chain
    /// broke at `after`.
    pub(crate) fn drain_branch(
        &self,
        workflow_id: Uuid,
        branch_id: &str,
        after: usize,
    ) -> usize {
        let mut drained = 0;
        for sibling in self.jobs.list_by_workflow(workflow_id) {
            if sibling.branch_id != branch_id
                || sibling.position <= after
                || sibling.status != JobStatus::Pending
            {
                continue;
            }
            if let Err(e) = self.jobs.set_error(
                sibling.id,
                JobErrorKind::SkippedDueToPredecessor,
                format!("Job at position {after} in branch '{branch_id}' did not succeed"),
            ) {
                error!(job_id = %sibling.id, error = %e, "Failed to record skip reason");
            }
            match self.jobs.update_status(sibling.id, JobStatus::Cancelled) {
                Ok(_) => drained += 1,
                Err(e) => error!(job_id = %sibling.id, error = %e, "Branch drain transition failed"),
            }
        }
        drained
    }

    pub(crate) fn publish_system_snapshot(&self) {
        let tenants = self.tenants.snapshot();
        self.bus.publish(
            SYSTEM_TOPIC,
            Event::SystemStatus {
                running_jobs: self.jobs.count_running(),
                max_workers: self.config.max_workers,
                active_users: tenants.active_users,
                queued_users: tenants.queued_users,
                max_active_users: tenants.max_active_users,
                timestamp: Utc::now(),
            },
        );
    }
}
