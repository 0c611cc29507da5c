//! In-memory workflow store and progress aggregation.
//!
//! Recomputes counters, mean progress, and aggregate status whenever one of
//! a workflow's jobs changes, publishing on the workflow topic when the
//! aggregate moves. Terminal status is write-once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::events::{workflow_topic, Event, EventBus};
use crate::models::job::Job;
use crate::models::workflow::{derive_progress, derive_status, JobCounters, Workflow, WorkflowDag};
use crate::registry::runner_registry::RunnerRegistry;

pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    bus: Arc<EventBus>,
}

impl WorkflowRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn create(&self, workflow: Workflow) {
        let event = workflow_event(&workflow);
        let topic = workflow_topic(workflow.id);
        let mut workflows = self.workflows.write();
        workflows.insert(workflow.id, workflow);
        self.bus.publish(&topic, event);
    }

    pub fn get(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.read().get(&id).cloned()
    }

    /// All workflows owned by `user_id`, oldest first.
    pub fn list_for_user(&self, user_id: &str) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workflows
    }

    /// Non-terminal workflows for the scheduler survey, oldest first.
    pub fn non_terminal_for_user(&self, user_id: &str) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .read()
            .values()
            .filter(|w| w.user_id == user_id && !w.status.is_terminal())
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workflows
    }

    /// Mark cancellation requested. Idempotent; returns whether this call
    /// set the flag.
    pub fn request_cancel(&self, id: Uuid) -> Result<bool> {
        let mut workflows = self.workflows.write();
        let workflow = workflows.get_mut(&id).ok_or(CoreError::UnknownWorkflow(id))?;
        if workflow.cancel_requested {
            return Ok(false);
        }
        workflow.cancel_requested = true;
        Ok(true)
    }

    /// Re-derive the aggregate from the owned jobs.
    ///
    /// Publishes a workflow event when the aggregate changed. A workflow
    /// that already reached a terminal status is never rewritten.
    pub fn recompute(&self, id: Uuid, jobs: &[Job]) -> Result<Workflow> {
        let mut workflows = self.workflows.write();
        let workflow = workflows.get_mut(&id).ok_or(CoreError::UnknownWorkflow(id))?;

        if workflow.status.is_terminal() {
            return Ok(workflow.clone());
        }

        let counters = JobCounters::tally(jobs);
        let status = derive_status(&counters);
        let progress = derive_progress(jobs);

        let changed = workflow.counters != counters
            || workflow.status != status
            || (workflow.progress_percent - progress).abs() > f64::EPSILON;

        workflow.counters = counters;
        workflow.progress_percent = progress;
        workflow.status = status;
        if status.is_terminal() && workflow.finished_at.is_none() {
            workflow.finished_at = Some(Utc::now());
        }

        let snapshot = workflow.clone();
        // Published under the lock so concurrent recomputes cannot reorder
        // aggregate events on the topic.
        if changed {
            self.bus
                .publish(&workflow_topic(id), workflow_event(&snapshot));
        }
        Ok(snapshot)
    }
}

/// Build the bus event for a workflow's current aggregate.
pub fn workflow_event(workflow: &Workflow) -> Event {
    Event::WorkflowProgress {
        workflow_id: workflow.id,
        status: workflow.status,
        progress_percent: workflow.progress_percent,
        completed_jobs: workflow.counters.succeeded,
        failed_jobs: workflow.counters.failed,
        total_jobs: workflow.counters.total,
        timestamp: Utc::now(),
    }
}

/// Validate a submitted DAG against the runner registry.
///
/// Rejections happen before any state is created: at least one branch,
/// no empty branch, every type tag registered, every input reference
/// non-empty.
pub fn validate_dag(dag: &WorkflowDag, runners: &RunnerRegistry) -> Result<()> {
    if dag.branches.is_empty() {
        return Err(CoreError::InvalidDag("DAG has no branches".to_string()));
    }
    for (branch_id, specs) in &dag.branches {
        if branch_id.trim().is_empty() {
            return Err(CoreError::InvalidDag("Branch id is empty".to_string()));
        }
        if specs.is_empty() {
            return Err(CoreError::InvalidDag(format!(
                "Branch '{branch_id}' has no jobs"
            )));
        }
        for (position, spec) in specs.iter().enumerate() {
            if !runners.contains(&spec.job_type) {
                return Err(CoreError::InvalidDag(format!(
                    "Branch '{branch_id}' position {position}: unknown job type '{}'",
                    spec.job_type
                )));
            }
            if spec.input_image_path.trim().is_empty() {
                return Err(CoreError::InvalidDag(format!(
                    "Branch '{branch_id}' position {position}: empty input reference"
                )));
            }
        }
    }
    Ok(())
}
