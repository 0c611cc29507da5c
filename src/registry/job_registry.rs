//! In-memory job store.
//!
//! Owns every `Job` record for the process lifetime. All status changes go
//! through the transition table; terminal states are write-once. Every
//! accepted mutation publishes on the job's topic, with progress events
//! coalesced to the configured minimum percent delta.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, JobErrorKind, Result};
use crate::events::{job_topic, Event, EventBus};
use crate::models::job::{Job, ResultHandle};
use crate::models::states::JobStatus;

struct JobEntry {
    job: Job,
    /// Percent at the last published progress event; starts below zero so
    /// the first update always publishes.
    last_published_percent: f64,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    bus: Arc<EventBus>,
    progress_min_delta: f64,
}

impl JobRegistry {
    pub fn new(bus: Arc<EventBus>, progress_min_delta: f64) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            bus,
            progress_min_delta,
        }
    }

    pub fn create(&self, job: Job) {
        let event = job_event(&job);
        let topic = job_topic(job.id);
        let mut jobs = self.jobs.write();
        jobs.insert(
            job.id,
            JobEntry {
                job,
                last_published_percent: f64::NEG_INFINITY,
            },
        );
        self.bus.publish(&topic, event);
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).map(|e| e.job.clone())
    }

    /// Jobs of one workflow, ordered by (branch, position).
    pub fn list_by_workflow(&self, workflow_id: Uuid) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|e| e.job.workflow_id == workflow_id)
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by(|a, b| {
            a.branch_id
                .cmp(&b.branch_id)
                .then(a.position.cmp(&b.position))
        });
        jobs
    }

    pub fn count_running(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|e| e.job.status == JobStatus::Running)
            .count()
    }

    /// Apply a validated status transition and publish it.
    ///
    /// RUNNING stamps `started_at`; terminal states stamp `finished_at`;
    /// success forces progress to completion.
    pub fn update_status(&self, id: Uuid, target: JobStatus) -> Result<Job> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(CoreError::UnknownJob(id))?;

        if !entry.job.status.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                entity: "job",
                id,
                from: entry.job.status.to_string(),
                to: target.to_string(),
            });
        }

        entry.job.status = target;
        match target {
            JobStatus::Running => entry.job.started_at = Some(Utc::now()),
            JobStatus::Succeeded => {
                entry.job.finished_at = Some(Utc::now());
                entry.job.progress_percent = 100.0;
                if entry.job.tiles_total > 0 {
                    entry.job.tiles_processed = entry.job.tiles_total;
                }
                entry.last_published_percent = 100.0;
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                entry.job.finished_at = Some(Utc::now());
            }
            JobStatus::Pending => {}
        }

        let job = entry.job.clone();
        // Published under the lock so a racing progress write cannot land
        // on the topic after the terminal event.
        self.bus.publish(&job_topic(id), job_event(&job));
        Ok(job)
    }

    /// Record progress while RUNNING. Returns whether an event went out.
    ///
    /// Values are clamped to [0, 100] and never move backwards. Updates on
    /// a job that is not RUNNING are dropped silently, since runners race their
    /// own cancellation.
    pub fn update_progress(
        &self,
        id: Uuid,
        percent: f64,
        tiles_processed: u64,
        tiles_total: u64,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(CoreError::UnknownJob(id))?;

        if entry.job.status != JobStatus::Running {
            return Ok(false);
        }

        let clamped = percent.clamp(0.0, 100.0);
        if clamped > entry.job.progress_percent {
            entry.job.progress_percent = clamped;
        }
        entry.job.tiles_processed = entry.job.tiles_processed.max(tiles_processed);
        entry.job.tiles_total = entry.job.tiles_total.max(tiles_total);

        let current = entry.job.progress_percent;
        let should_publish = current - entry.last_published_percent >= self.progress_min_delta
            || (current >= 100.0 && entry.last_published_percent < 100.0);
        if !should_publish {
            return Ok(false);
        }

        entry.last_published_percent = current;
        let job = entry.job.clone();
        self.bus.publish(&job_topic(id), job_event(&job));
        Ok(true)
    }

    pub fn set_result(&self, id: Uuid, result: ResultHandle) -> Result<()> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(CoreError::UnknownJob(id))?;
        entry.job.result = Some(result);
        Ok(())
    }

    pub fn set_error(&self, id: Uuid, kind: JobErrorKind, message: impl Into<String>) -> Result<()> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or(CoreError::UnknownJob(id))?;
        entry.job.error_kind = Some(kind);
        entry.job.error_message = Some(message.into());
        Ok(())
    }
}

/// Build the bus event for a job's current state.
pub fn job_event(job: &Job) -> Event {
    Event::Progress {
        job_id: job.id,
        workflow_id: job.workflow_id,
        status: job.status,
        progress_percent: job.progress_percent,
        tiles_processed: job.tiles_processed,
        tiles_total: job.tiles_total,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSpec;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(EventBus::new(64)), 1.0)
    }

    fn make_job() -> Job {
        let spec = JobSpec {
            job_type: "SEGMENTATION".to_string(),
            input_image_path: "slide.svs".to_string(),
            params: serde_json::Value::Null,
        };
        Job::new(Uuid::new_v4(), "main", 0, "u1", &spec)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let reg = registry();
        let job = make_job();
        let id = job.id;
        reg.create(job);

        let job = reg.update_status(id, JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());

        let job = reg.update_status(id, JobStatus::Succeeded).unwrap();
        assert!(job.finished_at.is_some());
        assert_eq!(job.progress_percent, 100.0);
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let reg = registry();
        let job = make_job();
        let id = job.id;
        reg.create(job);

        let err = reg.update_status(id, JobStatus::Succeeded).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_terminal_is_write_once() {
        let reg = registry();
        let job = make_job();
        let id = job.id;
        reg.create(job);
        reg.update_status(id, JobStatus::Cancelled).unwrap();

        assert!(reg.update_status(id, JobStatus::Running).is_err());
        assert!(reg.update_status(id, JobStatus::Cancelled).is_err());
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let reg = registry();
        let job = make_job();
        let id = job.id;
        reg.create(job);
        reg.update_status(id, JobStatus::Running).unwrap();

        reg.update_progress(id, 50.0, 5, 10).unwrap();
        // A regression is ignored, not applied.
        reg.update_progress(id, 30.0, 3, 10).unwrap();
        assert_eq!(reg.get(id).unwrap().progress_percent, 50.0);

        reg.update_progress(id, 250.0, 10, 10).unwrap();
        assert_eq!(reg.get(id).unwrap().progress_percent, 100.0);
    }

    #[test]
    fn test_progress_dropped_when_not_running() {
        let reg = registry();
        let job = make_job();
        let id = job.id;
        reg.create(job);

        assert!(!reg.update_progress(id, 10.0, 1, 10).unwrap());
        assert_eq!(reg.get(id).unwrap().progress_percent, 0.0);
    }

    #[test]
    fn test_progress_events_are_coalesced() {
        let bus = Arc::new(EventBus::new(64));
        let reg = JobRegistry::new(bus.clone(), 1.0);
        let job = make_job();
        let id = job.id;
        reg.create(job);
        reg.update_status(id, JobStatus::Running).unwrap();

        assert!(reg.update_progress(id, 10.0, 1, 100).unwrap());
        // Sub-delta move: state updates, no event.
        assert!(!reg.update_progress(id, 10.5, 2, 100).unwrap());
        assert!(reg.update_progress(id, 12.0, 3, 100).unwrap());
    }

    #[test]
    fn test_unknown_job() {
        let reg = registry();
        assert!(matches!(
            reg.update_status(Uuid::new_v4(), JobStatus::Running),
            Err(CoreError::UnknownJob(_))
        ));
    }
}
