use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::states::{JobStatus, WorkflowStatus};

/// Topic carrying global status snapshots.
pub const SYSTEM_TOPIC: &str = "system";

/// Topic for one workflow's aggregate progress and status changes.
pub fn workflow_topic(id: Uuid) -> String {
    format!("workflow.{id}")
}

/// Topic for one job's lifecycle and progress events.
pub fn job_topic(id: Uuid) -> String {
    format!("job.{id}")
}

/// Events published on the bus and bridged to WebSocket clients.
///
/// The `lagged` variant is generated by the bus itself when a subscription
/// overflows and older events were dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        job_id: Uuid,
        workflow_id: Uuid,
        status: JobStatus,
        progress_percent: f64,
        tiles_processed: u64,
        tiles_total: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowProgress {
        workflow_id: Uuid,
        status: WorkflowStatus,
        progress_percent: f64,
        completed_jobs: usize,
        failed_jobs: usize,
        total_jobs: usize,
        timestamp: DateTime<Utc>,
    },
    SystemStatus {
        running_jobs: usize,
        max_workers: usize,
        active_users: usize,
        queued_users: usize,
        max_active_users: usize,
        timestamp: DateTime<Utc>,
    },
    Lagged {
        missed: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tags() {
        let event = Event::Progress {
            job_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            status: JobStatus::Running,
            progress_percent: 42.0,
            tiles_processed: 21,
            tiles_total: 50,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["status"], "RUNNING");

        let event = Event::WorkflowProgress {
            workflow_id: Uuid::nil(),
            status: WorkflowStatus::Running,
            progress_percent: 10.0,
            completed_jobs: 1,
            failed_jobs: 0,
            total_jobs: 4,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_progress");
    }

    #[test]
    fn test_topic_names() {
        let id = Uuid::nil();
        assert_eq!(workflow_topic(id), format!("workflow.{id}"));
        assert_eq!(job_topic(id), format!("job.{id}"));
    }
}
