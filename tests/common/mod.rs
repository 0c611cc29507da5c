//! Shared test harness: a param-scripted runner and polling helpers.

// Each integration test crate uses a different subset of the harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use histoflow_core::config::HistoflowConfig;
use histoflow_core::models::job::JobSpec;
use histoflow_core::models::workflow::WorkflowDag;
use histoflow_core::registry::RunnerRegistry;
use histoflow_core::runner::{JobRunner, JobView, ProgressSink, RunOutcome};
use histoflow_core::system::SchedulerSystem;

/// Runner whose behavior is scripted through job params:
///
/// - `{"behavior": "progress", "steps": [0, 25, 50]}`: report each step,
///   then succeed.
/// - `{"behavior": "fail", "message": "boom"}`: fail immediately.
/// - `{"behavior": "block"}` (optionally `"progress_at": 40.0`): report
///   the given progress, then hold the worker permit until the test calls
///   [`release`](Self::release) with the job's input path, or the cancel
///   token fires.
/// - anything else: succeed immediately.
///
/// Tracks a high-water mark of concurrent invocations for capacity
/// assertions.
pub struct ScriptedRunner {
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gates: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    /// Unblock the `block` job whose input path is `key`.
    pub fn release(&self, key: &str) {
        self.gate(key).add_permits(1);
    }

    /// Highest number of invocations ever in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn currently_running(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn gate(&self, key: &str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    async fn run_scripted(
        &self,
        job: &JobView,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        match job.params.get("behavior").and_then(|b| b.as_str()) {
            Some("progress") => {
                let steps: Vec<f64> = job
                    .params
                    .get("steps")
                    .and_then(|s| s.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
                    .unwrap_or_default();
                let total = steps.len() as u64;
                for (i, step) in steps.iter().enumerate() {
                    progress.update(*step, i as u64 + 1, total);
                }
                RunOutcome::Succeeded { result: None }
            }
            Some("fail") => {
                let message = job
                    .params
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("scripted failure");
                RunOutcome::failed(message)
            }
            Some("block") => {
                if let Some(at) = job.params.get("progress_at").and_then(|p| p.as_f64()) {
                    progress.update(at, 1, 10);
                }
                let gate = self.gate(&job.input_image_path);
                tokio::select! {
                    _ = cancel.cancelled() => RunOutcome::Cancelled,
                    permit = gate.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                        RunOutcome::Succeeded { result: None }
                    }
                }
            }
            _ => {
                progress.update(100.0, 1, 1);
                RunOutcome::Succeeded { result: None }
            }
        }
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(
        &self,
        job: JobView,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let outcome = self.run_scripted(&job, &progress, &cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Assemble a full system around the scripted runner.
pub fn start_system(
    max_workers: usize,
    max_active_users: usize,
    runner: Arc<ScriptedRunner>,
) -> Arc<SchedulerSystem> {
    let config = HistoflowConfig {
        max_workers,
        max_active_users,
        event_queue_capacity: 256,
        progress_min_delta: 1.0,
        ..Default::default()
    };
    let runners = Arc::new(RunnerRegistry::new());
    runners.register("SEGMENTATION", runner.clone());
    runners.register("TISSUE_MASK", runner);
    SchedulerSystem::init(config, runners).expect("system init")
}

pub fn dag(branches: Vec<(&str, Vec<JobSpec>)>) -> WorkflowDag {
    WorkflowDag {
        branches: branches
            .into_iter()
            .map(|(id, specs)| (id.to_string(), specs))
            .collect(),
    }
}

pub fn progress_job(input: &str, steps: &[f64]) -> JobSpec {
    JobSpec {
        job_type: "SEGMENTATION".to_string(),
        input_image_path: input.to_string(),
        params: json!({ "behavior": "progress", "steps": steps }),
    }
}

pub fn failing_job(input: &str, message: &str) -> JobSpec {
    JobSpec {
        job_type: "SEGMENTATION".to_string(),
        input_image_path: input.to_string(),
        params: json!({ "behavior": "fail", "message": message }),
    }
}

pub fn blocking_job(input: &str) -> JobSpec {
    JobSpec {
        job_type: "SEGMENTATION".to_string(),
        input_image_path: input.to_string(),
        params: json!({ "behavior": "block" }),
    }
}

pub fn blocking_job_at(input: &str, progress_at: f64) -> JobSpec {
    JobSpec {
        job_type: "SEGMENTATION".to_string(),
        input_image_path: input.to_string(),
        params: json!({ "behavior": "block", "progress_at": progress_at }),
    }
}

/// Poll until `check` holds, panicking after `timeout`.
pub async fn wait_until<F>(what: &str, timeout: Duration, check: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
