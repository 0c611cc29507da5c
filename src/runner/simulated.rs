use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{JobRunner, JobView, ProgressSink, RunOutcome};

/// Fixed-step runner that sleeps instead of processing tiles.
///
/// Stands in for the image pipeline in the server binary's default registry
/// and in local smoke runs. Checks the cancel token between steps, as any
/// conforming runner must.
pub struct SimulatedRunner {
    total_steps: u64,
    step_delay: Duration,
}

impl SimulatedRunner {
    pub fn new(total_steps: u64, step_delay: Duration) -> Self {
        Self {
            total_steps: total_steps.max(1),
            step_delay,
        }
    }
}

impl Default for SimulatedRunner {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}

#[async_trait]
impl JobRunner for SimulatedRunner {
    async fn run(
        &self,
        job: JobView,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        info!(job_id = %job.id, job_type = %job.job_type, "Simulating job");

        for step in 0..self.total_steps {
            tokio::select! {
                _ = cancel.cancelled() => return RunOutcome::Cancelled,
                _ = tokio::time::sleep(self.step_delay) => {}
            }
            let done = step + 1;
            let percent = done as f64 / self.total_steps as f64 * 100.0;
            progress.update(percent, done, self.total_steps);
        }

        RunOutcome::Succeeded { result: None }
    }
}
