//! Assembly and lifecycle of the scheduling core.
//!
//! `init` wires the bus, registries, tenant manager, and scheduler and
//! spawns the coordinator. Nothing here is a hidden global: the web adapter
//! and the host binary receive the assembled system by injection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::HistoflowConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::registry::{JobRegistry, RunnerRegistry, WorkflowRegistry};
use crate::scheduler::Scheduler;
use crate::tenancy::TenantManager;

pub struct SchedulerSystem {
    config: HistoflowConfig,
    bus: Arc<EventBus>,
    jobs: Arc<JobRegistry>,
    workflows: Arc<WorkflowRegistry>,
    tenants: Arc<TenantManager>,
    runners: Arc<RunnerRegistry>,
    scheduler: Arc<Scheduler>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerSystem {
    /// Build the core and start the coordinator task.
    ///
    /// Must run inside a tokio runtime. The runner registry is supplied by
    /// the host so job types stay an init-time concern.
    pub fn init(config: HistoflowConfig, runners: Arc<RunnerRegistry>) -> Result<Arc<Self>> {
        config.validate()?;

        let bus = Arc::new(EventBus::new(config.event_queue_capacity));
        let jobs = Arc::new(JobRegistry::new(Arc::clone(&bus), config.progress_min_delta));
        let workflows = Arc::new(WorkflowRegistry::new(Arc::clone(&bus)));
        let tenants = Arc::new(TenantManager::new(config.max_active_users));
        let scheduler = Scheduler::new(
            config.clone(),
            Arc::clone(&jobs),
            Arc::clone(&workflows),
            Arc::clone(&tenants),
            Arc::clone(&runners),
            Arc::clone(&bus),
        );

        let coordinator = tokio::spawn(Arc::clone(&scheduler).run());

        info!(
            max_workers = config.max_workers,
            max_active_users = config.max_active_users,
            job_types = ?runners.registered_types(),
            "Scheduler system initialized"
        );

        Ok(Arc::new(Self {
            config,
            bus,
            jobs,
            workflows,
            tenants,
            runners,
            scheduler,
            coordinator: Mutex::new(Some(coordinator)),
        }))
    }

    /// Cancel all running jobs and stop the coordinator.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let handle = self.coordinator.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Scheduler system shut down");
    }

    pub fn config(&self) -> &HistoflowConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    pub fn tenants(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.runners
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}
