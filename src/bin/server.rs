use std::sync::Arc;

use tracing::info;

use histoflow_core::config::HistoflowConfig;
use histoflow_core::logging::init_structured_logging;
use histoflow_core::registry::RunnerRegistry;
use histoflow_core::runner::SimulatedRunner;
use histoflow_core::system::SchedulerSystem;
use histoflow_core::web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = HistoflowConfig::from_env()?;

    // The real image pipeline registers its runners here; the simulated
    // runner keeps the server exercisable without it.
    let runners = Arc::new(RunnerRegistry::new());
    runners.register("SEGMENTATION", Arc::new(SimulatedRunner::default()));
    runners.register("TISSUE_MASK", Arc::new(SimulatedRunner::default()));

    let system = SchedulerSystem::init(config.clone(), runners)?;
    let app = web::router(Arc::clone(&system));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(
        addr = %config.bind_address,
        max_workers = config.max_workers,
        max_active_users = config.max_active_users,
        "histoflow server listening"
    );
    axum::serve(listener, app).await?;

    system.shutdown().await;
    Ok(())
}
