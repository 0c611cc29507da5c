//! Branch-aware multi-tenant scheduler core for whole-slide image
//! inference workflows.
//!
//! Workflows are sets of independent branches; within a branch jobs run in
//! order, across branches with as much parallelism as the global worker cap
//! and the tenant slot cap allow. The image pipeline itself stays behind
//! the [`runner::JobRunner`] trait.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod system;
pub mod tenancy;
pub mod web;

pub use config::HistoflowConfig;
pub use error::{CoreError, JobErrorKind, Result};
pub use system::SchedulerSystem;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loads_successfully() {
        let config = HistoflowConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.max_active_users, 3);
    }
}
