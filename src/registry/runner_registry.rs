//! Type tag -> runner resolution.
//!
//! Adding a job type means registering another runner at init; the core
//! never matches on type tags itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::runner::JobRunner;

#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<String, Arc<dyn JobRunner>>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, runner: Arc<dyn JobRunner>) {
        let job_type = job_type.into();
        info!(job_type = %job_type, "Registering job runner");
        self.runners.write().insert(job_type, runner);
    }

    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobRunner>> {
        self.runners.read().get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.runners.read().contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.runners.read().keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SimulatedRunner;
    use std::time::Duration;

    #[test]
    fn test_register_and_resolve() {
        let registry = RunnerRegistry::new();
        assert!(!registry.contains("SEGMENTATION"));

        registry.register(
            "SEGMENTATION",
            Arc::new(SimulatedRunner::new(1, Duration::from_millis(1))),
        );
        assert!(registry.contains("SEGMENTATION"));
        assert!(registry.resolve("SEGMENTATION").is_some());
        assert!(registry.resolve("TISSUE_MASK").is_none());
        assert_eq!(registry.registered_types(), vec!["SEGMENTATION"]);
    }
}
