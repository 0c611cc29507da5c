use crate::error::{CoreError, Result};

/// Process-wide configuration for the scheduling core.
#[derive(Debug, Clone)]
pub struct HistoflowConfig {
    /// Global cap on concurrently RUNNING jobs.
    pub max_workers: usize,
    /// Number of tenant slots; users beyond this queue FIFO.
    pub max_active_users: usize,
    /// Per-subscription event buffer; oldest events drop on overflow.
    pub event_queue_capacity: usize,
    /// Minimum percent change between published progress events.
    pub progress_min_delta: f64,
    /// Listen address for the web adapter.
    pub bind_address: String,
}

impl Default for HistoflowConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_active_users: 3,
            event_queue_capacity: 256,
            progress_min_delta: 1.0,
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

impl HistoflowConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("HISTOFLOW_MAX_WORKERS") {
            config.max_workers = raw.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid max_workers: {e}"))
            })?;
        }

        if let Ok(raw) = std::env::var("HISTOFLOW_MAX_ACTIVE_USERS") {
            config.max_active_users = raw.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid max_active_users: {e}"))
            })?;
        }

        if let Ok(raw) = std::env::var("HISTOFLOW_EVENT_QUEUE_CAPACITY") {
            config.event_queue_capacity = raw.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid event_queue_capacity: {e}"))
            })?;
        }

        if let Ok(raw) = std::env::var("HISTOFLOW_PROGRESS_MIN_DELTA") {
            config.progress_min_delta = raw.parse().map_err(|e| {
                CoreError::ConfigurationError(format!("Invalid progress_min_delta: {e}"))
            })?;
        }

        if let Ok(addr) = std::env::var("HISTOFLOW_BIND_ADDRESS") {
            config.bind_address = addr;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(CoreError::ConfigurationError(
                "max_workers must be positive".to_string(),
            ));
        }
        if self.max_active_users == 0 {
            return Err(CoreError::ConfigurationError(
                "max_active_users must be positive".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(CoreError::ConfigurationError(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
