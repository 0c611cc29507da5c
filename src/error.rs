use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors surfaced by the scheduling core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Submission rejected before any state was mutated.
    InvalidDag(String),
    UnknownWorkflow(Uuid),
    UnknownJob(Uuid),
    /// Internal assertion: a status change the transition table forbids.
    /// Logged by callers, never user-visible.
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },
    ConfigurationError(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidDag(msg) => write!(f, "Invalid DAG: {msg}"),
            CoreError::UnknownWorkflow(id) => write!(f, "Unknown workflow: {id}"),
            CoreError::UnknownJob(id) => write!(f, "Unknown job: {id}"),
            CoreError::InvalidTransition {
                entity,
                id,
                from,
                to,
            } => {
                write!(f, "Invalid {entity} transition for {id}: {from} -> {to}")
            }
            CoreError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Machine-readable reason attached to a job that ended FAILED or CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorKind {
    /// The runner reported a failure through its outcome.
    RunnerFailed,
    /// The runner task terminated abnormally (panic or abort).
    RunnerCrash,
    /// An earlier job in the same branch failed or was cancelled.
    SkippedDueToPredecessor,
    /// Explicit cancellation by the owning user.
    CancelledByRequest,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunnerFailed => write!(f, "RUNNER_FAILED"),
            Self::RunnerCrash => write!(f, "RUNNER_CRASH"),
            Self::SkippedDueToPredecessor => write!(f, "SKIPPED_DUE_TO_PREDECESSOR"),
            Self::CancelledByRequest => write!(f, "CANCELLED_BY_REQUEST"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_format() {
        let json = serde_json::to_string(&JobErrorKind::SkippedDueToPredecessor).unwrap();
        assert_eq!(json, "\"SKIPPED_DUE_TO_PREDECESSOR\"");
        assert_eq!(JobErrorKind::RunnerCrash.to_string(), "RUNNER_CRASH");
    }

    #[test]
    fn test_display_messages() {
        let err = CoreError::InvalidTransition {
            entity: "job",
            id: Uuid::nil(),
            from: "SUCCEEDED".to_string(),
            to: "RUNNING".to_string(),
        };
        assert!(err.to_string().contains("SUCCEEDED -> RUNNING"));
    }
}
