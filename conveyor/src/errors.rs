//! Error types for the conveyor orchestration core.
//!
//! The taxonomy distinguishes errors reported straight back to the caller
//! (`NotFound`, `InvalidTransition`) from the one error the orchestrator
//! retries internally (`ConcurrentModification`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::Status;

/// The main error type for conveyor operations.
#[derive(Debug, Error)]
pub enum ConveyorError {
    /// An unknown id was referenced.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A transition is not allowed from the instance's current state.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// A pipeline subtree changed between snapshot and commit.
    #[error("{0}")]
    ConcurrentModification(#[from] ConcurrentModificationError),

    /// No idle worker could take the assignment.
    #[error("{0}")]
    WorkerUnavailable(#[from] WorkerUnavailableError),

    /// A status name in a report could not be parsed.
    #[error("Unknown status name: {0}")]
    UnknownStatus(String),

    /// Delivering a work request to a worker failed.
    #[error("Transport error for worker {worker}: {message}")]
    Transport {
        /// The worker the request was addressed to.
        worker: String,
        /// Transport-level failure description.
        message: String,
    },

    /// Configuration was malformed or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ConveyorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ConveyorError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(worker: impl ToString, message: impl Into<String>) -> Self {
        Self::Transport {
            worker: worker.to_string(),
            message: message.into(),
        }
    }

    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
            Self::UnknownStatus(_) => "UNKNOWN_STATUS",
            Self::Transport { .. } => "TRANSPORT",
            Self::Config(_) => "CONFIG",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Io(_) => "IO",
        }
    }

    /// Returns true if the orchestrator may retry the operation by re-deriving
    /// its batch from fresh state.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }

    /// Converts to a dictionary representation for API collaborators.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        match self {
            Self::NotFound(err) => {
                map.insert("kind".to_string(), serde_json::json!(err.kind));
                map.insert("id".to_string(), serde_json::json!(err.id));
            }
            Self::InvalidTransition(err) => {
                map.insert("id".to_string(), serde_json::json!(err.id));
                if let Some(from) = err.from {
                    map.insert("from".to_string(), serde_json::json!(from));
                }
                if let Some(to) = err.to {
                    map.insert("to".to_string(), serde_json::json!(to));
                }
            }
            Self::ConcurrentModification(err) => {
                map.insert("pipeline_id".to_string(), serde_json::json!(err.pipeline_id));
                map.insert("expected_version".to_string(), serde_json::json!(err.expected));
                map.insert("actual_version".to_string(), serde_json::json!(err.actual));
            }
            Self::WorkerUnavailable(err) => {
                if let Some(ref worker) = err.worker {
                    map.insert("worker".to_string(), serde_json::json!(worker));
                }
            }
            Self::Transport { worker, .. } => {
                map.insert("worker".to_string(), serde_json::json!(worker));
            }
            _ => {}
        }
        map
    }
}

/// The kind of entity a [`NotFoundError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A pipeline instance.
    Pipeline,
    /// A stage instance.
    Stage,
    /// A workflow instance.
    Workflow,
    /// An action instance.
    Action,
    /// A worker record.
    Worker,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Stage => write!(f, "stage"),
            Self::Workflow => write!(f, "workflow"),
            Self::Action => write!(f, "action"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Error raised when an unknown id is referenced.
#[derive(Debug, Clone, Error)]
#[error("{kind} not found: {id}")]
pub struct NotFoundError {
    /// What kind of entity was looked up.
    pub kind: EntityKind,
    /// The id that was not found.
    pub id: String,
}

impl NotFoundError {
    /// Creates a new not-found error.
    #[must_use]
    pub fn new(kind: EntityKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// Error raised when a status transition is not allowed.
#[derive(Debug, Clone, Error)]
#[error("Invalid transition for {id}: {message}")]
pub struct InvalidTransitionError {
    /// The instance id.
    pub id: String,
    /// The current status, if relevant.
    pub from: Option<Status>,
    /// The requested status, if relevant.
    pub to: Option<Status>,
    /// Human-readable explanation.
    pub message: String,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(id: impl ToString, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            from: None,
            to: None,
            message: message.into(),
        }
    }

    /// Sets the status pair involved in the rejected transition.
    #[must_use]
    pub fn with_statuses(mut self, from: Status, to: Status) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
}

/// Error raised when a commit finds the pipeline at a different version than
/// the snapshot the batch was derived from.
#[derive(Debug, Clone, Error)]
#[error("Concurrent modification of pipeline {pipeline_id}: expected version {expected}, found {actual}")]
pub struct ConcurrentModificationError {
    /// The pipeline whose subtree changed.
    pub pipeline_id: String,
    /// The version the batch was derived from.
    pub expected: u64,
    /// The version found at commit time.
    pub actual: u64,
}

impl ConcurrentModificationError {
    /// Creates a new concurrent modification error.
    #[must_use]
    pub fn new(pipeline_id: impl ToString, expected: u64, actual: u64) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            expected,
            actual,
        }
    }
}

/// Error raised when an assignment needs a worker that is not idle.
#[derive(Debug, Clone, Error)]
#[error("Worker unavailable: {reason}")]
pub struct WorkerUnavailableError {
    /// The worker involved, if a specific one was requested.
    pub worker: Option<String>,
    /// Why the worker cannot take work.
    pub reason: String,
}

impl WorkerUnavailableError {
    /// Creates an error for a specific worker.
    #[must_use]
    pub fn for_worker(worker: impl ToString, reason: impl Into<String>) -> Self {
        Self {
            worker: Some(worker.to_string()),
            reason: reason.into(),
        }
    }

    /// Creates an error when no worker at all is idle.
    #[must_use]
    pub fn none_idle() -> Self {
        Self {
            worker: None,
            reason: "no idle worker".to_string(),
        }
    }
}

/// Convenience result alias.
pub type Result<T, E = ConveyorError> = std::result::Result<T, E>;
